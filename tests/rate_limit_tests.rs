#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Leaky-bucket admission under concurrency.
//!
//! Threads and coroutines race for tokens on a [`ManualClock`] so grants can
//! be counted exactly; refills are driven by advancing the clock.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use reqpipe::config::BucketConfig;
use reqpipe::rate_limit::{Clock, LeakyBucket, ManualClock};

fn bucket(max: u32, amount: u32, interval_ms: u64) -> (Arc<ManualClock>, Arc<LeakyBucket>) {
    let clock = Arc::new(ManualClock::new());
    let config = BucketConfig {
        max_tokens: max,
        refill_amount: amount,
        refill_interval_ms: interval_ms,
    };
    let shared: Arc<dyn Clock> = clock.clone();
    (clock, Arc::new(LeakyBucket::with_clock(config, shared)))
}

#[test]
fn test_threads_never_over_grant() {
    let (_clock, bucket) = bucket(25, 5, 1000);
    let granted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let bucket = Arc::clone(&bucket);
            let granted = Arc::clone(&granted);
            thread::spawn(move || {
                for _ in 0..20 {
                    if bucket.acquire() {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(granted.load(Ordering::SeqCst), 25);
    assert_eq!(bucket.available(), 0);
}

#[test]
fn test_each_refill_grants_exactly_the_refill_amount() {
    let (clock, bucket) = bucket(10, 3, 100);
    while bucket.acquire() {}

    for round in 1..=3 {
        clock.advance(Duration::from_millis(100));
        let granted = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                let granted = Arc::clone(&granted);
                thread::spawn(move || {
                    for _ in 0..5 {
                        if bucket.acquire() {
                            granted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(granted.load(Ordering::SeqCst), 3, "round {round}");
    }
}

#[test]
fn test_waiter_is_woken_by_refill() {
    let (clock, bucket) = bucket(1, 1, 200);
    assert!(bucket.acquire());

    let waiter = {
        let bucket = Arc::clone(&bucket);
        thread::spawn(move || {
            let start = Instant::now();
            let got = bucket.acquire_or_wait(Duration::from_secs(10));
            (got, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    clock.advance(Duration::from_millis(200));
    bucket.refill();

    let (got, waited) = waiter.join().unwrap();
    assert!(got);
    assert!(waited < Duration::from_secs(5), "waited {waited:?}");
    assert_eq!(bucket.available(), 0);
}

#[test]
fn test_only_one_of_many_waiters_gets_a_single_token() {
    let (clock, bucket) = bucket(1, 1, 50);
    assert!(bucket.acquire());

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let bucket = Arc::clone(&bucket);
            thread::spawn(move || bucket.acquire_or_wait(Duration::from_millis(400)))
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    clock.advance(Duration::from_millis(50));
    bucket.refill();

    let winners = waiters
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|got| *got)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn test_coroutines_share_the_gate() {
    common::set_stack_size();
    let (_clock, bucket) = bucket(12, 1, 1000);
    let granted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..30)
        .map(|_| {
            let bucket = Arc::clone(&bucket);
            let granted = Arc::clone(&granted);
            may::go!(move || {
                if bucket.acquire_or_wait(Duration::from_millis(20)) {
                    granted.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(granted.load(Ordering::SeqCst), 12);
}

#[test]
fn test_coroutine_waiter_times_out() {
    common::set_stack_size();
    let (_clock, bucket) = bucket(1, 1, 1000);
    assert!(bucket.acquire());

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let bucket = Arc::clone(&bucket);
        may::go!(move || {
            let start = Instant::now();
            let got = bucket.acquire_or_wait(Duration::from_millis(20));
            tx.send((got, start.elapsed())).unwrap();
        })
    };

    let (got, waited) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("coroutine waiter never returned");
    waiter.join().unwrap();
    assert!(!got);
    assert!(waited >= Duration::from_millis(20), "waited {waited:?}");
    assert_eq!(bucket.available(), 0);
}

#[test]
fn test_system_clock_refills_in_real_time() {
    let config = BucketConfig {
        max_tokens: 1,
        refill_amount: 1,
        refill_interval_ms: 30,
    };
    let bucket = LeakyBucket::new(config);
    assert!(bucket.acquire());
    assert!(!bucket.acquire());
    assert!(bucket.acquire_or_wait(Duration::from_secs(2)));
}
