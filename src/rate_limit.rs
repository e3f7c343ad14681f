//! # Admission Gate
//!
//! [`LeakyBucket`] is the one piece of state every request touches. Tokens
//! and the last refill time live behind a single `may` mutex; a condition
//! variable wakes waiters whenever a refill adds tokens.
//!
//! Refill is lazy: it runs inside `acquire` and inside each waiter's loop.
//! A waiter never parks longer than one refill interval at a time, so it
//! refills on its own even when no other caller comes along.
//!
//! Time is read through [`Clock`], so tests can drive refills with a
//! [`ManualClock`] instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use may::sync::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::config::BucketConfig;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
struct BucketState {
    available: u32,
    last_refill: Duration,
}

/// Token bucket refilled by a fixed amount per elapsed interval.
pub struct LeakyBucket {
    state: Mutex<BucketState>,
    refilled: Condvar,
    config: BucketConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LeakyBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeakyBucket")
            .field("config", &self.config)
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}

impl LeakyBucket {
    /// A full bucket on the system clock.
    #[must_use]
    pub fn new(config: BucketConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::default()))
    }

    /// A full bucket on the given clock.
    #[must_use]
    pub fn with_clock(config: BucketConfig, clock: Arc<dyn Clock>) -> Self {
        let last_refill = clock.now();
        Self {
            state: Mutex::new(BucketState {
                available: config.max_tokens,
                last_refill,
            }),
            refilled: Condvar::new(),
            config,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a token if one is available. Never blocks on tokens.
    pub fn acquire(&self) -> bool {
        let mut state = self.lock();
        self.refill_locked(&mut state);
        take(&mut state)
    }

    /// Add the tokens earned since the last refill and wake waiters.
    pub fn refill(&self) {
        let mut state = self.lock();
        self.refill_locked(&mut state);
    }

    /// Take a token, waiting up to `timeout` for a refill.
    pub fn acquire_or_wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let slice_cap = self.config.refill_interval();
        let mut state = self.lock();
        loop {
            self.refill_locked(&mut state);
            if take(&mut state) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(timeout_ms = timeout.as_millis() as u64, "admission wait timed out");
                return false;
            }
            let slice = whole_millis(deadline - now).min(slice_cap);
            let (guard, _) = self
                .refilled
                .wait_timeout(state, slice)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Tokens currently available, without refilling.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.lock().available
    }

    #[must_use]
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    fn refill_locked(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_sub(state.last_refill);
        let interval = self.config.refill_interval();
        if elapsed < interval {
            return;
        }
        let intervals = elapsed.as_millis() / interval.as_millis();
        let earned = intervals.saturating_mul(u128::from(self.config.refill_amount));
        let before = state.available;
        let after = u128::from(before)
            .saturating_add(earned)
            .min(u128::from(self.config.max_tokens));
        state.available = u32::try_from(after).unwrap_or(self.config.max_tokens);
        state.last_refill = now;
        trace!(before, after = state.available, "bucket refilled");
        if state.available > before {
            self.refilled.notify_all();
        }
    }
}

/// Round up to whole milliseconds, at least one. A coroutine parked on a
/// sub-millisecond timeout is never woken by the `may` timer.
fn whole_millis(d: Duration) -> Duration {
    let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
    Duration::from_millis(u64::try_from(ms.max(1)).unwrap_or(u64::MAX))
}

fn take(state: &mut BucketState) -> bool {
    if state.available > 0 {
        state.available -= 1;
        true
    } else {
        false
    }
}
