//! # Retry Executor
//!
//! Runs a handler call and repeats it while the response carries errors,
//! up to `request.retry` extra attempts, sleeping `2^attempt * 100ms`
//! between attempts. Exhausted retries hand back the last errored response
//! unchanged; the caller decides how to render it.
//!
//! Sleeping goes through [`Sleeper`] so the backoff suspends only the
//! calling coroutine and so tests can observe or cancel it.

use std::time::Duration;

use tracing::{debug, warn};

use crate::request::{Request, Response};

/// Base unit of the exponential backoff.
pub const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Delay before retry number `attempt + 1`: `2^attempt * 100ms`.
#[must_use]
pub fn backoff(attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    BACKOFF_BASE.saturating_mul(factor)
}

/// Blocks the caller between attempts.
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration`. Returning `false` cancels the remaining retries.
    fn sleep(&self, duration: Duration) -> bool;
}

/// Sleeps through `may`, parking the current coroutine (or thread).
#[derive(Debug, Clone, Copy, Default)]
pub struct CoroutineSleeper;

impl Sleeper for CoroutineSleeper {
    fn sleep(&self, duration: Duration) -> bool {
        may::coroutine::sleep(duration);
        true
    }
}

/// Bounded retry around a handler call.
pub struct RetryExecutor<'a> {
    sleeper: &'a dyn Sleeper,
}

impl<'a> RetryExecutor<'a> {
    #[must_use]
    pub fn new(sleeper: &'a dyn Sleeper) -> Self {
        Self { sleeper }
    }

    /// Call `handler` until it returns a response without errors, retries
    /// run out, or the sleeper cancels.
    pub fn send_with_retry<F>(&self, request: &Request, mut handler: F) -> Response
    where
        F: FnMut(&Request) -> Response,
    {
        let max_retries = request.retry;
        let mut attempt: u32 = 0;
        loop {
            let response = handler(request);
            if !response.has_errors() {
                if attempt > 0 {
                    debug!(endpoint = %request.endpoint, attempt, "succeeded after retry");
                }
                return response;
            }
            if attempt >= max_retries {
                warn!(
                    endpoint = %request.endpoint,
                    attempts = attempt + 1,
                    status = response.status_code,
                    errors = ?response.errors,
                    "retries exhausted"
                );
                return response;
            }
            let delay = backoff(attempt);
            debug!(
                endpoint = %request.endpoint,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after error"
            );
            if !self.sleeper.sleep(delay) {
                warn!(endpoint = %request.endpoint, attempt, "retry wait cancelled");
                return response;
            }
            attempt += 1;
        }
    }
}
