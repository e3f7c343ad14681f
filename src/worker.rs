//! # Worker Module
//!
//! One `may` coroutine per inbound request. Each coroutine owns its
//! transport request/response pair, runs [`Dispatcher::dispatch`] on it and
//! hands the pair back when joined.
//!
//! ## Configuration
//!
//! - `REQPIPE_STACK_SIZE`: coroutine stack size, decimal or `0x` hex
//!   (default: `0x10000`, 64 KB)

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};

use may::coroutine::JoinHandle;
use tracing::{debug, error};

use crate::dispatcher::Dispatcher;
use crate::transport::{TransportRequest, TransportResponse};

const DEFAULT_STACK_SIZE: usize = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Stack size for worker coroutines
    pub stack_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let stack_size = std::env::var("REQPIPE_STACK_SIZE")
            .ok()
            .and_then(|s| parse_stack_size(&s))
            .unwrap_or(DEFAULT_STACK_SIZE);
        Self { stack_size }
    }
}

fn parse_stack_size(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

/// Dispatch one request on a fresh coroutine.
///
/// The join result is `None` when the coroutine panicked outside the
/// dispatcher's own recovery.
///
/// # Errors
///
/// Returns the spawn error when the coroutine cannot be created.
pub fn spawn_dispatch<Req, Res>(
    dispatcher: &Dispatcher,
    config: &WorkerConfig,
    mut req: Req,
    mut res: Res,
) -> io::Result<JoinHandle<Option<(Req, Res)>>>
where
    Req: TransportRequest + Send + 'static,
    Res: TransportResponse + Send + 'static,
{
    let dispatcher = dispatcher.clone();
    let task = move || {
        let path = req.path().to_string();
        debug!(path = %path, "worker coroutine started");
        match catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(&mut req, &mut res))) {
            Ok(()) => Some((req, res)),
            Err(panic) => {
                error!(path = %path, panic_message = ?panic, "worker panicked");
                None
            }
        }
    };
    // SAFETY: the task owns all of its data and holds no thread-local guard
    // across a suspension point, which is the contract `may` requires of
    // spawned coroutines. `Dispatcher::dispatch` only enters its tracing
    // span around sections that cannot park.
    #[allow(unsafe_code)]
    unsafe {
        may::coroutine::Builder::new()
            .stack_size(config.stack_size)
            .spawn(task)
    }
}

/// Dispatch every request concurrently and return the pairs in input order.
///
/// Entries are `None` for coroutines that failed to spawn or panicked.
pub fn dispatch_all<Req, Res>(
    dispatcher: &Dispatcher,
    config: &WorkerConfig,
    jobs: Vec<(Req, Res)>,
) -> Vec<Option<(Req, Res)>>
where
    Req: TransportRequest + Send + 'static,
    Res: TransportResponse + Send + 'static,
{
    let handles: Vec<_> = jobs
        .into_iter()
        .enumerate()
        .map(|(index, (req, res))| {
            spawn_dispatch(dispatcher, config, req, res)
                .map_err(|e| error!(index, error = %e, "failed to spawn worker coroutine"))
                .ok()
        })
        .collect();

    handles
        .into_iter()
        .map(|handle| handle.and_then(|h| h.join().ok().flatten()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_size_parsing() {
        assert_eq!(parse_stack_size("0x4000"), Some(0x4000));
        assert_eq!(parse_stack_size("32768"), Some(32768));
        assert_eq!(parse_stack_size("big"), None);
    }

    #[test]
    fn test_default_stack_size() {
        assert_eq!(WorkerConfig::default().stack_size, 0x10000);
    }
}
