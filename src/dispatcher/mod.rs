//! # Dispatcher Module
//!
//! The dispatcher ties the pipeline together. For every inbound request,
//! [`Dispatcher::dispatch`]:
//!
//! 1. waits for a token from the shared [`LeakyBucket`](crate::rate_limit::LeakyBucket)
//!    (503 when none arrives in time, if rate limiting is enabled),
//! 2. builds the internal [`Request`](crate::request::Request) and parses the
//!    [`Endpoint`](crate::endpoint::Endpoint),
//! 3. resolves the route and validates the request ([`DispatchRouter::prepare`]),
//! 4. calls the handler through the retry executor ([`DispatchRouter::invoke`]),
//! 5. hands the final response to the outcome processor.
//!
//! ## Error Handling
//!
//! - Routing and validation failures short-circuit before the handler runs
//!   and are never retried.
//! - Handler errors and panics become error responses inside the router, so
//!   the executor can retry them. Panic details are logged, never returned.
//! - Anything escaping `dispatch` itself (a panicking collaborator, for
//!   instance) renders a 500 with the support message.
//!
//! Every failure renders the same HTML error page.
//!
//! ## Concurrency
//!
//! `Dispatcher` is `Clone + Send + Sync`; the registry and configuration
//! are read-only and the bucket carries its own lock. Call `dispatch` from
//! as many coroutines or threads as needed.

mod core;
mod pipeline;

pub use core::DispatchRouter;
pub use pipeline::{Dispatcher, DISPATCH_ID_ATTRIBUTE};
