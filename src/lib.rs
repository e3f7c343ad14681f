//! # reqpipe
//!
//! **reqpipe** is an inbound request dispatch pipeline built on the `may` coroutine runtime. It
//! sits between a transport (a servlet-like request/response pair) and a set of registered
//! controllers, and turns every inbound call into exactly one rendered outcome: a forwarded
//! view, a redirect, or an error page.
//!
//! ## Overview
//!
//! A single [`Dispatcher`] owns the controller [`Registry`](registry::Registry), the token
//! service, the view renderer and one shared [`LeakyBucket`]. Every call to
//! [`Dispatcher::dispatch`] runs the same stages:
//!
//! 1. **Admission** - a token is taken from the leaky bucket, waiting up to the configured
//!    budget; an empty bucket short-circuits with `429`.
//! 2. **Request model** - transport parameters, query string and session token become a
//!    [`Request`].
//! 3. **Endpoint parsing** - `/api/{version}/{controller}{action}` becomes an [`Endpoint`];
//!    a trailing numeric segment is the resource id and the action is templated to `/{id}`.
//! 4. **Resolution and validation** - the route is looked up and checked for method,
//!    authentication, roles, API version and declared field constraints.
//! 5. **Execution** - the handler runs under [`RetryExecutor`](executor::RetryExecutor);
//!    an error response is retried with exponential backoff up to the request's retry budget.
//! 6. **Outcome** - login and logout propagate to the session, attributes are copied onto the
//!    transport request, and the `next` directive is forwarded or redirected.
//!
//! ## Architecture
//!
//! - **[`endpoint`]** - URL path parsing into version, controller, action and resource id
//! - **[`request`]** - request and response models, query pagination parsing
//! - **[`registry`]** - controller registration, route descriptors and typed extraction
//! - **[`constraints`]** - declarative field constraints with message templates
//! - **[`validator`]** - per-route request validation
//! - **[`security`]** - roles and the token service seam
//! - **[`rate_limit`]** - leaky-bucket admission with a pluggable clock
//! - **[`executor`]** - retry with exponential backoff
//! - **[`dispatcher`]** - route invocation and the end-to-end pipeline
//! - **[`outcome`]** - forward/redirect directives and the error page
//! - **[`transport`]** - request/response traits and their in-memory implementations
//! - **[`views`]** - file-backed view rendering with `minijinja`
//! - **[`worker`]** - one `may` coroutine per dispatch
//! - **[`config`]**, **[`logging`]**, **[`cli`]** - configuration, tracing setup, binary front end
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use reqpipe::controllers::{register_all, DemoApp};
//! use reqpipe::security::TokenService;
//! use reqpipe::transport::{EchoViews, MemoryRequest, MemoryResponse};
//! use reqpipe::{Dispatcher, PipelineConfig};
//!
//! let app = DemoApp::default();
//! let registry = Arc::new(register_all(&app).unwrap());
//! let tokens: Arc<dyn TokenService> = app.tokens.clone();
//! let dispatcher = Dispatcher::new(registry, tokens, Arc::new(EchoViews), PipelineConfig::default());
//!
//! let mut req = MemoryRequest::new("GET", "/api/v1/login/form");
//! let mut res = MemoryResponse::new();
//! dispatcher.dispatch(&mut req, &mut res);
//!
//! assert_eq!(res.status, Some(200));
//! assert_eq!(res.forwarded.as_deref(), Some("/WEB-INF/view/pages/login/formLogin.jsp"));
//! ```

pub mod cli;
pub mod config;
pub mod constraints;
pub mod controllers;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod ids;
pub mod logging;
pub mod outcome;
pub mod rate_limit;
pub mod registry;
pub mod request;
pub mod security;
pub mod status;
pub mod transport;
pub mod validator;
pub mod views;
pub mod worker;

pub use config::PipelineConfig;
pub use dispatcher::{DispatchRouter, Dispatcher};
pub use endpoint::Endpoint;
pub use error::{PipelineError, PipelineResult};
pub use rate_limit::LeakyBucket;
pub use registry::{ControllerRegistry, Registry, RouteDescriptor};
pub use request::{Request, Response};
