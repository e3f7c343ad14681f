//! # CLI Module
//!
//! Command-line front end of the `reqpipe` binary.
//!
//! ## Commands
//!
//! ### `routes`
//!
//! Print every route of the bundled demo controllers with its method, auth
//! flag and required roles:
//!
//! ```bash
//! reqpipe routes
//! ```
//!
//! ### `replay`
//!
//! Dispatch a JSON array of requests through the full pipeline, one `may`
//! coroutine per request, against in-memory transport objects. Each outcome
//! is printed as one JSON line on stdout; logs go to stderr.
//!
//! ```bash
//! reqpipe replay requests.json --grant admin-token=ADMIN,USER
//! ```
//!
//! ```json
//! [
//!   { "method": "GET", "path": "/api/v1/category/list", "query": "sort=name&order=desc",
//!     "token": "admin-token" },
//!   { "method": "POST", "path": "/api/v1/category/create", "params": { "name": "Films" },
//!     "token": "admin-token" },
//!   { "method": "POST", "path": "/api/v1/login/login",
//!     "params": { "login": "ana@example.com", "password": "secret12" } }
//! ]
//! ```
//!
//! Options:
//! - `--config <FILE>` - TOML pipeline configuration (also `REQPIPE_CONFIG`)
//! - `--grant <TOKEN=ROLES>` - seed a session token, repeatable
//! - `--views <DIR>` - render forwards from a template directory instead of
//!   echoing the view name and attributes as JSON

mod commands;

pub use commands::{
    parse_grant, replay, route_table, run_cli, Cli, Commands, ReplayOutcome, ReplayRequest,
};
