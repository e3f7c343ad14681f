#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Shared fixtures for the integration tests: a `widget` controller that
//! exercises every outcome path, recording views and a sleeper that never
//! blocks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use parking_lot::Mutex;
use serde_json::json;

use reqpipe::constraints::{Constraint, FieldRule};
use reqpipe::executor::Sleeper;
use reqpipe::registry::{ControllerPaths, ControllerRegistry, Registry, RouteDescriptor};
use reqpipe::request::Response;
use reqpipe::security::{Role, StaticTokenService, TokenService};
use reqpipe::transport::{TransportRequest, TransportResponse, ViewRenderer};
use reqpipe::{Dispatcher, PipelineConfig, PipelineError};

pub const ADMIN_TOKEN: &str = "admin-token";
pub const USER_TOKEN: &str = "user-token";

pub fn set_stack_size() {
    let size = std::env::var("REQPIPE_STACK_SIZE")
        .ok()
        .and_then(|v| {
            if let Some(hex) = v.strip_prefix("0x") {
                usize::from_str_radix(hex, 16).ok()
            } else {
                v.parse().ok()
            }
        })
        .unwrap_or(0x10000);
    may::config().set_stack_size(size);
}

/// Records every forwarded view and writes a marker body.
#[derive(Debug, Default)]
pub struct RecordingViews {
    pub forwarded: Mutex<Vec<String>>,
}

impl RecordingViews {
    pub fn views(&self) -> Vec<String> {
        self.forwarded.lock().clone()
    }
}

impl ViewRenderer for RecordingViews {
    fn forward(
        &self,
        view: &str,
        _request: &dyn TransportRequest,
        response: &mut dyn TransportResponse,
    ) -> anyhow::Result<()> {
        self.forwarded.lock().push(view.to_string());
        response.set_content_type("text/plain");
        response.write_body(&format!("rendered {view}"))
    }
}

/// Counts retry waits without sleeping.
#[derive(Debug, Default)]
pub struct CountingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
}

impl CountingSleeper {
    pub fn count(&self) -> usize {
        self.sleeps.lock().len()
    }
}

impl Sleeper for CountingSleeper {
    fn sleep(&self, duration: Duration) -> bool {
        self.sleeps.lock().push(duration);
        true
    }
}

pub fn tokens() -> StaticTokenService {
    StaticTokenService::new()
        .with_token(ADMIN_TOKEN, [Role::Admin, Role::User])
        .with_token(USER_TOKEN, [Role::User])
}

/// Per-route call counters of the widget controller.
#[derive(Debug, Default)]
pub struct Calls {
    pub flaky: AtomicUsize,
    pub conflict: AtomicUsize,
    pub boom: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// The `widget` controller.
///
/// | action        | method | auth  | behaviour                                  |
/// |---------------|--------|-------|--------------------------------------------|
/// | `/ping`       | GET    | no    | forward to `pages/widget/ping.jsp`         |
/// | `/show/{id}`  | GET    | yes   | JSON body echoing the id                   |
/// | `/save`       | POST   | yes   | `name` 3..=20 chars, redirect to the list  |
/// | `/purge`      | POST   | ADMIN | 200, redirect to the list                  |
/// | `/flaky`      | GET    | no    | 503 error on the first call, then forward  |
/// | `/conflict`   | GET    | no    | always a declared 409                      |
/// | `/boom`       | GET    | no    | panics                                     |
/// | `/bad`        | GET    | no    | malformed `next` directive                 |
/// | `/clash`      | GET    | no    | 409 error with a malformed `next`          |
/// | `/login`      | POST   | no    | body `{token, user}`, redirect             |
/// | `/logout`     | GET    | yes   | redirect to `/ping`                        |
/// | `/beta`       | GET    | no    | declared for `v2`                          |
pub fn widget_controller(calls: &Arc<Calls>) -> ControllerRegistry {
    let paths = ControllerPaths::new("widget");

    let flaky_calls = Arc::clone(calls);
    let conflict_calls = Arc::clone(calls);
    let boom_calls = Arc::clone(calls);
    let p = paths.clone();
    let p_flaky = paths.clone();
    let p_save = paths.clone();
    let p_purge = paths.clone();
    let p_logout = paths.clone();

    ControllerRegistry::builder("widget")
        .route(
            RouteDescriptor::new("/ping", move |_| {
                Ok(Response::new(200).with_next(p.forward_to("ping")))
            })
            .public(),
        )
        .route(
            RouteDescriptor::new("/show/{id}", |req| {
                Ok(Response::new(200).with_body(json!({ "id": req.id() })))
            })
            .field(FieldRule::new("id").with(Constraint::min(1, "Id must be at least {0}"))),
        )
        .route(
            RouteDescriptor::new("/save", move |_| {
                Ok(Response::new(201).with_next(p_save.redirect_to("list")))
            })
            .method(Method::POST)
            .field(FieldRule::new("name").with_all(Constraint::length_between(
                3,
                20,
                "Name must be between {0} and {1} characters",
            ))),
        )
        .route(
            RouteDescriptor::new("/purge", move |_| {
                Ok(Response::new(200).with_next(p_purge.redirect_to("list")))
            })
            .method(Method::POST)
            .roles([Role::Admin]),
        )
        .route(
            RouteDescriptor::new("/flaky", move |_| {
                if flaky_calls.flaky.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(Response::error(503, "warming up"))
                } else {
                    Ok(Response::new(200).with_next(p_flaky.forward_to("flaky")))
                }
            })
            .public(),
        )
        .route(
            RouteDescriptor::new("/conflict", move |_| {
                conflict_calls.conflict.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::handler(409, "Category already exists"))
            })
            .public(),
        )
        .route(
            RouteDescriptor::new("/boom", move |_| {
                boom_calls.boom.fetch_add(1, Ordering::SeqCst);
                panic!("widget exploded")
            })
            .public(),
        )
        .route(
            RouteDescriptor::new("/bad", |_| Ok(Response::new(200).with_next("bad-directive")))
                .public(),
        )
        .route(
            RouteDescriptor::new("/clash", |_| {
                Ok(Response::error(409, "Duplicate widget").with_next("bad-directive"))
            })
            .public(),
        )
        .route(
            RouteDescriptor::new("/login", |req| {
                let user = req.parameter("login").unwrap_or_default().to_string();
                Ok(Response::new(200)
                    .with_body(json!({ "token": "fresh-token", "user": { "login": user } }))
                    .with_next("redirect:/api/v1/widget/ping"))
            })
            .method(Method::POST)
            .public(),
        )
        .route(RouteDescriptor::new("/logout", move |_| {
            Ok(Response::new(200).with_next(p_logout.redirect_to("ping")))
        }))
        .route(
            RouteDescriptor::new("/beta", |_| Ok(Response::new(200)))
                .public()
                .api_version("v2"),
        )
        .build()
        .unwrap()
}

/// Everything a dispatch test needs, wired together.
pub struct Fixture {
    pub calls: Arc<Calls>,
    pub views: Arc<RecordingViews>,
    pub sleeper: Arc<CountingSleeper>,
    pub dispatcher: Dispatcher,
}

impl Fixture {
    pub fn new(config: PipelineConfig) -> Self {
        set_stack_size();
        let calls = Arc::new(Calls::default());
        let registry = Arc::new(Registry::new([widget_controller(&calls)]).unwrap());
        let views = Arc::new(RecordingViews::default());
        let sleeper = Arc::new(CountingSleeper::default());
        let tokens: Arc<dyn TokenService> = Arc::new(tokens());
        let renderer: Arc<dyn ViewRenderer> = Arc::clone(&views) as Arc<dyn ViewRenderer>;
        let dispatcher = Dispatcher::new(registry, tokens, renderer, config)
            .with_sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>);
        Self {
            calls,
            views,
            sleeper,
            dispatcher,
        }
    }

    /// Rate limiting off so tests never wait on the bucket.
    pub fn unlimited() -> Self {
        Self::new(PipelineConfig {
            rate_limit_enabled: false,
            ..PipelineConfig::default()
        })
    }
}
