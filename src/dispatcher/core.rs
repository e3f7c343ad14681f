//! Dispatch router: endpoint to route, validation, and guarded handler calls.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::{Registry, RouteDescriptor};
use crate::request::{Request, Response};
use crate::security::TokenService;
use crate::validator::RequestValidator;

/// Resolves endpoints against the registry and calls handlers.
pub struct DispatchRouter<'a> {
    registry: &'a Registry,
    tokens: &'a dyn TokenService,
}

impl<'a> DispatchRouter<'a> {
    #[must_use]
    pub fn new(registry: &'a Registry, tokens: &'a dyn TokenService) -> Self {
        Self { registry, tokens }
    }

    /// Look up the route and validate the request against it.
    ///
    /// # Errors
    ///
    /// 404 for an unknown route, otherwise the first validation failure.
    pub fn prepare(
        &self,
        endpoint: &Endpoint,
        request: &Request,
    ) -> PipelineResult<&'a RouteDescriptor> {
        let route = self.registry.resolve(endpoint)?;
        RequestValidator::new(self.tokens).validate(endpoint, route, request)?;
        debug!(
            controller = %endpoint.controller,
            action = %route.action_key,
            params = ?request.loggable_params(),
            "request validated"
        );
        Ok(route)
    }

    /// Call the handler. Errors and panics come back as error responses.
    #[must_use]
    pub fn invoke(&self, route: &RouteDescriptor, request: &Request) -> Response {
        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| route.invoke(request)));
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(response)) => {
                info!(
                    action = %route.action_key,
                    status = response.status_code,
                    execution_time_ms = elapsed_ms,
                    "handler execution complete"
                );
                response
            }
            Ok(Err(err)) => {
                if let PipelineError::UnhandledHandlerError { detail } = &err {
                    error!(action = %route.action_key, detail = %detail, "handler failed");
                } else {
                    warn!(
                        action = %route.action_key,
                        status = err.status(),
                        error = %err,
                        "handler returned an error"
                    );
                }
                Response::from_error(&err)
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(
                    action = %route.action_key,
                    panic_message = %detail,
                    "handler panicked"
                );
                Response::from_error(&PipelineError::UnhandledHandlerError { detail })
            }
        }
    }

    /// Single-shot routing: resolve, validate and invoke, with every failure
    /// folded into the returned response.
    #[must_use]
    pub fn route(&self, endpoint: &Endpoint, request: &Request) -> Response {
        match self.prepare(endpoint, request) {
            Ok(route) => self.invoke(route, request),
            Err(err) => Response::from_error(&err),
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UNEXPECTED_ERROR;
    use crate::registry::ControllerRegistry;
    use crate::security::StaticTokenService;

    fn registry() -> Registry {
        let demo = ControllerRegistry::builder("demo")
            .route(RouteDescriptor::new("/ok", |_| Ok(Response::new(200))).public())
            .route(
                RouteDescriptor::new("/conflict", |_| {
                    Err(PipelineError::handler(409, "already exists"))
                })
                .public(),
            )
            .route(
                RouteDescriptor::new("/boom", |_| -> PipelineResult<Response> {
                    panic!("db connection string leaked")
                })
                .public(),
            )
            .build()
            .unwrap();
        Registry::new([demo]).unwrap()
    }

    fn route(path: &str) -> Response {
        let registry = registry();
        let tokens = StaticTokenService::new();
        let router = DispatchRouter::new(&registry, &tokens);
        let endpoint = Endpoint::parse(path).unwrap();
        router.route(&endpoint, &Request::new("GET", path))
    }

    #[test]
    fn test_success() {
        let res = route("/api/v1/demo/ok");
        assert_eq!(res.status_code, 200);
        assert!(!res.has_errors());
    }

    #[test]
    fn test_declared_error_keeps_status() {
        let res = route("/api/v1/demo/conflict");
        assert_eq!(res.status_code, 409);
        assert_eq!(res.error_message().as_deref(), Some("already exists"));
    }

    #[test]
    fn test_panic_is_redacted() {
        let res = route("/api/v1/demo/boom");
        assert_eq!(res.status_code, 500);
        assert_eq!(res.error_message().as_deref(), Some(UNEXPECTED_ERROR));
    }

    #[test]
    fn test_missing_route() {
        assert_eq!(route("/api/v1/demo/nothing").status_code, 404);
    }

    #[test]
    fn test_panic_message_payloads() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
