//! # Route Registry
//!
//! Routes are declared explicitly at startup: each controller builds a
//! [`ControllerRegistry`] from [`RouteDescriptor`]s, and the controllers are
//! collected into one [`Registry`]. After construction nothing is mutated,
//! so lookups need no locking and may run from any number of workers.
//!
//! ```rust
//! use http::Method;
//! use reqpipe::registry::{ControllerRegistry, Registry, RouteDescriptor};
//! use reqpipe::request::Response;
//!
//! let category = ControllerRegistry::builder("category")
//!     .route(RouteDescriptor::new("/list", |_req| Ok(Response::new(200))).public())
//!     .route(
//!         RouteDescriptor::new("/create", |_req| Ok(Response::new(201)))
//!             .method(Method::POST),
//!     )
//!     .build()
//!     .unwrap();
//! let registry = Registry::new([category]).unwrap();
//! let endpoint = "/api/v1/category/list".parse().unwrap();
//! assert_eq!(registry.resolve(&endpoint).unwrap().action_key, "/list");
//! ```
//!
//! Handler arguments are produced by an explicit [`Extractor`] declared next
//! to the handler, either a plain function or a [`FromRequest`] impl. Plain
//! handlers receive the [`Request`] itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use thiserror::Error;

use crate::constraints::FieldRule;
use crate::endpoint::Endpoint;
use crate::error::{PipelineError, PipelineResult};
use crate::request::{Request, Response};
use crate::security::{Role, RoleSet};

/// Version assumed when a route does not declare one.
pub const DEFAULT_API_VERSION: &str = "v1";

/// Type-erased handler stored in a route.
pub type HandlerFn = Arc<dyn Fn(&Request) -> PipelineResult<Response> + Send + Sync>;

/// Pulls typed handler arguments out of a request.
pub type Extractor<T> = fn(&Request) -> PipelineResult<T>;

/// Typed handler arguments built from the request parameters.
pub trait FromRequest: Sized {
    /// # Errors
    ///
    /// A missing or malformed field; usually a 400 `HandlerFailed`.
    fn from_request(req: &Request) -> PipelineResult<Self>;
}

/// Failures detected while building the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("duplicate action '{action}' in controller '{controller}'")]
    DuplicateAction { controller: String, action: String },
    #[error("duplicate controller '{name}'")]
    DuplicateController { name: String },
    #[error("action '{action}' in controller '{controller}' must be empty or start with '/'")]
    InvalidActionKey { controller: String, action: String },
}

/// Metadata and handler for one action.
#[derive(Clone)]
pub struct RouteDescriptor {
    pub action_key: String,
    pub method: Method,
    pub requires_auth: bool,
    pub required_roles: RoleSet,
    pub api_version: String,
    pub field_validators: Vec<FieldRule>,
    handler: HandlerFn,
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("action_key", &self.action_key)
            .field("method", &self.method)
            .field("requires_auth", &self.requires_auth)
            .field("required_roles", &self.required_roles)
            .field("api_version", &self.api_version)
            .field("field_validators", &self.field_validators)
            .finish_non_exhaustive()
    }
}

impl RouteDescriptor {
    /// A GET route on `v1` requiring authentication, with the handler
    /// receiving the request itself.
    pub fn new<F>(action_key: &str, handler: F) -> Self
    where
        F: Fn(&Request) -> PipelineResult<Response> + Send + Sync + 'static,
    {
        Self {
            action_key: action_key.to_string(),
            method: Method::GET,
            requires_auth: true,
            required_roles: RoleSet::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            field_validators: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    /// A route whose handler takes the value produced by `extractor`.
    pub fn with_args<T, F>(action_key: &str, extractor: Extractor<T>, handler: F) -> Self
    where
        T: 'static,
        F: Fn(T) -> PipelineResult<Response> + Send + Sync + 'static,
    {
        Self::new(action_key, move |req| handler(extractor(req)?))
    }

    /// A route whose handler takes a [`FromRequest`] value.
    pub fn typed<T, F>(action_key: &str, handler: F) -> Self
    where
        T: FromRequest + 'static,
        F: Fn(T) -> PipelineResult<Response> + Send + Sync + 'static,
    {
        Self::with_args(action_key, T::from_request, handler)
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// No token required.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    #[must_use]
    pub fn roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.required_roles.extend(roles);
        self
    }

    #[must_use]
    pub fn api_version(mut self, version: &str) -> Self {
        self.api_version = version.to_string();
        self
    }

    #[must_use]
    pub fn field(mut self, rule: FieldRule) -> Self {
        self.field_validators.push(rule);
        self
    }

    /// Run the handler, extraction included.
    ///
    /// # Errors
    ///
    /// Whatever the extractor or handler returns.
    pub fn invoke(&self, req: &Request) -> PipelineResult<Response> {
        (self.handler)(req)
    }
}

/// Immutable action table of one controller.
#[derive(Debug, Clone)]
pub struct ControllerRegistry {
    name: String,
    routes: HashMap<String, RouteDescriptor>,
}

/// Collects routes before the duplicate check in [`ControllerBuilder::build`].
#[derive(Debug)]
pub struct ControllerBuilder {
    name: String,
    routes: Vec<RouteDescriptor>,
}

impl ControllerBuilder {
    #[must_use]
    pub fn route(mut self, route: RouteDescriptor) -> Self {
        self.routes.push(route);
        self
    }

    /// # Errors
    ///
    /// Returns [`RegistryError`] on a duplicate or malformed action key.
    pub fn build(self) -> Result<ControllerRegistry, RegistryError> {
        let mut routes = HashMap::with_capacity(self.routes.len());
        for route in self.routes {
            let key = route.action_key.clone();
            if !(key.is_empty() || key.starts_with('/')) {
                return Err(RegistryError::InvalidActionKey {
                    controller: self.name,
                    action: key,
                });
            }
            if routes.insert(key.clone(), route).is_some() {
                return Err(RegistryError::DuplicateAction {
                    controller: self.name,
                    action: key,
                });
            }
        }
        Ok(ControllerRegistry {
            name: self.name,
            routes,
        })
    }
}

impl ControllerRegistry {
    #[must_use]
    pub fn builder(name: &str) -> ControllerBuilder {
        ControllerBuilder {
            name: name.to_string(),
            routes: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exact lookup on the templated action, then on its literal form.
    ///
    /// # Errors
    ///
    /// [`PipelineError::RouteNotFound`] when neither key is declared.
    pub fn lookup(&self, endpoint: &Endpoint) -> PipelineResult<&RouteDescriptor> {
        self.routes
            .get(&endpoint.action)
            .or_else(|| self.routes.get(&endpoint.literal_action()))
            .ok_or_else(|| PipelineError::RouteNotFound {
                endpoint: endpoint.to_string(),
            })
    }

    /// Routes sorted by action key.
    #[must_use]
    pub fn actions(&self) -> Vec<&RouteDescriptor> {
        let mut actions: Vec<_> = self.routes.values().collect();
        actions.sort_by(|a, b| a.action_key.cmp(&b.action_key));
        actions
    }
}

/// Every controller, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    controllers: HashMap<String, ControllerRegistry>,
}

impl Registry {
    /// # Errors
    ///
    /// [`RegistryError::DuplicateController`] when two controllers share a name.
    pub fn new(
        controllers: impl IntoIterator<Item = ControllerRegistry>,
    ) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for controller in controllers {
            let name = controller.name.clone();
            if map.insert(name.clone(), controller).is_some() {
                return Err(RegistryError::DuplicateController { name });
            }
        }
        Ok(Self { controllers: map })
    }

    /// Find the route for a parsed endpoint.
    ///
    /// # Errors
    ///
    /// [`PipelineError::RouteNotFound`] for an unknown controller or action.
    pub fn resolve(&self, endpoint: &Endpoint) -> PipelineResult<&RouteDescriptor> {
        self.controllers
            .get(&endpoint.controller)
            .ok_or_else(|| PipelineError::RouteNotFound {
                endpoint: endpoint.to_string(),
            })?
            .lookup(endpoint)
    }

    /// Controllers sorted by name.
    #[must_use]
    pub fn controllers(&self) -> Vec<&ControllerRegistry> {
        let mut controllers: Vec<_> = self.controllers.values().collect();
        controllers.sort_by(|a, b| a.name.cmp(&b.name));
        controllers
    }

    #[must_use]
    pub fn route_count(&self) -> usize {
        self.controllers.values().map(|c| c.routes.len()).sum()
    }
}

/// Directive builders for one controller's views and routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerPaths {
    controller: String,
}

impl ControllerPaths {
    #[must_use]
    pub fn new(controller: &str) -> Self {
        Self {
            controller: controller.to_string(),
        }
    }

    /// `forward:pages/<controller>/<page>.jsp`
    #[must_use]
    pub fn forward_to(&self, page: &str) -> String {
        format!("forward:pages/{}/{page}.jsp", self.controller)
    }

    /// `redirect:/api/v1/<controller>/<context>`
    #[must_use]
    pub fn redirect_to(&self, context: &str) -> String {
        format!(
            "redirect:/api/{DEFAULT_API_VERSION}/{}/{}",
            self.controller,
            context.trim_start_matches('/')
        )
    }

    /// Redirect to the detail page of one record.
    #[must_use]
    pub fn redirect_to_id(&self, id: &str) -> String {
        self.redirect_to(&format!("list/{id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(_: &Request) -> PipelineResult<Response> {
        Ok(Response::new(200))
    }

    fn category() -> ControllerRegistry {
        ControllerRegistry::builder("category")
            .route(RouteDescriptor::new("/list", ok))
            .route(RouteDescriptor::new("/list/{id}", ok))
            .route(RouteDescriptor::new("/create", ok).method(Method::POST))
            .build()
            .unwrap()
    }

    #[test]
    fn test_route_defaults() {
        let route = RouteDescriptor::new("/x", ok);
        assert_eq!(route.method, Method::GET);
        assert!(route.requires_auth);
        assert!(route.required_roles.is_empty());
        assert_eq!(route.api_version, "v1");
    }

    #[test]
    fn test_duplicate_action_rejected() {
        let err = ControllerRegistry::builder("category")
            .route(RouteDescriptor::new("/list", ok))
            .route(RouteDescriptor::new("/list", ok))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAction { .. }));
    }

    #[test]
    fn test_action_key_must_be_rooted() {
        let err = ControllerRegistry::builder("category")
            .route(RouteDescriptor::new("list", ok))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidActionKey { .. }));
    }

    #[test]
    fn test_duplicate_controller_rejected() {
        let err = Registry::new([category(), category()]).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateController {
                name: "category".into()
            }
        );
    }

    #[test]
    fn test_resolve_templated_then_literal() {
        let literal = ControllerRegistry::builder("report")
            .route(RouteDescriptor::new("/year/2024", ok))
            .build()
            .unwrap();
        let registry = Registry::new([category(), literal]).unwrap();

        let ep = Endpoint::parse("/api/v1/category/list/7").unwrap();
        assert_eq!(registry.resolve(&ep).unwrap().action_key, "/list/{id}");

        let ep = Endpoint::parse("/api/v1/report/year/2024").unwrap();
        assert_eq!(registry.resolve(&ep).unwrap().action_key, "/year/2024");
    }

    #[test]
    fn test_unknown_route_is_404() {
        let registry = Registry::new([category()]).unwrap();
        for path in ["/api/v1/category/missing", "/api/v1/nobody/list"] {
            let ep = Endpoint::parse(path).unwrap();
            assert_eq!(registry.resolve(&ep).unwrap_err().status(), 404);
        }
    }

    #[test]
    fn test_introspection_is_sorted() {
        let registry = Registry::new([category()]).unwrap();
        let keys: Vec<_> = registry.controllers()[0]
            .actions()
            .iter()
            .map(|r| r.action_key.as_str())
            .collect();
        assert_eq!(keys, ["/create", "/list", "/list/{id}"]);
        assert_eq!(registry.route_count(), 3);
    }

    struct NameArg(String);

    impl FromRequest for NameArg {
        fn from_request(req: &Request) -> PipelineResult<Self> {
            req.parameter("name")
                .map(|n| NameArg(n.to_string()))
                .ok_or_else(|| PipelineError::handler(400, "name is required"))
        }
    }

    #[test]
    fn test_typed_handler_extracts_args() {
        let route = RouteDescriptor::typed("/hello", |NameArg(name)| {
            Ok(Response::new(200).with_body(serde_json::json!(name)))
        });
        let req = Request::new("GET", "/api/v1/x/hello").with_param("name", "ana");
        assert_eq!(route.invoke(&req).unwrap().body, Some(serde_json::json!("ana")));
        let err = route.invoke(&Request::new("GET", "/")).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_controller_paths() {
        let paths = ControllerPaths::new("category");
        assert_eq!(
            paths.forward_to("listCategories"),
            "forward:pages/category/listCategories.jsp"
        );
        assert_eq!(paths.redirect_to("list"), "redirect:/api/v1/category/list");
        assert_eq!(paths.redirect_to_id("7"), "redirect:/api/v1/category/list/7");
    }
}
