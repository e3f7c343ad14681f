//! # Request Validator
//!
//! Checks a request against its route before the handler runs, in a fixed
//! order: method, authentication, roles, API version, then field
//! constraints. The first four short-circuit; the field stage collects the
//! messages of every rule so the caller sees all of them at once.

use tracing::debug;

use crate::constraints;
use crate::endpoint::Endpoint;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::RouteDescriptor;
use crate::request::Request;
use crate::security::TokenService;

/// Validates requests against route metadata using a token service.
pub struct RequestValidator<'a> {
    tokens: &'a dyn TokenService,
}

impl<'a> RequestValidator<'a> {
    #[must_use]
    pub fn new(tokens: &'a dyn TokenService) -> Self {
        Self { tokens }
    }

    /// # Errors
    ///
    /// The first failing check, as a [`PipelineError`] carrying its status.
    pub fn validate(
        &self,
        endpoint: &Endpoint,
        route: &RouteDescriptor,
        request: &Request,
    ) -> PipelineResult<()> {
        check_method(route, request)?;
        self.check_auth(route, request)?;
        self.check_roles(route, request)?;
        check_api_version(endpoint, route)?;
        check_fields(route, request)
    }

    fn check_auth(&self, route: &RouteDescriptor, request: &Request) -> PipelineResult<()> {
        if !route.requires_auth {
            return Ok(());
        }
        let valid = request
            .token
            .as_deref()
            .is_some_and(|t| !t.is_empty() && self.tokens.is_valid_token(t));
        PipelineError::raise_if(!valid, || PipelineError::AuthRequired)
    }

    fn check_roles(&self, route: &RouteDescriptor, request: &Request) -> PipelineResult<()> {
        if route.required_roles.is_empty() {
            return Ok(());
        }
        let held = request
            .token
            .as_deref()
            .map(|t| self.tokens.roles_for(t))
            .unwrap_or_default();
        let allowed = route.required_roles.is_subset(&held);
        if !allowed {
            debug!(
                action = %route.action_key,
                required = ?route.required_roles,
                held = ?held,
                "role check failed"
            );
        }
        PipelineError::raise_if(!allowed, || PipelineError::Forbidden)
    }
}

fn check_method(route: &RouteDescriptor, request: &Request) -> PipelineResult<()> {
    let matches = route.method.as_str().eq_ignore_ascii_case(&request.method);
    PipelineError::raise_if(!matches, || PipelineError::MethodMismatch {
        expected: route.method.to_string(),
        actual: request.method.clone(),
    })
}

fn check_api_version(endpoint: &Endpoint, route: &RouteDescriptor) -> PipelineResult<()> {
    PipelineError::raise_if(route.api_version != endpoint.api_version, || {
        PipelineError::ApiVersionMismatch {
            expected: route.api_version.clone(),
            actual: endpoint.api_version.clone(),
        }
    })
}

fn check_fields(route: &RouteDescriptor, request: &Request) -> PipelineResult<()> {
    let messages: Vec<String> = route
        .field_validators
        .iter()
        .flat_map(|rule| constraints::validate(request.parameter(&rule.field_name), &rule.constraints))
        .collect();
    PipelineError::raise_if(!messages.is_empty(), || {
        PipelineError::FieldValidationFailed { messages }
    })
}
