//! # Pipeline Errors
//!
//! Every stage of the dispatch pipeline returns [`PipelineResult`]. Each
//! [`PipelineError`] variant carries (or implies) the HTTP status it renders
//! with, so the outermost boundary can turn any failure into the same
//! structured error page without inspecting where it came from.

use thiserror::Error;

/// Message surfaced for handler failures that were not declared by the handler.
pub const UNEXPECTED_ERROR: &str = "An unexpected error occurred.";

/// Message surfaced when something escapes every inner boundary.
pub const SUPPORT_ERROR: &str =
    "An error occurred while processing the request. Contact the support team.";

pub const PERMISSION_ERROR: &str = "User does not have permission to access this endpoint";
pub const API_NOT_IMPLEMENTED_ERROR: &str = "API not implemented";
pub const AUTHENTICATION_REQUIRED: &str = "Authentication required.";
pub const TRY_AGAIN_LATER: &str = "Please try again later.";

/// Result alias threaded through every pipeline stage.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failure taxonomy of the dispatch pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The request path does not have the `/api/<version>/<controller>` shape.
    #[error("Malformed endpoint: {path}")]
    Parse { path: String },

    /// No controller, or no action inside the controller, matches the endpoint.
    #[error("Endpoint not found: {endpoint}")]
    RouteNotFound { endpoint: String },

    #[error("Method not allowed. Expected: {expected}, but got: {actual}")]
    MethodMismatch { expected: String, actual: String },

    #[error("{}", AUTHENTICATION_REQUIRED)]
    AuthRequired,

    #[error("{}", PERMISSION_ERROR)]
    Forbidden,

    #[error("{}", API_NOT_IMPLEMENTED_ERROR)]
    ApiVersionMismatch { expected: String, actual: String },

    /// One message per violated constraint, in declaration order.
    #[error("{}", .messages.join("\n"))]
    FieldValidationFailed { messages: Vec<String> },

    #[error("{}", TRY_AGAIN_LATER)]
    RateLimitExceeded,

    /// A handler declared a `next` directive that is not `<action>:<path>`.
    #[error("Cannot parse URL: {directive}")]
    OutcomeDirectiveMalformed { directive: String },

    /// The handler failed in a way it did not declare. `detail` is for logs only.
    #[error("{}", UNEXPECTED_ERROR)]
    UnhandledHandlerError { detail: String },

    /// A recoverable failure declared by a handler, with its own status.
    #[error("{message}")]
    HandlerFailed { status: u16, message: String },

    /// The final forward/redirect hand-off failed.
    #[error("Error processing request: {message}")]
    Transport { message: String },
}

impl PipelineError {
    /// HTTP status this error renders with.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            PipelineError::Parse { .. } => 400,
            PipelineError::RouteNotFound { .. } => 404,
            PipelineError::MethodMismatch { .. } => 405,
            PipelineError::AuthRequired => 401,
            PipelineError::Forbidden => 403,
            PipelineError::ApiVersionMismatch { .. } => 400,
            PipelineError::FieldValidationFailed { .. } => 400,
            PipelineError::RateLimitExceeded => 503,
            PipelineError::OutcomeDirectiveMalformed { .. } => 500,
            PipelineError::UnhandledHandlerError { .. } => 500,
            PipelineError::HandlerFailed { status, .. } => *status,
            PipelineError::Transport { .. } => 500,
        }
    }

    /// Shorthand for handler code that wants to fail with an explicit status.
    pub fn handler(status: u16, message: impl Into<String>) -> Self {
        PipelineError::HandlerFailed {
            status,
            message: message.into(),
        }
    }

    /// Fails with the built error when `condition` holds.
    pub fn raise_if(condition: bool, error: impl FnOnce() -> PipelineError) -> PipelineResult<()> {
        if condition {
            Err(error())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(PipelineError::Parse { path: "/x".into() }.status(), 400);
        assert_eq!(
            PipelineError::RouteNotFound {
                endpoint: "/nope".into()
            }
            .status(),
            404
        );
        assert_eq!(PipelineError::AuthRequired.status(), 401);
        assert_eq!(PipelineError::Forbidden.status(), 403);
        assert_eq!(PipelineError::RateLimitExceeded.status(), 503);
        assert_eq!(PipelineError::handler(409, "dup").status(), 409);
    }

    #[test]
    fn test_field_errors_join_with_newlines() {
        let err = PipelineError::FieldValidationFailed {
            messages: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "a\nb");
    }

    #[test]
    fn test_unhandled_error_hides_detail() {
        let err = PipelineError::UnhandledHandlerError {
            detail: "db password wrong".into(),
        };
        assert_eq!(err.to_string(), UNEXPECTED_ERROR);
    }

    #[test]
    fn test_method_mismatch_names_both_methods() {
        let err = PipelineError::MethodMismatch {
            expected: "POST".into(),
            actual: "GET".into(),
        };
        assert_eq!(
            err.to_string(),
            "Method not allowed. Expected: POST, but got: GET"
        );
    }
}
