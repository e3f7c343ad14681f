//! # Endpoint Parser
//!
//! Splits an inbound path of the form `/api/<version>/<controller>/<action...>`
//! into an [`Endpoint`]. Parsing is pure: the same path always yields the same
//! value and nothing outside the string is consulted.
//!
//! A trailing all-digit segment is lifted out as the resource id and replaced
//! by the `{id}` placeholder, so `/api/v1/category/list/7` resolves against the
//! action declared as `/list/{id}`. The literal form (`/list/7`) is kept
//! available through [`Endpoint::literal_action`] for registries that declare
//! numeric actions verbatim.

use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, PipelineResult};

/// Placeholder substituted for a numeric trailing segment.
pub const ID_PLACEHOLDER: &str = "{id}";

const API_PREFIX: &str = "api";

/// Parsed identity of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub api_version: String,
    pub controller: String,
    /// Action key with a leading `/`, e.g. `/create` or `/list/{id}`.
    pub action: String,
    pub resource_id: Option<String>,
}

impl Endpoint {
    /// Parse a request path.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] when the path does not carry at least
    /// the `api`, version and controller segments.
    pub fn parse(path: &str) -> PipelineResult<Self> {
        let path = path.split('?').next().unwrap_or_default();
        let mut segments = path.split('/').filter(|s| !s.is_empty());

        let malformed = || PipelineError::Parse {
            path: path.to_string(),
        };

        match segments.next() {
            Some(prefix) if prefix == API_PREFIX => {}
            _ => return Err(malformed()),
        }
        let api_version = segments.next().ok_or_else(malformed)?.to_string();
        let controller = segments.next().ok_or_else(malformed)?.to_string();

        let mut rest: Vec<&str> = segments.collect();
        let resource_id = match rest.last() {
            Some(last) if rest.len() > 1 && is_numeric(last) => {
                let id = (*last).to_string();
                if let Some(slot) = rest.last_mut() {
                    *slot = ID_PLACEHOLDER;
                }
                Some(id)
            }
            _ => None,
        };

        let action = if rest.is_empty() {
            String::new()
        } else {
            format!("/{}", rest.join("/"))
        };

        Ok(Endpoint {
            api_version,
            controller,
            action,
            resource_id,
        })
    }

    /// The action with the resource id put back in place of the placeholder.
    #[must_use]
    pub fn literal_action(&self) -> String {
        match &self.resource_id {
            Some(id) => self.action.replacen(ID_PLACEHOLDER, id, 1),
            None => self.action.clone(),
        }
    }

    /// True when the action names a logout, which ends the session.
    #[must_use]
    pub fn is_logout(&self, marker: &str) -> bool {
        self.action.contains(marker)
    }
}

impl FromStr for Endpoint {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{API_PREFIX}/{}/{}{}",
            self.api_version,
            self.controller,
            self.literal_action()
        )
    }
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_with_id() {
        let ep = Endpoint::parse("/api/v1/category/list/7").unwrap();
        assert_eq!(ep.api_version, "v1");
        assert_eq!(ep.controller, "category");
        assert_eq!(ep.action, "/list/{id}");
        assert_eq!(ep.resource_id.as_deref(), Some("7"));
        assert_eq!(ep.literal_action(), "/list/7");
    }

    #[test]
    fn test_parse_plain_action() {
        let ep = Endpoint::parse("/api/v2/product/create").unwrap();
        assert_eq!(ep.api_version, "v2");
        assert_eq!(ep.controller, "product");
        assert_eq!(ep.action, "/create");
        assert!(ep.resource_id.is_none());
    }

    #[test]
    fn test_parse_nested_action_keeps_segments() {
        let ep = Endpoint::parse("/api/v1/inventory/delete/item/42").unwrap();
        assert_eq!(ep.action, "/delete/item/{id}");
        assert_eq!(ep.resource_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_numeric_action_alone_is_not_an_id() {
        let ep = Endpoint::parse("/api/v1/category/42").unwrap();
        assert_eq!(ep.action, "/42");
        assert!(ep.resource_id.is_none());
    }

    #[test]
    fn test_controller_only_has_empty_action() {
        let ep = Endpoint::parse("/api/v1/category").unwrap();
        assert_eq!(ep.action, "");
    }

    #[test]
    fn test_query_string_is_ignored() {
        let ep = Endpoint::parse("/api/v1/category/list?page=2").unwrap();
        assert_eq!(ep.action, "/list");
    }

    #[test]
    fn test_too_few_segments_fails() {
        for path in ["", "/", "/api", "/api/v1", "/x/v1/category"] {
            let err = Endpoint::parse(path).unwrap_err();
            assert_eq!(err.status(), 400, "path {path:?}");
        }
    }

    #[test]
    fn test_parse_is_idempotent() {
        let paths = [
            "/api/v1/category/list/7",
            "/api/v1/user/update/3",
            "/api/v1/login/logout",
            "/api/v9/x/y/z",
        ];
        for path in paths {
            let first = Endpoint::parse(path).unwrap();
            let second = Endpoint::parse(path).unwrap();
            assert_eq!(first, second);
            let reparsed = Endpoint::parse(&first.to_string()).unwrap();
            assert_eq!(first, reparsed);
        }
    }

    #[test]
    fn test_logout_detection() {
        let ep: Endpoint = "/api/v1/login/logout".parse().unwrap();
        assert!(ep.is_logout("logout"));
        let ep: Endpoint = "/api/v1/login/form".parse().unwrap();
        assert!(!ep.is_logout("logout"));
    }
}
