//! # Pipeline Request and Response
//!
//! [`Request`] is the internal, transport-independent view of one inbound
//! call. It is built once by [`Request::from_transport`] and then only read.
//! [`Response`] is what a handler declares: a status, an optional body, an
//! optional `next` directive (`forward:<path>` or `redirect:<path>`) and an
//! optional set of error messages.
//!
//! Parameters live in a [`BodyVec`], a `SmallVec` that keeps the usual
//! handful of form fields off the heap.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::config::{PaginationDefaults, PipelineConfig};
use crate::endpoint::Endpoint;
use crate::error::{PipelineError, PipelineResult};
use crate::transport::{Scope, TransportRequest};

/// Parameters kept inline before spilling to the heap.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Request parameters in arrival order.
pub type BodyVec = SmallVec<[KeyPair; MAX_INLINE_PARAMS]>;

/// Parameter names whose values never reach the logs.
const REDACTED_PARAMS: [&str; 3] = ["password", "token", "confirmpassword"];

/// One request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub key: String,
    pub value: String,
}

impl KeyPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Anything but `desc` sorts ascending.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// 1-based page selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub sort: Sort,
}

impl PageRequest {
    #[must_use]
    pub fn from_defaults(defaults: &PaginationDefaults) -> Self {
        Self {
            page: defaults.page.max(1),
            size: defaults.limit.max(1),
            sort: Sort {
                field: defaults.sort.clone(),
                direction: SortDirection::parse(&defaults.order),
            },
        }
    }

    /// Number of records skipped before this page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.size)
    }
}

/// Pagination and search parsed from the query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub page_request: PageRequest,
    /// `q`: free-text search, URL-decoded.
    pub search: Option<String>,
    /// `k`: which field the search applies to.
    pub kind: Option<String>,
}

impl Query {
    /// Parse `page`, `limit`, `sort`, `order`, `q` and `k`.
    ///
    /// Never fails: malformed numbers fall back to the defaults, and numeric
    /// values are taken as absolute values clamped to at least 1.
    #[must_use]
    pub fn parse(query_string: Option<&str>, defaults: &PaginationDefaults) -> Self {
        let mut page_request = PageRequest::from_defaults(defaults);
        let mut search = None;
        let mut kind = None;

        let Some(qs) = query_string.filter(|q| !q.is_empty()) else {
            return Query {
                page_request,
                search,
                kind,
            };
        };

        for (key, value) in url::form_urlencoded::parse(qs.trim_start_matches('?').as_bytes()) {
            match key.as_ref() {
                "page" => {
                    if let Some(n) = parse_positive(&value) {
                        page_request.page = n;
                    }
                }
                "limit" => {
                    if let Some(n) = parse_positive(&value) {
                        page_request.size = n;
                    }
                }
                "sort" if !value.trim().is_empty() => {
                    page_request.sort.field = value.trim().to_string();
                }
                "order" if !value.trim().is_empty() => {
                    page_request.sort.direction = SortDirection::parse(&value);
                }
                "q" if !value.trim().is_empty() => search = Some(value.trim().to_string()),
                "k" if !value.trim().is_empty() => kind = Some(value.trim().to_string()),
                _ => {}
            }
        }

        Query {
            page_request,
            search,
            kind,
        }
    }
}

impl Default for Query {
    fn default() -> Self {
        Query::parse(None, &PaginationDefaults::default())
    }
}

fn parse_positive(value: &str) -> Option<u32> {
    let n = value.trim().parse::<i64>().ok()?.unsigned_abs();
    Some(u32::try_from(n).unwrap_or(u32::MAX).max(1))
}

/// Internal request handed to validators and handlers.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Path the request arrived on, e.g. `/api/v1/category/list/7`.
    pub endpoint: String,
    /// Upper-case HTTP method.
    pub method: String,
    pub body: BodyVec,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub query: Query,
    /// Retries granted after the first attempt.
    pub retry: u32,
}

impl Request {
    #[must_use]
    pub fn new(method: &str, endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            method: method.to_ascii_uppercase(),
            body: BodyVec::new(),
            token: None,
            query: Query::default(),
            retry: 0,
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.body.push(KeyPair::new(key, value));
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    /// Build the internal request from the transport.
    ///
    /// The token comes from the session, parameters keep their arrival order,
    /// and a numeric trailing path segment is added as `id` unless the caller
    /// already sent an `id` parameter.
    pub fn from_transport(req: &dyn TransportRequest, config: &PipelineConfig) -> Self {
        let mut body: BodyVec = req.parameters().iter().cloned().collect();

        let has_id = body.iter().any(|kp| kp.key.eq_ignore_ascii_case("id"));
        if !has_id {
            if let Some(id) = Endpoint::parse(req.path())
                .ok()
                .and_then(|ep| ep.resource_id)
            {
                body.push(KeyPair::new("id", id));
            }
        }

        let token = req
            .attribute(Scope::Session, "token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Request {
            endpoint: req.path().to_string(),
            method: req.method().to_ascii_uppercase(),
            body,
            token,
            query: Query::parse(req.query_string(), &config.pagination),
            retry: config.default_retry,
        }
    }

    /// Trimmed value of the first parameter whose name matches, ignoring case.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.body
            .iter()
            .find(|kp| kp.key.eq_ignore_ascii_case(name))
            .map(|kp| kp.value.trim())
    }

    /// Resource id: the `id` parameter, else the numeric trailing path segment.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.parameter("id")
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| Endpoint::parse(&self.endpoint).ok()?.resource_id)
    }

    /// Parameters safe to log, with secrets masked.
    #[must_use]
    pub fn loggable_params(&self) -> Vec<(String, String)> {
        self.body
            .iter()
            .map(|kp| {
                let lower = kp.key.to_ascii_lowercase();
                let value = if REDACTED_PARAMS.contains(&lower.as_str()) {
                    "***".to_string()
                } else {
                    kp.value.clone()
                };
                (kp.key.clone(), value)
            })
            .collect()
    }
}

/// Outcome declared by a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeSet<String>>,
}

impl Default for Response {
    fn default() -> Self {
        Response::new(200)
    }
}

impl Response {
    #[must_use]
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            body: None,
            next: None,
            errors: None,
        }
    }

    /// 200 with a body and a `next` directive.
    pub fn ok(body: Value, next: impl Into<String>) -> Self {
        Response::new(200).with_body(body).with_next(next)
    }

    /// Body-less response with an explicit status and directive.
    pub fn with_status(status_code: u16, next: impl Into<String>) -> Self {
        Response::new(status_code).with_next(next)
    }

    /// Error response carrying a single message.
    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        let mut response = Response::new(status_code);
        response.errors = Some(BTreeSet::from([message.into()]));
        response
    }

    /// Error response for a pipeline failure, using its status and message.
    #[must_use]
    pub fn from_error(error: &PipelineError) -> Self {
        Response::error(error.status(), error.to_string())
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` into the response.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnhandledHandlerError`] when the value does
    /// not serialize.
    pub fn with_json<T: Serialize>(self, body: &T) -> PipelineResult<Self> {
        let value =
            serde_json::to_value(body).map_err(|e| PipelineError::UnhandledHandlerError {
                detail: e.to_string(),
            })?;
        Ok(self.with_body(value))
    }

    #[must_use]
    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// True for a non-empty error set: the retry signal.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// All error messages joined with `", "`.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.errors
            .as_ref()
            .filter(|e| !e.is_empty())
            .map(|e| e.iter().cloned().collect::<Vec<_>>().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryRequest;

    #[test]
    fn test_query_defaults_without_query_string() {
        let q = Query::parse(None, &PaginationDefaults::default());
        assert_eq!(q.page_request.page, 1);
        assert_eq!(q.page_request.size, 1);
        assert_eq!(q.page_request.sort.field, "id");
        assert_eq!(q.page_request.sort.direction, SortDirection::Asc);
        assert!(q.search.is_none());
    }

    #[test]
    fn test_query_parses_pagination_and_search() {
        let q = Query::parse(
            Some("page=-3&limit=25&sort=name&order=DESC&q=red%20shoes&k=name"),
            &PaginationDefaults::default(),
        );
        assert_eq!(q.page_request.page, 3);
        assert_eq!(q.page_request.size, 25);
        assert_eq!(q.page_request.sort.field, "name");
        assert_eq!(q.page_request.sort.direction, SortDirection::Desc);
        assert_eq!(q.search.as_deref(), Some("red shoes"));
        assert_eq!(q.kind.as_deref(), Some("name"));
        assert_eq!(q.page_request.offset(), 50);
    }

    #[test]
    fn test_query_garbage_numbers_fall_back() {
        let q = Query::parse(Some("page=abc&limit=0"), &PaginationDefaults::default());
        assert_eq!(q.page_request.page, 1);
        assert_eq!(q.page_request.size, 1);
    }

    #[test]
    fn test_parameter_is_case_insensitive_and_trimmed() {
        let req = Request::new("post", "/api/v1/category/create").with_param("Name", "  Books ");
        assert_eq!(req.method, "POST");
        assert_eq!(req.parameter("name"), Some("Books"));
        assert_eq!(req.parameter("missing"), None);
    }

    #[test]
    fn test_id_prefers_parameter_then_path() {
        let req = Request::new("GET", "/api/v1/category/list/7");
        assert_eq!(req.id().as_deref(), Some("7"));
        let req = req.with_param("id", "9");
        assert_eq!(req.id().as_deref(), Some("9"));
    }

    #[test]
    fn test_from_transport() {
        let transport = MemoryRequest::new("get", "/api/v1/category/list/7")
            .with_query("page=2")
            .with_param("name", "x")
            .with_token("tok");
        let req = Request::from_transport(&transport, &PipelineConfig::default());
        assert_eq!(req.method, "GET");
        assert_eq!(req.token.as_deref(), Some("tok"));
        assert_eq!(req.retry, 1);
        assert_eq!(req.query.page_request.page, 2);
        assert_eq!(req.parameter("id"), Some("7"));
        assert_eq!(req.body.len(), 2);
    }

    #[test]
    fn test_secrets_are_masked_for_logs() {
        let req = Request::new("POST", "/api/v1/login/login")
            .with_param("login", "ana")
            .with_param("Password", "hunter2");
        let params = req.loggable_params();
        assert_eq!(params[0].1, "ana");
        assert_eq!(params[1].1, "***");
    }

    #[test]
    fn test_response_error_signal() {
        assert!(!Response::ok(Value::Null, "forward:pages/x.jsp").has_errors());
        let mut r = Response::new(200);
        r.errors = Some(BTreeSet::new());
        assert!(!r.has_errors());
        let r = Response::from_error(&PipelineError::Forbidden);
        assert_eq!(r.status_code, 403);
        assert!(r.error_message().unwrap().contains("permission"));
    }

    #[test]
    fn test_error_message_joins_with_comma() {
        let mut r = Response::error(400, "b");
        if let Some(errors) = r.errors.as_mut() {
            errors.insert("a".into());
        }
        assert_eq!(r.error_message().as_deref(), Some("a, b"));
    }
}
