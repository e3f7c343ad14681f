//! # Transport Seam
//!
//! The pipeline does not own a network server. It reads the inbound call
//! through [`TransportRequest`], writes its single outcome through
//! [`TransportResponse`] and delegates internal forwards to a
//! [`ViewRenderer`]. Any HTTP stack can sit behind these traits.
//!
//! The `Memory*` types are complete in-memory implementations used by the
//! replay command and the test suite.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::request::KeyPair;

/// Attribute store a value is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Lives for the current request only; read by view templates.
    Request,
    /// Lives across requests of the same client until invalidated.
    Session,
}

/// Inbound side of the transport.
pub trait TransportRequest {
    fn method(&self) -> &str;

    /// Request path without the context prefix or query string.
    fn path(&self) -> &str;

    fn query_string(&self) -> Option<&str>;

    /// Form and query parameters in arrival order.
    fn parameters(&self) -> &[KeyPair];

    /// Deployment prefix prepended to absolute asset links.
    fn context_path(&self) -> &str {
        ""
    }

    fn attribute(&self, scope: Scope, key: &str) -> Option<&Value>;

    fn set_attribute(&mut self, scope: Scope, key: &str, value: Value);

    /// Every request-scoped attribute, used as a template context.
    fn request_attributes(&self) -> Map<String, Value>;

    fn invalidate_session(&mut self);
}

/// Outbound side of the transport.
pub trait TransportResponse {
    fn set_status(&mut self, status: u16);

    fn set_content_type(&mut self, content_type: &str);

    /// # Errors
    ///
    /// Fails when the underlying connection refuses the body.
    fn write_body(&mut self, body: &str) -> anyhow::Result<()>;

    /// Issue a 3xx redirect to `location`.
    ///
    /// # Errors
    ///
    /// Fails when the response was already committed.
    fn send_redirect(&mut self, location: &str) -> anyhow::Result<()>;

    /// Called with the resolved view name just before an internal forward.
    fn mark_forwarded(&mut self, _view: &str) {}

    /// Drop whatever has been buffered so far. Transports that stream the
    /// body straight to the connection keep the default no-op.
    fn reset(&mut self) {}
}

/// Renders the view named by a `forward:` directive.
pub trait ViewRenderer: Send + Sync {
    /// # Errors
    ///
    /// Any rendering or write failure; the caller reports it as a 500.
    fn forward(
        &self,
        view: &str,
        request: &dyn TransportRequest,
        response: &mut dyn TransportResponse,
    ) -> anyhow::Result<()>;
}

/// Session attribute map plus its invalidation flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemorySession {
    pub attributes: BTreeMap<String, Value>,
    pub invalidated: bool,
}

/// In-memory inbound request.
#[derive(Debug, Clone, Default)]
pub struct MemoryRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub parameters: Vec<KeyPair>,
    pub context_path: String,
    pub attributes: Map<String, Value>,
    pub session: MemorySession,
}

impl MemoryRequest {
    #[must_use]
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.parameters.push(KeyPair::new(key, value));
        self
    }

    /// Start from a logged-in session holding `token`.
    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.session
            .attributes
            .insert("token".to_string(), Value::String(token.to_string()));
        self
    }

    #[must_use]
    pub fn with_context_path(mut self, context_path: &str) -> Self {
        self.context_path = context_path.to_string();
        self
    }
}

impl TransportRequest for MemoryRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn parameters(&self) -> &[KeyPair] {
        &self.parameters
    }

    fn context_path(&self) -> &str {
        &self.context_path
    }

    fn attribute(&self, scope: Scope, key: &str) -> Option<&Value> {
        match scope {
            Scope::Request => self.attributes.get(key),
            Scope::Session if self.session.invalidated => None,
            Scope::Session => self.session.attributes.get(key),
        }
    }

    fn set_attribute(&mut self, scope: Scope, key: &str, value: Value) {
        match scope {
            Scope::Request => {
                self.attributes.insert(key.to_string(), value);
            }
            Scope::Session => {
                self.session.attributes.insert(key.to_string(), value);
            }
        }
    }

    fn request_attributes(&self) -> Map<String, Value> {
        self.attributes.clone()
    }

    fn invalidate_session(&mut self) {
        self.session.attributes.clear();
        self.session.invalidated = true;
    }
}

/// In-memory outbound response. `status` stays `None` until the pipeline sets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryResponse {
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub body: String,
    pub redirect: Option<String>,
    pub forwarded: Option<String>,
}

impl MemoryResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportResponse for MemoryResponse {
    fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = Some(content_type.to_string());
    }

    fn write_body(&mut self, body: &str) -> anyhow::Result<()> {
        self.body.push_str(body);
        Ok(())
    }

    fn send_redirect(&mut self, location: &str) -> anyhow::Result<()> {
        if self.redirect.is_some() {
            anyhow::bail!("response already redirected to {location}");
        }
        self.redirect = Some(location.to_string());
        self.status = Some(302);
        Ok(())
    }

    fn mark_forwarded(&mut self, view: &str) {
        self.forwarded = Some(view.to_string());
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// View renderer that writes the request attributes as JSON instead of a page.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoViews;

impl ViewRenderer for EchoViews {
    fn forward(
        &self,
        view: &str,
        request: &dyn TransportRequest,
        response: &mut dyn TransportResponse,
    ) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "view": view,
            "attributes": Value::Object(request.request_attributes()),
        });
        response.set_content_type("application/json");
        response.write_body(&serde_json::to_string(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_invalidation_hides_attributes() {
        let mut req = MemoryRequest::new("get", "/api/v1/login/logout").with_token("abc");
        assert_eq!(req.method(), "GET");
        assert_eq!(
            req.attribute(Scope::Session, "token"),
            Some(&Value::String("abc".into()))
        );
        req.invalidate_session();
        assert!(req.attribute(Scope::Session, "token").is_none());
        assert!(req.session.invalidated);
    }

    #[test]
    fn test_double_redirect_fails() {
        let mut res = MemoryResponse::new();
        res.send_redirect("/a").unwrap();
        assert_eq!(res.status, Some(302));
        assert!(res.send_redirect("/b").is_err());
        assert_eq!(res.redirect.as_deref(), Some("/a"));
    }

    #[test]
    fn test_reset_clears_buffered_output() {
        let mut res = MemoryResponse::new();
        res.set_status(200);
        res.set_content_type("text/plain");
        res.mark_forwarded("/WEB-INF/view/pages/x.jsp");
        res.write_body("half a page").unwrap();
        res.reset();
        assert_eq!(res, MemoryResponse::new());
    }

    #[test]
    fn test_echo_views_writes_attributes() {
        let mut req = MemoryRequest::new("GET", "/api/v1/category/list");
        req.set_attribute(Scope::Request, "name", Value::String("Books".into()));
        let mut res = MemoryResponse::new();
        EchoViews
            .forward("/WEB-INF/view/pages/list.jsp", &req, &mut res)
            .unwrap();
        let body: Value = serde_json::from_str(&res.body).unwrap();
        assert_eq!(body["view"], "/WEB-INF/view/pages/list.jsp");
        assert_eq!(body["attributes"]["name"], "Books");
    }
}
