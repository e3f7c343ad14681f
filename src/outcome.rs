//! # Outcome Processor
//!
//! Turns the final [`Response`] of a dispatch into writes on the transport:
//!
//! 1. A POST whose body carries a `token` field logs the caller in: the token
//!    and user are stored in the session.
//! 2. Every request parameter, and the response itself, become request
//!    attributes for the view.
//! 3. An errored response renders the error page; otherwise only the status
//!    is set.
//! 4. A logout action invalidates the session.
//! 5. The `next` directive (`<action>:<path>`) is forwarded to a view
//!    (`forward`, any case) or redirected to. It is parsed before step 3, so
//!    a malformed directive leaves the response untouched.
//!
//! Every failure path of the pipeline ends in [`ErrorPage`], so callers see
//! one consistent page whatever went wrong.

use minijinja::{context, Environment};
use serde_json::Value;
use tracing::{debug, error};

use crate::config::PipelineConfig;
use crate::endpoint::Endpoint;
use crate::error::{PipelineError, PipelineResult};
use crate::request::{Request, Response};
use crate::status::status_text;
use crate::transport::{Scope, TransportRequest, TransportResponse, ViewRenderer};

const ERROR_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>{{ status }} {{ subtitle }}</title>
</head>
<body>
<main class="error-page">
<h1>{{ status }}</h1>
<h2>{{ subtitle }}</h2>
<p>{{ message }}</p>
<img src="{{ image }}" alt="{{ subtitle }}">
</main>
</body>
</html>
"#;

/// Parsed `next` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Forward(String),
    Redirect(String),
}

impl Directive {
    /// Split `<action>:<path>`; anything but `forward` redirects.
    ///
    /// # Errors
    ///
    /// [`PipelineError::OutcomeDirectiveMalformed`] unless the directive has
    /// exactly one `:` followed by a non-empty path.
    pub fn parse(next: &str) -> PipelineResult<Self> {
        let parts: Vec<&str> = next.split(':').collect();
        let [action, path] = parts.as_slice() else {
            return Err(PipelineError::OutcomeDirectiveMalformed {
                directive: next.to_string(),
            });
        };
        if path.is_empty() {
            return Err(PipelineError::OutcomeDirectiveMalformed {
                directive: next.to_string(),
            });
        }
        if action.eq_ignore_ascii_case("forward") {
            Ok(Directive::Forward((*path).to_string()))
        } else {
            Ok(Directive::Redirect((*path).to_string()))
        }
    }
}

/// Structured HTML error page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPage {
    pub status: u16,
    pub subtitle: &'static str,
    pub message: String,
    pub image: String,
}

impl ErrorPage {
    #[must_use]
    pub fn new(status: u16, message: &str, context_path: &str, image_name: &str) -> Self {
        Self {
            status,
            subtitle: status_text(status),
            message: message.to_string(),
            image: format!("{context_path}/resources/assets/images/{image_name}"),
        }
    }

    /// # Errors
    ///
    /// Fails only if the embedded template does not compile or render.
    pub fn render(&self) -> Result<String, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("error.html", ERROR_TEMPLATE)?;
        let tmpl = env.get_template("error.html")?;
        tmpl.render(context! {
            status => self.status,
            subtitle => self.subtitle,
            message => self.message,
            image => self.image,
        })
    }

    /// Write the page as the whole response, replacing anything buffered
    /// before it. Write failures are logged.
    pub fn write_to(&self, res: &mut dyn TransportResponse) {
        res.reset();
        res.set_status(self.status);
        res.set_content_type("text/html; charset=UTF-8");
        let html = match self.render() {
            Ok(html) => html,
            Err(e) => {
                error!(error = %e, "error page template failed");
                format!("{} {}: {}", self.status, self.subtitle, self.message)
            }
        };
        if let Err(e) = res.write_body(&html) {
            error!(status = self.status, error = %e, "failed to write error page");
        }
    }
}

/// Applies a handler's declared outcome to the transport.
pub struct OutcomeProcessor<'a> {
    config: &'a PipelineConfig,
    views: &'a dyn ViewRenderer,
}

impl<'a> OutcomeProcessor<'a> {
    #[must_use]
    pub fn new(config: &'a PipelineConfig, views: &'a dyn ViewRenderer) -> Self {
        Self { config, views }
    }

    /// # Errors
    ///
    /// A malformed directive (500), checked before anything is written to
    /// `res`, or a failed forward/redirect hand-off (500).
    pub fn process(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        response: &Response,
        req: &mut dyn TransportRequest,
        res: &mut dyn TransportResponse,
    ) -> PipelineResult<()> {
        propagate_login(request, response, req);
        propagate_attributes(request, response, req);

        // nothing is written until the directive is known to be usable
        let directive = response.next.as_deref().map(Directive::parse).transpose()?;

        let errored = response.has_errors();
        if errored {
            let message = response.error_message().unwrap_or_default();
            self.render_error(response.status_code, &message, req, res);
        } else {
            res.set_status(response.status_code);
        }

        if endpoint.is_logout(&self.config.logout_marker) {
            debug!(endpoint = %endpoint, "invalidating session");
            req.invalidate_session();
        }

        let Some(directive) = directive else {
            return Ok(());
        };
        if errored {
            debug!(?directive, "error page already written, directive skipped");
            return Ok(());
        }

        match directive {
            Directive::Forward(path) => {
                let view = format!("{}{}", self.config.view_prefix, path);
                debug!(view = %view, "forwarding");
                res.mark_forwarded(&view);
                self.views
                    .forward(&view, &*req, res)
                    .map_err(|e| PipelineError::Transport {
                        message: e.to_string(),
                    })
            }
            Directive::Redirect(path) => {
                debug!(location = %path, "redirecting");
                res.send_redirect(&path)
                    .map_err(|e| PipelineError::Transport {
                        message: e.to_string(),
                    })
            }
        }
    }

    /// Render the error page with the configured image.
    pub fn render_error(
        &self,
        status: u16,
        message: &str,
        req: &dyn TransportRequest,
        res: &mut dyn TransportResponse,
    ) {
        ErrorPage::new(status, message, req.context_path(), &self.config.error_image).write_to(res);
    }
}

fn propagate_login(request: &Request, response: &Response, req: &mut dyn TransportRequest) {
    if !request.method.eq_ignore_ascii_case("POST") {
        return;
    }
    let Some(body) = response.body.as_ref().and_then(Value::as_object) else {
        return;
    };
    let Some(token) = body.get("token").and_then(Value::as_str) else {
        return;
    };
    let user = body
        .get("user")
        .cloned()
        .unwrap_or_else(|| Value::Object(body.clone()));
    req.set_attribute(Scope::Session, "token", Value::String(token.to_string()));
    req.set_attribute(Scope::Session, "user", user);
    debug!(endpoint = %request.endpoint, "session established");
}

fn propagate_attributes(request: &Request, response: &Response, req: &mut dyn TransportRequest) {
    for kp in &request.body {
        req.set_attribute(Scope::Request, &kp.key, Value::String(kp.value.clone()));
    }
    let value = serde_json::to_value(response).unwrap_or(Value::Null);
    req.set_attribute(Scope::Request, "response", value);
}
