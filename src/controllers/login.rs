// Demo controller for session login/logout, with an in-memory token table.

use std::sync::Arc;

use dashmap::DashMap;
use http::Method;
use serde::Serialize;

use crate::constraints::{Constraint, FieldRule};
use crate::error::PipelineError;
use crate::registry::{ControllerPaths, ControllerRegistry, RegistryError, RouteDescriptor};
use crate::request::Response;
use crate::security::{Role, RoleSet, TokenService};

pub const NAME: &str = "login";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DemoUser {
    pub login: String,
    #[serde(skip)]
    password: String,
    pub roles: RoleSet,
}

/// Issues opaque ULID tokens for known users and answers token checks.
#[derive(Debug, Default)]
pub struct SessionTokens {
    users: DashMap<String, DemoUser>,
    sessions: DashMap<String, RoleSet>,
}

impl SessionTokens {
    /// Two accounts: an administrator and a regular user.
    #[must_use]
    pub fn with_demo_users() -> Self {
        let tokens = Self::default();
        tokens.add_user("admin@example.com", "admin123", [Role::Admin, Role::User]);
        tokens.add_user("ana@example.com", "secret12", [Role::User]);
        tokens
    }

    pub fn add_user(&self, login: &str, password: &str, roles: impl IntoIterator<Item = Role>) {
        self.users.insert(
            login.to_lowercase(),
            DemoUser {
                login: login.to_string(),
                password: password.to_string(),
                roles: roles.into_iter().collect(),
            },
        );
    }

    /// Check credentials and open a session.
    pub fn login(&self, login: &str, password: &str) -> Option<(String, DemoUser)> {
        let user = self
            .users
            .get(&login.to_lowercase())
            .filter(|u| u.password == password)
            .map(|u| u.value().clone())?;
        let token = ulid::Ulid::new().to_string();
        self.sessions.insert(token.clone(), user.roles.clone());
        Some((token, user))
    }

    /// Open a session for a fixed token, for seeding replays and tests.
    pub fn grant(&self, token: &str, roles: impl IntoIterator<Item = Role>) {
        self.sessions
            .insert(token.to_string(), roles.into_iter().collect());
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }
}

impl TokenService for SessionTokens {
    fn is_valid_token(&self, token: &str) -> bool {
        self.sessions.contains_key(token)
    }

    fn roles_for(&self, token: &str) -> RoleSet {
        self.sessions
            .get(token)
            .map(|roles| roles.value().clone())
            .unwrap_or_default()
    }
}

/// Build the `login` controller over `tokens`.
///
/// # Errors
///
/// Only on a duplicate action key.
pub fn controller(tokens: Arc<SessionTokens>) -> Result<ControllerRegistry, RegistryError> {
    let paths = ControllerPaths::new(NAME);

    let p = paths.clone();
    let form = RouteDescriptor::new("/form", move |_| {
        Ok(Response::new(200).with_next(p.forward_to("formLogin")))
    })
    .public();

    let t = Arc::clone(&tokens);
    let login = RouteDescriptor::new("/login", move |req| {
        let login = req.parameter("login").unwrap_or_default();
        let password = req.parameter("password").unwrap_or_default();
        let (token, user) = t
            .login(login, password)
            .ok_or_else(|| PipelineError::handler(401, "Invalid login or password"))?;
        Response::new(200)
            .with_json(&serde_json::json!({ "token": token, "user": user }))
            .map(|r| r.with_next("redirect:/api/v1/category/list"))
    })
    .method(Method::POST)
    .public()
    .field(FieldRule::new("login").with(Constraint::email("Login must be a valid e-mail address")))
    .field(
        FieldRule::new("password")
            .with(Constraint::min_length(6, "Password must be at least {0} characters")),
    );

    let t = tokens;
    let logout = RouteDescriptor::new("/logout", move |req| {
        if let Some(token) = req.token.as_deref() {
            t.revoke(token);
        }
        Ok(Response::new(200).with_next(paths.redirect_to("form")))
    });

    ControllerRegistry::builder(NAME)
        .route(form)
        .route(login)
        .route(logout)
        .build()
}
