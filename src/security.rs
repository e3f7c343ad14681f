//! # Security Module
//!
//! The pipeline never issues or verifies tokens itself. It asks a
//! [`TokenService`] two questions: is this token valid, and which roles does
//! its holder have. Implement the trait over whatever token scheme the
//! application uses; [`StaticTokenService`] is an in-memory implementation for
//! tests, demos and fixed service accounts.
//!
//! ```rust
//! use reqpipe::security::{Role, StaticTokenService, TokenService};
//!
//! let tokens = StaticTokenService::new().with_token("t-admin", [Role::Admin, Role::User]);
//! assert!(tokens.is_valid_token("t-admin"));
//! assert!(tokens.roles_for("t-admin").contains(&Role::Admin));
//! assert!(!tokens.is_valid_token("forged"));
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Roles a route can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    User,
    Moderator,
    Guest,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
            Role::Moderator => "MODERATOR",
            Role::Guest => "GUEST",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "USER" | "DEFAULT" => Ok(Role::User),
            "MODERATOR" => Ok(Role::Moderator),
            "GUEST" | "VISITOR" => Ok(Role::Guest),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Set of roles held by a caller, ordered for stable logging.
pub type RoleSet = BTreeSet<Role>;

/// External token collaborator consulted by the request validator.
pub trait TokenService: Send + Sync {
    /// `true` when the token is authentic and not expired.
    fn is_valid_token(&self, token: &str) -> bool;

    /// Roles granted to the token holder. Unknown tokens have no roles.
    fn roles_for(&self, token: &str) -> RoleSet;
}

/// Fixed token table held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenService {
    tokens: HashMap<String, RoleSet>,
}

impl StaticTokenService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token with the roles it grants.
    #[must_use]
    pub fn with_token(mut self, token: &str, roles: impl IntoIterator<Item = Role>) -> Self {
        self.insert(token, roles);
        self
    }

    pub fn insert(&mut self, token: &str, roles: impl IntoIterator<Item = Role>) {
        self.tokens
            .insert(token.to_string(), roles.into_iter().collect());
    }

    pub fn revoke(&mut self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }
}

impl TokenService for StaticTokenService {
    fn is_valid_token(&self, token: &str) -> bool {
        !token.is_empty() && self.tokens.contains_key(token)
    }

    fn roles_for(&self, token: &str) -> RoleSet {
        self.tokens.get(token).cloned().unwrap_or_default()
    }
}
