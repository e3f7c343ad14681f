//! Demo controllers used by the `reqpipe` binary.
//!
//! They exist to drive the pipeline end to end; their storage is a pair of
//! in-memory maps.

pub mod category;
pub mod login;

use std::sync::Arc;

use crate::registry::{Registry, RegistryError};

pub use category::CategoryStore;
pub use login::SessionTokens;

/// Shared state behind the demo controllers.
#[derive(Debug, Clone)]
pub struct DemoApp {
    pub categories: Arc<CategoryStore>,
    pub tokens: Arc<SessionTokens>,
}

impl Default for DemoApp {
    fn default() -> Self {
        Self {
            categories: Arc::new(CategoryStore::seeded()),
            tokens: Arc::new(SessionTokens::with_demo_users()),
        }
    }
}

/// Build the registry holding every demo controller.
///
/// # Errors
///
/// A [`RegistryError`] if two routes or controllers collide.
pub fn register_all(app: &DemoApp) -> Result<Registry, RegistryError> {
    Registry::new([
        category::controller(Arc::clone(&app.categories))?,
        login::controller(Arc::clone(&app.tokens))?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all() {
        let registry = register_all(&DemoApp::default()).unwrap();
        let names: Vec<_> = registry.controllers().iter().map(|c| c.name()).collect();
        assert_eq!(names, ["category", "login"]);
        assert_eq!(registry.route_count(), 10);
    }
}
