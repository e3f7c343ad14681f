//! # Pipeline Configuration
//!
//! [`PipelineConfig`] gathers every tunable of the dispatch pipeline. All
//! fields have defaults, so an empty TOML document and an empty environment
//! both produce a working configuration.
//!
//! ## Sources
//!
//! 1. Defaults (see the field docs).
//! 2. A TOML file, via [`PipelineConfig::load`].
//! 3. `REQPIPE_*` environment variables, via [`PipelineConfig::with_env_overrides`].
//!    Unparseable values are ignored and the previous value is kept.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `REQPIPE_RATE_LIMIT_ENABLED` | `rate_limit_enabled` |
//! | `REQPIPE_RATE_LIMIT_WAIT_MS` | `rate_limit_wait_ms` |
//! | `REQPIPE_BUCKET_MAX_TOKENS` | `bucket.max_tokens` |
//! | `REQPIPE_BUCKET_REFILL_AMOUNT` | `bucket.refill_amount` |
//! | `REQPIPE_BUCKET_REFILL_INTERVAL_MS` | `bucket.refill_interval_ms` |
//! | `REQPIPE_DEFAULT_RETRY` | `default_retry` |
//! | `REQPIPE_VIEW_PREFIX` | `view_prefix` |
//! | `REQPIPE_ERROR_IMAGE` | `error_image` |
//!
//! ```toml
//! rate_limit_enabled = true
//! rate_limit_wait_ms = 600
//! default_retry = 1
//!
//! [bucket]
//! max_tokens = 10
//! refill_amount = 5
//! refill_interval_ms = 1000
//!
//! [pagination]
//! page = 1
//! limit = 10
//! ```

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Leaky bucket sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Capacity and initial fill (default: 10)
    pub max_tokens: u32,
    /// Tokens added per elapsed interval (default: 5)
    pub refill_amount: u32,
    /// Refill interval in milliseconds (default: 1000)
    pub refill_interval_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            refill_amount: 5,
            refill_interval_ms: 1000,
        }
    }
}

impl BucketConfig {
    #[must_use]
    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms.max(1))
    }
}

/// Page request used when the query string does not say otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationDefaults {
    pub page: u32,
    pub limit: u32,
    pub sort: String,
    pub order: String,
}

impl Default for PaginationDefaults {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 1,
            sort: "id".to_string(),
            order: "asc".to_string(),
        }
    }
}

/// Every tunable of the dispatch pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Gate every dispatch behind the leaky bucket (default: true)
    pub rate_limit_enabled: bool,
    /// Longest a request waits for a token before a 503 (default: 600)
    pub rate_limit_wait_ms: u64,
    pub bucket: BucketConfig,
    /// Retries granted to each request after its first attempt (default: 1)
    pub default_retry: u32,
    /// Prefix joined to `forward:` targets (default: `/WEB-INF/view/`)
    pub view_prefix: String,
    /// Image shown on the error page (default: `cat_error404.gif`)
    pub error_image: String,
    pub pagination: PaginationDefaults,
    /// Actions containing this marker end the session (default: `logout`)
    pub logout_marker: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit_enabled: true,
            rate_limit_wait_ms: 600,
            bucket: BucketConfig::default(),
            default_retry: 1,
            view_prefix: "/WEB-INF/view/".to_string(),
            error_image: "cat_error404.gif".to_string(),
            pagination: PaginationDefaults::default(),
            logout_marker: "logout".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is not valid TOML or a value has
    /// the wrong type.
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        toml::from_str(source).context("invalid pipeline configuration")
    }

    /// Read a TOML file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Ok(Self::from_toml_str(&source)?.with_env_overrides())
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup, keeping current values for
    /// missing or unparseable entries.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("REQPIPE_RATE_LIMIT_ENABLED").and_then(|v| parse_bool(&v)) {
            self.rate_limit_enabled = v;
        }
        override_parsed(&lookup, "REQPIPE_RATE_LIMIT_WAIT_MS", &mut self.rate_limit_wait_ms);
        override_parsed(&lookup, "REQPIPE_BUCKET_MAX_TOKENS", &mut self.bucket.max_tokens);
        override_parsed(
            &lookup,
            "REQPIPE_BUCKET_REFILL_AMOUNT",
            &mut self.bucket.refill_amount,
        );
        override_parsed(
            &lookup,
            "REQPIPE_BUCKET_REFILL_INTERVAL_MS",
            &mut self.bucket.refill_interval_ms,
        );
        override_parsed(&lookup, "REQPIPE_DEFAULT_RETRY", &mut self.default_retry);
        if let Some(v) = lookup("REQPIPE_VIEW_PREFIX").filter(|v| !v.is_empty()) {
            self.view_prefix = v;
        }
        if let Some(v) = lookup("REQPIPE_ERROR_IMAGE").filter(|v| !v.is_empty()) {
            self.error_image = v;
        }
        self
    }

    #[must_use]
    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(value) = lookup(key).and_then(|v| v.trim().parse().ok()) {
        *slot = value;
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
