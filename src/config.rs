//! Runtime configuration
//!
//! Loaded from TOML. Every field has a default so an empty document is valid.
//!
//! ```toml
//! refresh_interval_secs = 12
//! worker_pool_size = 8
//!
//! [audit]
//! channel_capacity = 4096
//! ```

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthzConfig {
    /// Seconds between policy/subject snapshot reloads
    #[validate(range(min = 1, max = 3600))]
    pub refresh_interval_secs: u64,

    /// Deadline applied to every Policy Authority and search call
    #[validate(range(min = 1))]
    pub authority_timeout_ms: u64,

    /// Concurrent Policy Authority mutations per reconciliation
    #[validate(range(min = 1, max = 256))]
    pub worker_pool_size: usize,

    /// Page size for paginated Policy Authority listings
    #[validate(range(min = 1, max = 1000))]
    pub search_page_size: usize,

    /// Maximum should-clauses per bool query before chunking
    #[validate(range(min = 2))]
    pub max_clause_limit: usize,

    /// Compiled resource patterns kept in the LRU cache
    #[validate(range(min = 1))]
    pub pattern_cache_capacity: usize,

    /// Tenant used for persona qualified names when none is given
    #[validate(length(min = 1))]
    pub default_tenant: String,

    #[validate(nested)]
    pub audit: AuditConfig,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        AuthzConfig {
            refresh_interval_secs: 12,
            authority_timeout_ms: 10_000,
            worker_pool_size: 8,
            search_page_size: 25,
            max_clause_limit: 1024,
            pattern_cache_capacity: 1024,
            default_tenant: "tenant".to_string(),
            audit: AuditConfig::default(),
        }
    }
}

impl AuthzConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AuthzConfig =
            toml::from_str(text).map_err(|e| AuthzError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Run field validation
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AuthzError::Config(e.to_string()))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn authority_timeout(&self) -> Duration {
        Duration::from_millis(self.authority_timeout_ms)
    }
}

/// Audit logger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuditConfig {
    /// Records buffered before new ones are dropped
    #[validate(range(min = 1))]
    pub channel_capacity: usize,

    #[validate(range(min = 1))]
    pub flush_interval_ms: u64,

    /// Records handed to the sink per flush
    #[validate(range(min = 1))]
    pub batch_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            channel_capacity: 4096,
            flush_interval_ms: 500,
            batch_size: 256,
        }
    }
}

impl AuditConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}
