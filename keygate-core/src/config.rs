//! Configuration
//!
//! One aggregated, serde-deserializable configuration struct consumed by the
//! core. Loadable from TOML; `validate` fails fast on anything malformed so
//! bad settings never reach a request path.

use crate::error::{KeygateError, Result};
use crate::identity::Mode;
use crate::protocol::ChallengeConfig;
use crate::ratelimit::RateLimitPolicy;
use crate::reputation::ReputationConfig;
use crate::token::TokenConfig;
use crate::webhook::WebhookConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend name; `"memory"` is the reference backend
    pub backend: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
        }
    }
}

impl StorageConfig {
    /// Fail-fast validation of the backend name
    pub fn validate(&self) -> Result<()> {
        match self.backend.as_str() {
            "memory" => Ok(()),
            other => Err(KeygateError::Configuration(format!(
                "Unknown storage backend: {}",
                other
            ))),
        }
    }
}

/// Aggregated keygate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeygateConfig {
    /// Environment mode, reflected in id/api-key prefixes
    pub mode: Mode,

    /// The scope catalogue agents may request from
    pub scopes: Vec<String>,

    /// Default per-agent rate-limit policy
    pub rate_limit: RateLimitPolicy,

    /// Challenge issuance and auth-freshness settings
    pub challenge: ChallengeConfig,

    /// Access-token settings
    pub token: TokenConfig,

    /// Reputation engine settings
    pub reputation: ReputationConfig,

    /// Webhook subsystem settings
    pub webhooks: WebhookConfig,

    /// Storage backend selection
    pub storage: StorageConfig,
}

impl KeygateConfig {
    /// Parse a configuration from a TOML string
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| KeygateError::Configuration(format!("Invalid TOML config: {}", e)))
    }

    /// Load a configuration from a TOML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            KeygateError::Configuration(format!(
                "Cannot read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Validate every section, failing fast on the first problem
    pub fn validate(&self) -> Result<()> {
        self.rate_limit.window_duration()?;
        self.challenge.validate()?;
        self.token.validate()?;
        self.reputation.validate()?;
        self.webhooks.validate()?;
        self.storage.validate()?;
        Ok(())
    }
}
