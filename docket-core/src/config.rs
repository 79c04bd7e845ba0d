//! Engine configuration.

use crate::{ConfigError, DocketResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the analysis engine.
///
/// All coordination tunables live here; there is no module-level state. The
/// host application constructs one config, validates it, and injects it into
/// the engine at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model identifier fed into key derivation and the provider request.
    pub model_id: String,
    /// TTL for cache entries.
    pub cache_ttl: Duration,
    /// TTL for per-key advisory locks. Must exceed the worst-case
    /// computation time; bounds the damage from a crashed worker.
    pub lock_ttl: Duration,
    /// Timeout enforced on the inference provider call. Must be shorter
    /// than `lock_ttl`, otherwise a hung provider holds the lock for its
    /// full TTL needlessly.
    pub provider_timeout: Duration,
    /// How many times version allocation is retried on a (case, version)
    /// collision before the job fails.
    pub version_alloc_retries: u32,
    /// Maximum tokens requested from the inference provider.
    pub max_output_tokens: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_id: "claude-3-5-sonnet-20241022".to_string(),
            cache_ttl: Duration::from_secs(7 * 24 * 3600),
            lock_ttl: Duration::from_secs(10 * 60),
            provider_timeout: Duration::from_secs(120),
            version_alloc_retries: 3,
            max_output_tokens: 4096,
        }
    }
}

impl EngineConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model identifier.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the lock TTL.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the provider timeout.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DocketResult<()> {
        if self.model_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "model_id".to_string(),
            }
            .into());
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cache_ttl".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.lock_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "lock_ttl".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.provider_timeout >= self.lock_ttl {
            return Err(ConfigError::InvalidValue {
                field: "provider_timeout".to_string(),
                value: format!("{:?}", self.provider_timeout),
                reason: "must be shorter than lock_ttl".to_string(),
            }
            .into());
        }
        if self.version_alloc_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "version_alloc_retries".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.max_output_tokens <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_output_tokens".to_string(),
                value: self.max_output_tokens.to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
