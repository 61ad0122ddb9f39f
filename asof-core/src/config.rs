//! Configuration types

use crate::error::{AsofError, AsofResult, ConfigError};
use serde::{Deserialize, Serialize};

/// Configuration for a historical cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name attached to every log event emitted by the cache.
    pub name: String,
    /// Upper bound on bulk-load pages requested by one pagination loop.
    pub max_page_requests: usize,
    /// Upper bound on extension steps (floor lookups or bulk windows) taken by
    /// one backward walk.
    pub max_backward_steps: usize,
    /// Default `filter_duplicate_keys` setting for new queries.
    pub filter_duplicate_keys: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "historical-cache".to_string(),
            max_page_requests: 65_536,
            max_backward_steps: 65_536,
            filter_duplicate_keys: true,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the pagination bound.
    pub fn with_max_page_requests(mut self, max: usize) -> Self {
        self.max_page_requests = max;
        self
    }

    /// Set the backward extension bound.
    pub fn with_max_backward_steps(mut self, max: usize) -> Self {
        self.max_backward_steps = max;
        self
    }

    /// Set the default duplicate-key policy for new queries.
    pub fn with_filter_duplicate_keys(mut self, enabled: bool) -> Self {
        self.filter_duplicate_keys = enabled;
        self
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `ASOF_CACHE_NAME`: cache name (default: `historical-cache`)
    /// - `ASOF_MAX_PAGE_REQUESTS`: pagination bound (default: 65536)
    /// - `ASOF_MAX_BACKWARD_STEPS`: backward extension bound (default: 65536)
    /// - `ASOF_FILTER_DUPLICATE_KEYS`: `true`/`false`/`1`/`0` (default: true)
    ///
    /// Unlike a silent fallback, values that are present but unparsable are
    /// rejected.
    pub fn from_env() -> AsofResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CacheConfig::from_env`] over an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> AsofResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            name: lookup("ASOF_CACHE_NAME").unwrap_or(defaults.name),
            max_page_requests: parse_var(&lookup, "ASOF_MAX_PAGE_REQUESTS")?
                .unwrap_or(defaults.max_page_requests),
            max_backward_steps: parse_var(&lookup, "ASOF_MAX_BACKWARD_STEPS")?
                .unwrap_or(defaults.max_backward_steps),
            filter_duplicate_keys: match lookup("ASOF_FILTER_DUPLICATE_KEYS") {
                Some(raw) => parse_flag("ASOF_FILTER_DUPLICATE_KEYS", &raw)?,
                None => defaults.filter_duplicate_keys,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> AsofResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Malformed {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - name is not blank
    /// - max_page_requests > 0
    /// - max_backward_steps > 0
    pub fn validate(&self) -> AsofResult<()> {
        if self.name.trim().is_empty() {
            return Err(AsofError::Config(ConfigError::InvalidValue {
                field: "name".to_string(),
                value: self.name.clone(),
                reason: "name must not be blank".to_string(),
            }));
        }

        if self.max_page_requests == 0 {
            return Err(AsofError::Config(ConfigError::InvalidValue {
                field: "max_page_requests".to_string(),
                value: self.max_page_requests.to_string(),
                reason: "max_page_requests must be greater than 0".to_string(),
            }));
        }

        if self.max_backward_steps == 0 {
            return Err(AsofError::Config(ConfigError::InvalidValue {
                field: "max_backward_steps".to_string(),
                value: self.max_backward_steps.to_string(),
                reason: "max_backward_steps must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}

fn parse_var<F>(lookup: &F, name: &str) -> AsofResult<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            AsofError::Config(ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "expected a non-negative integer".to_string(),
            })
        }),
        None => Ok(None),
    }
}

fn parse_flag(name: &str, raw: &str) -> AsofResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(AsofError::Config(ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw.to_string(),
            reason: "expected true, false, 1 or 0".to_string(),
        })),
    }
}

// =============================================================================
// TESTS
// =============================================================================
