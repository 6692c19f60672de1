//! # Data Access Configuration
//!
//! Every tuning constant of the data-access core lives here: cache TTLs,
//! rate-limit window, breaker threshold and cooldown, per-operation timeouts,
//! incident-log capacities and the schema-fallback projection per resource.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use storefront_data::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file(Some("config/data-access.toml".into()), "production")?;
//! let read_timeout = manager.config().timeouts.read_timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/data-access.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DataAccessConfig {
    /// Read cache settings
    pub cache: CacheConfig,

    /// Sliding-window rate limiting
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker around the remote executor
    pub circuit_breaker: CircuitBreakerConfig,

    /// Per-operation deadlines
    pub timeouts: TimeoutConfig,

    /// Incident and activity log capacities
    pub incident_log: IncidentLogConfig,

    /// Outgoing parameter screening
    pub scanner: ScannerConfig,

    /// Reduced projections used when the remote schema lags behind
    pub schema_fallback: SchemaFallbackConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_seconds: u64,
    pub max_entries: usize,
    /// TTL overrides keyed by resource name
    pub resource_ttl_seconds: HashMap<String, u64>,
    pub cleanup_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: 300,
            max_entries: 1000,
            resource_ttl_seconds: HashMap::new(),
            cleanup_interval_seconds: 60,
        }
    }
}

impl CacheConfig {
    /// TTL for a resource, falling back to the default
    pub fn ttl_for(&self, resource: &str) -> Duration {
        let seconds = self
            .resource_ttl_seconds
            .get(resource)
            .copied()
            .unwrap_or(self.default_ttl_seconds);
        Duration::from_secs(seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_seconds: u64,
    pub max_requests: usize,
    /// Identity used when callers do not distinguish tenants
    pub default_client_id: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 60,
            max_requests: 30,
            default_client_id: "default".to_string(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Circuit breaker settings as written in the config file
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time spent open before a half-open probe is allowed
    pub cooldown_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            cooldown_seconds: 300,
        }
    }
}

impl CircuitBreakerConfig {
    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> crate::resilience::config::CircuitBreakerConfig {
        crate::resilience::config::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_seconds),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub health_check_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 10_000,
            write_timeout_ms: 15_000,
            health_check_timeout_ms: 3_000,
        }
    }
}

impl TimeoutConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IncidentLogConfig {
    pub security_capacity: usize,
    pub activity_capacity: usize,
    /// When set, the log is written here after each security incident
    pub persist_path: Option<PathBuf>,
}

impl Default for IncidentLogConfig {
    fn default() -> Self {
        Self {
            security_capacity: 50,
            activity_capacity: 100,
            persist_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub enabled: bool,
    pub max_payload_chars: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_payload_chars: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaFallbackConfig {
    /// Reduced projection keyed by resource name
    pub projections: HashMap<String, FallbackProjection>,
}

/// Known-safe field set for a resource plus defaults for the newer optional fields
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackProjection {
    /// Fields every deployed schema version is known to have
    pub safe_fields: Vec<String>,

    /// Optional fields excluded from the reduced projection, with the value
    /// filled into results when the store could not provide them
    pub optional_defaults: serde_json::Map<String, serde_json::Value>,
}

impl FallbackProjection {
    pub fn is_optional(&self, field: &str) -> bool {
        self.optional_defaults.contains_key(field)
    }
}

impl DataAccessConfig {
    /// Configuration with short windows and tiny capacities for tests
    pub fn for_test() -> Self {
        Self {
            cache: CacheConfig {
                default_ttl_seconds: 5,
                max_entries: 100,
                cleanup_interval_seconds: 1,
                ..CacheConfig::default()
            },
            rate_limit: RateLimitConfig {
                window_seconds: 60,
                max_requests: 1000,
                ..RateLimitConfig::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                enabled: true,
                failure_threshold: 3,
                cooldown_seconds: 30,
            },
            timeouts: TimeoutConfig {
                read_timeout_ms: 1_000,
                write_timeout_ms: 1_000,
                health_check_timeout_ms: 250,
            },
            incident_log: IncidentLogConfig {
                security_capacity: 10,
                activity_capacity: 20,
                persist_path: None,
            },
            ..Self::default()
        }
    }

    /// Development configuration: short TTLs so admin edits show up quickly
    pub fn for_development() -> Self {
        Self {
            cache: CacheConfig {
                default_ttl_seconds: 30,
                cleanup_interval_seconds: 30,
                ..CacheConfig::default()
            },
            rate_limit: RateLimitConfig {
                max_requests: 120,
                ..RateLimitConfig::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                cooldown_seconds: 60,
                ..CircuitBreakerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Preset for a named environment
    pub fn for_environment(environment: &str) -> Self {
        match environment {
            "test" => Self::for_test(),
            "development" => Self::for_development(),
            _ => Self::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cache.max_entries == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.max_entries",
                self.cache.max_entries,
                "must be greater than 0",
            ));
        }

        if self.cache.cleanup_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.cleanup_interval_seconds",
                self.cache.cleanup_interval_seconds,
                "must be greater than 0",
            ));
        }

        if self.rate_limit.window_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "rate_limit.window_seconds",
                self.rate_limit.window_seconds,
                "must be greater than 0",
            ));
        }

        if self.rate_limit.max_requests == 0 {
            return Err(ConfigurationError::invalid_value(
                "rate_limit.max_requests",
                self.rate_limit.max_requests,
                "must be greater than 0",
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "circuit_breaker.failure_threshold",
                self.circuit_breaker.failure_threshold,
                "must be greater than 0",
            ));
        }

        for (field, value) in [
            ("timeouts.read_timeout_ms", self.timeouts.read_timeout_ms),
            ("timeouts.write_timeout_ms", self.timeouts.write_timeout_ms),
            (
                "timeouts.health_check_timeout_ms",
                self.timeouts.health_check_timeout_ms,
            ),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be greater than 0",
                ));
            }
        }

        if self.incident_log.security_capacity == 0 || self.incident_log.activity_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "incident_log",
                format!(
                    "{}/{}",
                    self.incident_log.security_capacity, self.incident_log.activity_capacity
                ),
                "capacities must be greater than 0",
            ));
        }

        if self.scanner.max_payload_chars == 0 {
            return Err(ConfigurationError::invalid_value(
                "scanner.max_payload_chars",
                self.scanner.max_payload_chars,
                "must be greater than 0",
            ));
        }

        for (resource, projection) in &self.schema_fallback.projections {
            if projection.safe_fields.is_empty() {
                return Err(ConfigurationError::invalid_value(
                    format!("schema_fallback.projections.{resource}.safe_fields"),
                    "[]",
                    "a fallback projection needs at least one safe field",
                ));
            }
        }

        // Warn about potentially problematic configurations
        if self.cache.default_ttl_seconds == 0 {
            warn!("Cache default TTL is 0 - read caching effectively disabled");
        }

        if !self.circuit_breaker.enabled {
            warn!("Circuit breaker disabled - failing upstream will not be isolated");
        }

        Ok(())
    }

    /// Log current configuration for debugging
    pub fn log_configuration(&self) {
        info!(
            cache_enabled = self.cache.enabled,
            default_ttl_seconds = self.cache.default_ttl_seconds,
            max_entries = self.cache.max_entries,
            rate_limit = self.rate_limit.max_requests,
            rate_window_seconds = self.rate_limit.window_seconds,
            failure_threshold = self.circuit_breaker.failure_threshold,
            cooldown_seconds = self.circuit_breaker.cooldown_seconds,
            read_timeout_ms = self.timeouts.read_timeout_ms,
            fallback_resources = self.schema_fallback.projections.len(),
            "Data access configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = DataAccessConfig::default();
        assert_eq!(config.rate_limit.max_requests, 30);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.cooldown_seconds, 300);
        assert_eq!(config.timeouts.read_timeout(), Duration::from_secs(10));
        assert_eq!(config.incident_log.security_capacity, 50);
        assert_eq!(config.incident_log.activity_capacity, 100);
        assert_eq!(config.scanner.max_payload_chars, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_validate() {
        for environment in ["test", "development", "production"] {
            let config = DataAccessConfig::for_environment(environment);
            assert!(config.validate().is_ok(), "{environment} preset invalid");
        }
    }

    #[test]
    fn test_resource_ttl_override() {
        let mut config = CacheConfig::default();
        config.resource_ttl_seconds.insert("categories".to_string(), 900);

        assert_eq!(config.ttl_for("categories"), Duration::from_secs(900));
        assert_eq!(config.ttl_for("products"), Duration::from_secs(300));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = DataAccessConfig::default();
        config.rate_limit.window_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = DataAccessConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = DataAccessConfig::default();
        config.timeouts.health_check_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = DataAccessConfig::default();
        config
            .schema_fallback
            .projections
            .insert("products".to_string(), FallbackProjection::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_circuit_breaker_conversion() {
        let config = CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 7,
            cooldown_seconds: 45,
        };
        let resilience = config.to_resilience_config();
        assert_eq!(resilience.failure_threshold, 7);
        assert_eq!(resilience.cooldown, Duration::from_secs(45));
    }
}
