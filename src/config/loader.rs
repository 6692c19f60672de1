//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the
//! `config` crate: environment preset, then an optional TOML file, then
//! `DATA_ACCESS_*` environment variables (`__` separates nested keys, e.g.
//! `DATA_ACCESS_RATE_LIMIT__MAX_REQUESTS=60`).

use super::error::{ConfigResult, ConfigurationError};
use super::DataAccessConfig;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const ENV_PREFIX: &str = "DATA_ACCESS";

/// Loaded, validated configuration plus the environment it was resolved for
#[derive(Debug)]
pub struct ConfigManager {
    config: DataAccessConfig,
    environment: String,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection and no file
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_file(None, &Self::detect_environment())
    }

    /// Load configuration from an optional TOML file for an explicit environment
    pub fn load_from_file(
        path: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_env_source(path, environment, None)
    }

    /// Same as [`Self::load_from_file`] but with environment variables taken from
    /// `env_source` instead of the process environment. Useful for testing
    /// without modifying global environment variables.
    pub fn load_with_env_source(
        path: Option<PathBuf>,
        environment: &str,
        env_source: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        if let Some(path) = &path {
            if !path.exists() {
                return Err(ConfigurationError::FileNotFound { path: path.clone() });
            }
        }

        let config = Self::build(path.as_deref(), environment, env_source)?;
        config.validate()?;
        config.log_configuration();

        debug!(
            environment = environment,
            source_file = ?path,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            source_file: path,
        }))
    }

    fn build(
        path: Option<&Path>,
        environment: &str,
        env_source: Option<HashMap<String, String>>,
    ) -> ConfigResult<DataAccessConfig> {
        let preset = DataAccessConfig::for_environment(environment);
        let defaults = Config::try_from(&preset)
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let mut env_layer = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        if let Some(source) = env_source {
            env_layer = env_layer.source(Some(source.into_iter().collect()));
        }

        builder
            .add_source(env_layer)
            .build()
            .and_then(|merged| merged.try_deserialize::<DataAccessConfig>())
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: DataAccessConfig, environment: &str) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            environment: environment.to_string(),
            source_file: None,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &DataAccessConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    /// Detect the environment from environment variables
    pub fn detect_environment() -> String {
        env::var("DATA_ACCESS_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
