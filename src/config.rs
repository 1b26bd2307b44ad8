//! Configuration management for Eventgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{EventgateError, Result};
use crate::throttle::ThrottleOptions;

/// Prefix for environment overrides, e.g. `EVENTGATE__STATS__INTERVAL_MS`.
pub const ENV_PREFIX: &str = "EVENTGATE";

/// Main configuration for the Eventgate editor demo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventgateConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Stats throttle options
    #[serde(default)]
    pub stats: ThrottleOptions,

    /// Format throttle options
    #[serde(default)]
    pub format: ThrottleOptions,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EventgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| EventgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load defaults, then an optional YAML file, then `EVENTGATE__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?.try_deserialize::<EventgateConfig>()?;
        Ok(config)
    }
}
