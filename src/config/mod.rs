//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables. The value is
//! built once at startup and handed to each component's constructor.

use serde::Deserialize;

use crate::bus::MessagingConfig;
use crate::outbox::OutboxConfig;
use crate::router::RouterConfig;
use crate::storage::StorageConfig;
use crate::utils::bootstrap::LogConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "OUTBOX_RELAY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "OUTBOX_RELAY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "OUTBOX_RELAY_LOG";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// External HTTP collaborators of the user handlers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollaboratorsConfig {
    /// Base URL of the API gateway fronting the email and CRM services.
    pub gateway_addr: String,
    /// Per-request timeout.
    pub timeout_ms: u64,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            gateway_addr: "http://localhost:8888".to_string(),
            timeout_ms: 5_000,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Messaging configuration.
    pub messaging: MessagingConfig,
    /// Outbox write path and relay.
    pub outbox: OutboxConfig,
    /// Router and splitter.
    pub router: RouterConfig,
    /// Email and CRM endpoints.
    pub collaborators: CollaboratorsConfig,
    /// Logging.
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, e.g.
    ///    `OUTBOX_RELAY__OUTBOX__BATCH_SIZE=50`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document, without consulting files or the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the relay and router cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbox.topic.is_empty() {
            return Err(ConfigError::Invalid("outbox.topic must not be empty".into()));
        }
        if self.outbox.consumer_id.is_empty() {
            return Err(ConfigError::Invalid(
                "outbox.consumer_id must not be empty".into(),
            ));
        }
        if self.outbox.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "outbox.batch_size must be at least 1".into(),
            ));
        }
        if self.router.events_topic.is_empty() {
            return Err(ConfigError::Invalid(
                "router.events_topic must not be empty".into(),
            ));
        }
        Ok(())
    }
}
