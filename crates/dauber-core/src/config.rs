//! Session memory configuration
//!
//! Values can come from a TOML document, from environment variables, or from
//! `Default`. Missing keys fall back to the defaults below.

use crate::error::{DauberError, DauberResult};
use serde::Deserialize;
use tracing::warn;

/// Output format for the tracing subscriber
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration consumed by [`crate::telemetry::init_tracing`]
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: default_log_filter(), format: LogFormat::default() }
    }
}

impl LoggingConfig {
    /// Create configuration from environment variables
    pub fn from_environment() -> Self {
        let format = match std::env::var("DAUBER_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Self {
            filter: std::env::var("DAUBER_LOG").unwrap_or_else(|_| default_log_filter()),
            format,
        }
    }
}

/// Tuning knobs for the fact memory of one session
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Initial slot count of every key store partition, rounded up to a power of two
    #[serde(default = "default_initial_key_capacity")]
    pub initial_key_capacity: usize,
    /// Load factor above which a key store partition doubles its slot array
    #[serde(default = "default_max_load_factor")]
    pub max_load_factor: f64,
    /// Log a warning when retract/update targets an object that was never inserted
    #[serde(default = "default_true")]
    pub warn_on_unknown_object: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            initial_key_capacity: default_initial_key_capacity(),
            max_load_factor: default_max_load_factor(),
            warn_on_unknown_object: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl MemoryConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> DauberResult<Self> {
        let config: MemoryConfig = toml::from_str(source)
            .map_err(|e| DauberError::configuration("toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables, ignoring unparsable values
    pub fn from_environment() -> Self {
        let mut config = Self { logging: LoggingConfig::from_environment(), ..Self::default() };

        if let Ok(raw) = std::env::var("DAUBER_INITIAL_KEY_CAPACITY") {
            match raw.parse() {
                Ok(capacity) => config.initial_key_capacity = capacity,
                Err(_) => warn!(value = %raw, "Ignoring invalid DAUBER_INITIAL_KEY_CAPACITY"),
            }
        }
        if let Ok(raw) = std::env::var("DAUBER_MAX_LOAD_FACTOR") {
            match raw.parse() {
                Ok(load_factor) => config.max_load_factor = load_factor,
                Err(_) => warn!(value = %raw, "Ignoring invalid DAUBER_MAX_LOAD_FACTOR"),
            }
        }
        config
    }

    /// Check value ranges
    pub fn validate(&self) -> DauberResult<()> {
        if self.initial_key_capacity == 0 {
            return Err(DauberError::configuration(
                "initial_key_capacity",
                "initial key capacity must be greater than zero",
            ));
        }
        if !(self.max_load_factor > 0.1 && self.max_load_factor < 0.95) {
            return Err(DauberError::configuration(
                "max_load_factor",
                format!("load factor {} is outside (0.1, 0.95)", self.max_load_factor),
            ));
        }
        Ok(())
    }
}

fn default_log_filter() -> String {
    "dauber_core=info".to_string()
}

fn default_initial_key_capacity() -> usize {
    16
}

fn default_max_load_factor() -> f64 {
    0.75
}

fn default_true() -> bool {
    true
}
