//! Event bus configuration.
//!
//! Configuration is loaded from environment variables with defaults suited
//! to development.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Emit binding diagnostics and known-event checks.
    pub dev_mode: bool,

    /// Pending queue length above which a warning is logged.
    pub queue_high_water: usize,

    /// Contain handler panics as failures instead of propagating them.
    pub catch_panics: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dev_mode: true,
            queue_high_water: 1024,
            catch_panics: true,
        }
    }
}

impl BusConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `EVENTBUS_DEV_MODE`: Binding diagnostics (default: true)
    /// - `EVENTBUS_QUEUE_HIGH_WATER`: Queue warning threshold (default: 1024)
    /// - `EVENTBUS_CATCH_PANICS`: Contain handler panics (default: true)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            dev_mode: std::env::var("EVENTBUS_DEV_MODE")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(default.dev_mode),
            queue_high_water: std::env::var("EVENTBUS_QUEUE_HIGH_WATER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.queue_high_water),
            catch_panics: std::env::var("EVENTBUS_CATCH_PANICS")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(default.catch_panics),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_high_water == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_high_water".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BusConfig::default();
        assert!(config.dev_mode);
        assert_eq!(config.queue_high_water, 1024);
        assert!(config.catch_panics);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_high_water_is_invalid() {
        let config = BusConfig {
            queue_high_water: 0,
            ..BusConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_config_serialization() {
        let config = BusConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BusConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.queue_high_water, config.queue_high_water);
    }
}
