use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub caster: CasterConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CasterConfig {
    /// Product name announced in `User-Agent` and `Source-Agent`.
    pub product: String,
    /// Maximum number of concurrently ingested sources.
    pub max_sources: usize,
}

impl Default for CasterConfig {
    fn default() -> Self {
        Self {
            product: "NTRIP NtripCaster".to_string(),
            max_sources: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Seconds between two attempts of the same relay.
    pub reconnect_interval_seconds: u64,
    /// Attempts before giving up; -1 retries forever.
    pub reconnect_tries: i64,
    /// Connect, TLS and handshake read timeout.
    pub network_timeout_seconds: u64,
    /// Scheduler sweep period.
    pub sweep_interval_ms: u64,
    /// Relay definitions, same syntax as `relay pull`.
    pub pull: Vec<String>,
    /// Optional legacy `ntripcaster.conf` whose `relay` lines are loaded too.
    pub legacy_file: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_seconds: 30,
            reconnect_tries: -1,
            network_timeout_seconds: 15,
            sweep_interval_ms: 1000,
            pull: Vec::new(),
            legacy_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Runtime view of the relay settings used by the scheduler and workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub reconnect_interval: Duration,
    /// `None` means retry forever.
    pub reconnect_tries: Option<u32>,
    pub network_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            reconnect_interval: Duration::from_secs(config.reconnect_interval_seconds),
            reconnect_tries: u32::try_from(config.reconnect_tries).ok(),
            network_timeout: Duration::from_secs(config.network_timeout_seconds),
            sweep_interval: Duration::from_millis(config.sweep_interval_ms),
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // NTRIPCASTER_RELAY__RECONNECT_TRIES=3 etc.
        builder = builder.add_source(
            Environment::with_prefix("NTRIPCASTER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for values that would make the caster misbehave.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.relay.reconnect_tries < -1 {
            errors.push(format!(
                "relay.reconnect_tries must be -1 or >= 0, got {}",
                self.relay.reconnect_tries
            ));
        }
        if self.relay.network_timeout_seconds == 0 {
            errors.push("relay.network_timeout_seconds must be > 0".to_string());
        }
        if self.relay.sweep_interval_ms == 0 {
            errors.push("relay.sweep_interval_ms must be > 0".to_string());
        }
        if self.caster.product.trim().is_empty() {
            errors.push("caster.product must not be empty".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings::from(&self.relay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        let settings = config.relay_settings();
        assert_eq!(settings.reconnect_tries, None);
        assert_eq!(settings.network_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_reconnect_tries_mapping() {
        let relay = RelayConfig {
            reconnect_tries: 3,
            ..RelayConfig::default()
        };
        assert_eq!(RelaySettings::from(&relay).reconnect_tries, Some(3));
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = Config::default();
        config.relay.reconnect_tries = -5;
        config.relay.network_timeout_seconds = 0;
        config.logging.format = "xml".to_string();
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "relay:\n  reconnect_tries: 3\n  pull:\n    - \"-m test http://host:2101/MOUNT\"\ncaster:\n  product: TestCaster"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.relay.reconnect_tries, 3);
        assert_eq!(config.relay.pull.len(), 1);
        assert_eq!(config.caster.product, "TestCaster");
        assert_eq!(config.relay.reconnect_interval_seconds, 30);
    }
}
