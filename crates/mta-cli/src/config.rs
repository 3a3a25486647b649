//! Configuration for mtactl

use mta_control::SchedulerConfig;
use mta_types::{DeploymentPolicy, PollingConfig};
use serde::{Deserialize, Serialize};

/// Main deployer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployerConfig {
    /// Deployment policy
    #[serde(default)]
    pub policy: DeploymentPolicy,

    /// Operation timeouts
    #[serde(default)]
    pub polling: PollingConfig,

    /// Tick pacing
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
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

impl DeployerConfig {
    /// Load configuration from defaults, an optional file and `MTA_`
    /// environment variables, in increasing precedence.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DeployerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // MTA_POLICY__BLUE_GREEN=true, MTA_POLLING__START_TIMEOUT_SECS=600
        builder = builder.add_source(
            config::Environment::with_prefix("MTA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeployerConfig::default();
        assert!(!config.policy.blue_green);
        assert!(config.policy.fail_on_crashed);
        assert_eq!(config.polling.start_timeout_secs, 3600);
        assert_eq!(config.scheduler.tick_interval_ms, 5000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DeployerConfig::load(None).unwrap();
        assert_eq!(config.polling.broker_timeout_secs, 1800);
        assert!(config.scheduler.max_ticks.is_none());
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config = DeployerConfig::load(Some("/nonexistent/mtactl")).unwrap();
        assert!(!config.policy.delete_services);
    }
}
