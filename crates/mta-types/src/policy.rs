//! Deployment policy and polling timeouts

use crate::operation::OperationKind;
use crate::package::ApplicationColor;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Operator choices that gate destructive or tolerant behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPolicy {
    /// Allow deleting and recreating services
    #[serde(default)]
    pub delete_services: bool,

    /// Allow deleting service keys that are no longer declared
    #[serde(default)]
    pub delete_service_keys: bool,

    /// Downgrade broker permission errors to warnings
    #[serde(default)]
    pub no_fail_on_missing_permissions: bool,

    /// Treat crashed instances as a failed start
    #[serde(default = "default_true")]
    pub fail_on_crashed: bool,

    /// Deploy a new blue-green generation next to the live one
    #[serde(default)]
    pub blue_green: bool,

    /// Use `-live`/`-idle` suffixes instead of colors
    #[serde(default)]
    pub keep_original_app_names: bool,

    /// Live color to assume when it cannot be detected unambiguously
    #[serde(default)]
    pub color_override: Option<ApplicationColor>,
}

fn default_true() -> bool {
    true
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        Self {
            delete_services: false,
            delete_service_keys: false,
            no_fail_on_missing_permissions: false,
            fail_on_crashed: true,
            blue_green: false,
            keep_original_app_names: false,
            color_override: None,
        }
    }
}

/// Timeouts for asynchronous operations, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    #[serde(default = "default_execute_timeout")]
    pub execute_timeout_secs: u64,

    #[serde(default = "default_service_operation_timeout")]
    pub service_operation_timeout_secs: u64,

    #[serde(default = "default_broker_timeout")]
    pub broker_timeout_secs: u64,
}

fn default_stage_timeout() -> u64 {
    3600
}

fn default_start_timeout() -> u64 {
    3600
}

fn default_execute_timeout() -> u64 {
    3600
}

fn default_service_operation_timeout() -> u64 {
    3600
}

fn default_broker_timeout() -> u64 {
    1800
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout(),
            start_timeout_secs: default_start_timeout(),
            execute_timeout_secs: default_execute_timeout(),
            service_operation_timeout_secs: default_service_operation_timeout(),
            broker_timeout_secs: default_broker_timeout(),
        }
    }
}

impl PollingConfig {
    pub fn timeout_for(&self, kind: OperationKind) -> Duration {
        let secs = match kind {
            OperationKind::StageApplication => self.stage_timeout_secs,
            OperationKind::StartApplication => self.start_timeout_secs,
            OperationKind::ExecuteApplication => self.execute_timeout_secs,
            OperationKind::ServiceOperation => self.service_operation_timeout_secs,
            OperationKind::ServiceBroker => self.broker_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}
