//! Application types
//!
//! A [`DesiredApplication`] is what a module of the package should look like
//! on the platform. An [`ExistingApplication`] is what the platform reported
//! for the same name during the current pass.

use crate::broker::ServiceBrokerSpec;
use crate::ids::PackageId;
use crate::package::ApplicationColor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired state of one application, built from the package descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredApplication {
    /// Platform name of the application
    pub name: String,

    /// Descriptor module the application was built from
    pub module_name: String,

    /// Staging configuration
    #[serde(default)]
    pub staging: Staging,

    /// Memory limit in megabytes
    #[serde(default)]
    pub memory_mb: Option<u64>,

    /// Disk quota in megabytes
    #[serde(default)]
    pub disk_mb: Option<u64>,

    /// Requested instance count
    #[serde(default = "default_instances")]
    pub instances: u32,

    /// Routes the application should be mapped to
    #[serde(default)]
    pub routes: Vec<String>,

    /// Names of services the application binds to
    #[serde(default)]
    pub services: Vec<String>,

    /// Per-service binding parameters
    #[serde(default)]
    pub binding_parameters: BTreeMap<String, serde_json::Value>,

    /// Environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Restart triggers
    #[serde(default)]
    pub restart: RestartParameters,

    /// Service keys whose credentials are injected into the environment
    #[serde(default)]
    pub service_keys_to_inject: Vec<ServiceKeyToInject>,

    /// Do not start the application after deployment
    #[serde(default)]
    pub no_start: bool,

    /// Run the application to completion and watch its logs
    #[serde(default)]
    pub execute: Option<ExecuteSettings>,

    /// Service broker this application provides
    #[serde(default)]
    pub service_broker: Option<ServiceBrokerSpec>,

    /// New application bits were uploaded during this run
    #[serde(default)]
    pub content_changed: bool,

    /// Failures on this application are reported as warnings
    #[serde(default)]
    pub optional: bool,
}

fn default_instances() -> u32 {
    1
}

impl DesiredApplication {
    /// Create a desired application with defaults for everything but the names.
    pub fn new(name: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_name: module_name.into(),
            staging: Staging::default(),
            memory_mb: None,
            disk_mb: None,
            instances: default_instances(),
            routes: Vec::new(),
            services: Vec::new(),
            binding_parameters: BTreeMap::new(),
            env: BTreeMap::new(),
            restart: RestartParameters::default(),
            service_keys_to_inject: Vec::new(),
            no_start: false,
            execute: None,
            service_broker: None,
            content_changed: false,
            optional: false,
        }
    }

    /// The run state the application should end up in.
    pub fn desired_state(&self) -> ApplicationStartupState {
        if self.no_start {
            ApplicationStartupState::Stopped
        } else if self.execute.is_some() {
            ApplicationStartupState::Executed
        } else {
            ApplicationStartupState::Started
        }
    }
}

/// Staging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staging {
    #[serde(default)]
    pub buildpacks: Vec<String>,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub stack: Option<String>,

    #[serde(default)]
    pub health_check_type: Option<String>,

    #[serde(default)]
    pub health_check_http_endpoint: Option<String>,
}

/// Which kinds of change force a restage and restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartParameters {
    #[serde(default = "default_true")]
    pub on_env_change: bool,

    #[serde(default = "default_true")]
    pub on_service_change: bool,

    #[serde(default = "default_true")]
    pub on_route_change: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RestartParameters {
    fn default() -> Self {
        Self {
            on_env_change: true,
            on_service_change: true,
            on_route_change: true,
        }
    }
}

/// Inject the credentials of a service key as an environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceKeyToInject {
    pub env_var_name: String,
    pub service_name: String,
    pub key_name: String,
}

/// Settings for applications that run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSettings {
    /// Marker in `STREAM:pattern` form signalling success
    #[serde(default = "default_success_marker")]
    pub success_marker: String,

    /// Marker in `STREAM:pattern` form signalling failure
    #[serde(default = "default_failure_marker")]
    pub failure_marker: String,

    /// Stop the application once a marker was seen
    #[serde(default = "default_true")]
    pub stop_after_execution: bool,
}

pub const DEFAULT_SUCCESS_MARKER: &str = "STDOUT:SUCCESS";
pub const DEFAULT_FAILURE_MARKER: &str = "STDERR:FAILURE";

fn default_success_marker() -> String {
    DEFAULT_SUCCESS_MARKER.to_string()
}

fn default_failure_marker() -> String {
    DEFAULT_FAILURE_MARKER.to_string()
}

impl Default for ExecuteSettings {
    fn default() -> Self {
        Self {
            success_marker: default_success_marker(),
            failure_marker: default_failure_marker(),
            stop_after_execution: true,
        }
    }
}

/// Run state of an application, observed or desired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStartupState {
    /// All requested instances are running
    Started,
    /// The application is stopped
    Stopped,
    /// The application ran to completion and was stopped
    Executed,
    /// Partially running, crashed or otherwise neither started nor stopped
    Inconsistent,
}

impl std::fmt::Display for ApplicationStartupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplicationStartupState::Started => write!(f, "started"),
            ApplicationStartupState::Stopped => write!(f, "stopped"),
            ApplicationStartupState::Executed => write!(f, "executed"),
            ApplicationStartupState::Inconsistent => write!(f, "inconsistent"),
        }
    }
}

/// Requested state of the application on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    Started,
    Stopped,
}

/// State of a single application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Starting,
    Running,
    Crashed,
    Flapping,
    Down,
    Unknown,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Crashed => write!(f, "crashed"),
            InstanceState::Flapping => write!(f, "flapping"),
            InstanceState::Down => write!(f, "down"),
            InstanceState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Per-state instance counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceCounts {
    pub starting: u32,
    pub running: u32,
    pub crashed: u32,
    pub flapping: u32,
    pub down: u32,
    pub unknown: u32,
}

impl InstanceCounts {
    pub fn from_states(states: &[InstanceState]) -> Self {
        let mut counts = Self::default();
        for state in states {
            match state {
                InstanceState::Starting => counts.starting += 1,
                InstanceState::Running => counts.running += 1,
                InstanceState::Crashed => counts.crashed += 1,
                InstanceState::Flapping => counts.flapping += 1,
                InstanceState::Down => counts.down += 1,
                InstanceState::Unknown => counts.unknown += 1,
            }
        }
        counts
    }

    /// Render as `running (n starting, m crashed)`, skipping zero counters.
    pub fn describe(&self, expected: u32) -> String {
        let others: Vec<String> = [
            (self.starting, InstanceState::Starting),
            (self.crashed, InstanceState::Crashed),
            (self.flapping, InstanceState::Flapping),
            (self.down, InstanceState::Down),
            (self.unknown, InstanceState::Unknown),
        ]
        .iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, state)| format!("{count} {state}"))
        .collect();

        if others.is_empty() {
            format!("{} of {} instances running", self.running, expected)
        } else {
            format!(
                "{} of {} instances running ({})",
                self.running,
                expected,
                others.join(", ")
            )
        }
    }
}

/// Staging (build) state of the application's current package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BuildState {
    NotStaged,
    Pending,
    Staged,
    Failed { reason: String },
}

impl Default for BuildState {
    fn default() -> Self {
        BuildState::NotStaged
    }
}

/// Ownership metadata stored on an application by the deployer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipMetadata {
    /// Package that deployed the application
    pub package_id: PackageId,

    /// Version of that package
    #[serde(default)]
    pub package_version: Option<String>,

    /// Module the application was built from
    pub module_name: String,

    /// Blue-green color of the generation the application belongs to
    #[serde(default)]
    pub color: Option<ApplicationColor>,

    /// Services the owning package declares
    #[serde(default)]
    pub services: Vec<String>,
}

/// An application as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingApplication {
    pub name: String,

    pub state: AppState,

    /// Requested instance count
    pub instances: u32,

    /// Observed instance states
    #[serde(default)]
    pub instance_states: Vec<InstanceState>,

    #[serde(default)]
    pub memory_mb: Option<u64>,

    #[serde(default)]
    pub disk_mb: Option<u64>,

    #[serde(default)]
    pub staging: Staging,

    #[serde(default)]
    pub routes: Vec<String>,

    /// Names of bound services
    #[serde(default)]
    pub services: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub metadata: Option<OwnershipMetadata>,

    #[serde(default)]
    pub build: BuildState,

    /// Set once the application ran to completion
    #[serde(default)]
    pub executed: bool,

    pub created_at: DateTime<Utc>,
}

impl ExistingApplication {
    pub fn instance_counts(&self) -> InstanceCounts {
        InstanceCounts::from_states(&self.instance_states)
    }

    /// Observed startup state derived from the instance counters.
    pub fn startup_state(&self) -> ApplicationStartupState {
        match self.state {
            AppState::Started if self.instance_counts().running == self.instances => {
                ApplicationStartupState::Started
            }
            AppState::Stopped if self.executed => ApplicationStartupState::Executed,
            AppState::Stopped => ApplicationStartupState::Stopped,
            AppState::Started => ApplicationStartupState::Inconsistent,
        }
    }

    pub fn owner(&self) -> Option<&PackageId> {
        self.metadata.as_ref().map(|m| &m.package_id)
    }
}
