//! Service instance, service key and binding types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired state of one service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredService {
    pub name: String,

    /// Offering label (managed services only)
    #[serde(default)]
    pub label: Option<String>,

    /// Offering plan (managed services only)
    #[serde(default)]
    pub plan: Option<String>,

    /// User-provided service instead of a managed one
    #[serde(default)]
    pub user_provided: bool,

    /// Credentials for user-provided services, parameters for managed ones
    #[serde(default)]
    pub credentials: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Syslog drain (user-provided services only)
    #[serde(default)]
    pub syslog_drain_url: Option<String>,

    /// Failures on this service are reported as warnings
    #[serde(default)]
    pub optional: bool,

    /// Service keys the service should carry
    #[serde(default)]
    pub keys: Vec<DesiredServiceKey>,
}

impl DesiredService {
    /// A managed service with the given offering.
    pub fn managed(
        name: impl Into<String>,
        label: impl Into<String>,
        plan: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            label: Some(label.into()),
            plan: Some(plan.into()),
            user_provided: false,
            credentials: BTreeMap::new(),
            tags: Vec::new(),
            syslog_drain_url: None,
            optional: false,
            keys: Vec::new(),
        }
    }

    /// A user-provided service.
    pub fn user_provided(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            plan: None,
            user_provided: true,
            credentials: BTreeMap::new(),
            tags: Vec::new(),
            syslog_drain_url: None,
            optional: false,
            keys: Vec::new(),
        }
    }
}

/// Desired service key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredServiceKey {
    pub name: String,

    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl DesiredServiceKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }
}

/// A service instance as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingService {
    pub name: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub plan: Option<String>,

    #[serde(default)]
    pub user_provided: bool,

    /// Credentials or parameters as reported by the platform
    #[serde(default)]
    pub credentials: BTreeMap<String, serde_json::Value>,

    /// Reported tags; absent is treated as empty
    #[serde(default)]
    pub tags: Option<Vec<String>>,

    #[serde(default)]
    pub syslog_drain_url: Option<String>,

    #[serde(default)]
    pub last_operation: Option<ServiceOperation>,
}

impl ExistingService {
    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or(&[])
    }
}

/// A service key as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingServiceKey {
    pub name: String,

    pub service_name: String,

    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    /// Generated credentials
    #[serde(default)]
    pub credentials: BTreeMap<String, serde_json::Value>,
}

/// A binding between an application and a service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub app_name: String,

    pub service_name: String,

    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// Type of a platform operation on a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceOperationType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ServiceOperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceOperationType::Create => write!(f, "create"),
            ServiceOperationType::Update => write!(f, "update"),
            ServiceOperationType::Delete => write!(f, "delete"),
        }
    }
}

/// State of a platform operation on a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOperationState {
    InProgress,
    Succeeded,
    Failed,
}

impl std::fmt::Display for ServiceOperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceOperationState::InProgress => write!(f, "in progress"),
            ServiceOperationState::Succeeded => write!(f, "succeeded"),
            ServiceOperationState::Failed => write!(f, "failed"),
        }
    }
}

/// Last operation observed on a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOperation {
    #[serde(rename = "type")]
    pub operation_type: ServiceOperationType,

    pub state: ServiceOperationState,

    #[serde(default)]
    pub description: Option<String>,
}

impl ServiceOperation {
    pub fn new(operation_type: ServiceOperationType, state: ServiceOperationState) -> Self {
        Self {
            operation_type,
            state,
            description: None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.state == ServiceOperationState::InProgress
    }

    /// A failed create or delete leaves the instance in an unusable state.
    pub fn left_instance_broken(&self) -> bool {
        self.state == ServiceOperationState::Failed
            && matches!(
                self.operation_type,
                ServiceOperationType::Create | ServiceOperationType::Delete
            )
    }
}

impl std::fmt::Display for ServiceOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.operation_type, self.state)?;
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        Ok(())
    }
}
