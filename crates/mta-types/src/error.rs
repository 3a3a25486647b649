//! Deployment error model
//!
//! Every failure that reaches the step layer is a [`DeployError`]: one tagged
//! value carrying the error kind, the resource it concerns and the action that
//! was being performed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a deployment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid desired state or ownership conflict
    Content,
    /// The platform rejected a request
    Platform,
    /// An asynchronous operation did not finish in time
    Timeout,
    /// A poll failed in a way that may succeed on the next tick
    TransientPoll,
    /// The run was aborted by an operator
    Aborted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Content => write!(f, "content"),
            ErrorKind::Platform => write!(f, "platform"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::TransientPoll => write!(f, "transient poll"),
            ErrorKind::Aborted => write!(f, "aborted"),
        }
    }
}

/// A deployment failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} error{}: {message}", context_suffix(.resource, .action))]
pub struct DeployError {
    pub kind: ErrorKind,

    /// Resource the failure concerns
    #[serde(default)]
    pub resource: Option<String>,

    /// Action that was being performed
    #[serde(default)]
    pub action: Option<String>,

    pub message: String,

    /// HTTP-like status reported by the platform
    #[serde(default)]
    pub status: Option<u16>,
}

fn context_suffix(resource: &Option<String>, action: &Option<String>) -> String {
    match (resource, action) {
        (Some(resource), Some(action)) => format!(" ({action} {resource})"),
        (Some(resource), None) => format!(" ({resource})"),
        (None, Some(action)) => format!(" ({action})"),
        (None, None) => String::new(),
    }
}

impl DeployError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            resource: None,
            action: None,
            message: message.into(),
            status: None,
        }
    }

    pub fn content(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Content, message)
    }

    pub fn platform(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Platform, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientPoll, message)
    }

    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted, "the deployment was aborted")
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_action(mut self, action: impl std::fmt::Display) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the failure must stop the run for a resource with the given
    /// optional flag. Failures on optional resources become warnings, except
    /// for content errors and aborts, which are never downgraded.
    pub fn is_fatal_for(&self, optional: bool) -> bool {
        match self.kind {
            ErrorKind::Content | ErrorKind::Aborted => true,
            _ => !optional,
        }
    }

    /// Whether the step should end in RETRY rather than FAILED.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout | ErrorKind::TransientPoll)
    }
}

pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_IMPLEMENTED: u16 = 501;
pub const STATUS_BAD_GATEWAY: u16 = 502;

/// Result type for deployment operations
pub type DeployResult<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_resource_and_action() {
        let err = DeployError::content("service is associated with other applications")
            .with_resource("db")
            .with_action("create");
        assert_eq!(
            err.to_string(),
            "content error (create db): service is associated with other applications"
        );

        let err = DeployError::platform("rejected");
        assert_eq!(err.to_string(), "platform error: rejected");
    }

    #[test]
    fn test_optional_downgrade() {
        assert!(!DeployError::platform("x").is_fatal_for(true));
        assert!(DeployError::platform("x").is_fatal_for(false));
        assert!(DeployError::content("x").is_fatal_for(true));
        assert!(DeployError::timeout("x").is_retryable());
        assert!(!DeployError::platform("x").is_retryable());
    }
}
