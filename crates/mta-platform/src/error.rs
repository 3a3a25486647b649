//! Platform error types

use mta_types::{DeployError, ErrorKind};

pub use mta_types::{STATUS_BAD_GATEWAY, STATUS_FORBIDDEN, STATUS_NOT_IMPLEMENTED};
use thiserror::Error;

/// A request to the platform failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Platform unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        PlatformError::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::rejected(STATUS_FORBIDDEN, message)
    }

    /// HTTP-like status code of the failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            PlatformError::NotFound(_) => Some(404),
            PlatformError::AlreadyExists(_) => Some(409),
            PlatformError::Rejected { status, .. } => Some(*status),
            PlatformError::Unavailable(_) => None,
        }
    }

    /// Failures that may go away on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Unavailable(_))
    }
}

impl From<PlatformError> for DeployError {
    fn from(err: PlatformError) -> Self {
        let kind = if err.is_transient() {
            ErrorKind::TransientPoll
        } else {
            ErrorKind::Platform
        };
        let status = err.status();
        let mut deploy_error = DeployError::new(kind, err.to_string());
        deploy_error.status = status;
        deploy_error
    }
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_keeps_status_and_kind() {
        let err: DeployError = PlatformError::forbidden("no permission").into();
        assert_eq!(err.kind, ErrorKind::Platform);
        assert_eq!(err.status, Some(STATUS_FORBIDDEN));

        let err: DeployError = PlatformError::Unavailable("gateway".into()).into();
        assert_eq!(err.kind, ErrorKind::TransientPoll);
        assert!(err.is_retryable());
    }
}
