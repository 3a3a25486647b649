//! Error types for the control layer

use mta_types::{DeployError, RunId};
use thiserror::Error;

/// Failure of a variable or progress store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for DeployError {
    fn from(err: StoreError) -> Self {
        DeployError::platform(format!("variable store: {err}"))
    }
}

/// Errors surfaced by the deployment runner.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown run: {0}")]
    UnknownRun(RunId),

    #[error("run {run_id} did not complete within {max_ticks} ticks")]
    TickLimit { run_id: RunId, max_ticks: u64 },

    #[error("run {0} was aborted and cannot be resumed")]
    Aborted(RunId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Deploy(#[from] DeployError),
}

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, ControlError>;
