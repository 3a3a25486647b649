//! Step phases, outcomes and execution records

use crate::error::{DeployError, ErrorKind};
use serde::{Deserialize, Serialize};

/// Phase a step is in between two scheduler ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    /// Fresh entry
    Execute,
    /// Waiting on an asynchronous operation
    Poll,
    /// Re-run after a failure
    Retry,
    /// Waiting for an external signal
    Wait,
    Done,
}

impl StepPhase {
    /// Re-entries that continue the previous attempt instead of starting a new one.
    pub fn is_continuation(&self) -> bool {
        matches!(self, StepPhase::Poll | StepPhase::Retry | StepPhase::Wait)
    }
}

impl Default for StepPhase {
    fn default() -> Self {
        StepPhase::Execute
    }
}

impl std::fmt::Display for StepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepPhase::Execute => write!(f, "execute"),
            StepPhase::Poll => write!(f, "poll"),
            StepPhase::Retry => write!(f, "retry"),
            StepPhase::Wait => write!(f, "wait"),
            StepPhase::Done => write!(f, "done"),
        }
    }
}

/// What a step reports to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StepOutcome {
    Done,
    Poll,
    Retry { message: String },
    Failed { kind: ErrorKind, message: String },
}

impl StepOutcome {
    pub fn failed(error: &DeployError) -> Self {
        StepOutcome::Failed {
            kind: error.kind,
            message: error.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepOutcome::Poll)
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Done => write!(f, "done"),
            StepOutcome::Poll => write!(f, "poll"),
            StepOutcome::Retry { message } => write!(f, "retry: {message}"),
            StepOutcome::Failed { kind, message } => write!(f, "failed ({kind}): {message}"),
        }
    }
}

/// Persisted identity and phase of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    pub step_name: String,

    /// Keys progress records of the current attempt
    pub index: u32,

    pub phase: StepPhase,

    #[serde(default)]
    pub retry_message: Option<String>,

    /// Classification of the last failure, cleared on the next attempt
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
}

impl StepExecutionRecord {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            index: 0,
            phase: StepPhase::Execute,
            retry_message: None,
            error_kind: None,
        }
    }

    pub fn in_error(&self) -> bool {
        self.error_kind.is_some()
    }
}
