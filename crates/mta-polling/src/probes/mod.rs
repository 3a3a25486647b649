//! Probes for asynchronous platform operations
//!
//! A probe observes one aspect of an operation (staging, instance startup,
//! execution markers, a service last operation) and reports whether it is
//! still running, finished or failed. Probes are read-only: they never
//! mutate the platform. A probe may keep its own scan position in the
//! operation handle.

mod execute;
mod service_operation;
mod stage;
mod start;

pub use execute::{ExecuteProbe, LogMarker};
pub use service_operation::ServiceOperationProbe;
pub use stage::StageProbe;
pub use start::StartProbe;

use async_trait::async_trait;
use mta_types::{DeployResult, OperationHandle};

/// Status reported by a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Not done yet; probe again on the next tick
    Running,
    /// Done; the chain may advance
    Finished,
    /// Done, but with a problem the run tolerates
    FinishedWithWarning(String),
    /// Failed; the chain stops
    Error(String),
}

impl ProbeStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ProbeStatus::Finished | ProbeStatus::FinishedWithWarning(_)
        )
    }
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeStatus::Running => write!(f, "running"),
            ProbeStatus::Finished => write!(f, "finished"),
            ProbeStatus::FinishedWithWarning(_) => write!(f, "finished with warning"),
            ProbeStatus::Error(_) => write!(f, "error"),
        }
    }
}

/// Trait for operation probes.
///
/// An `Err` with kind `TransientPoll` is retried on the next tick; any other
/// error stops the chain.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Probe name for logging
    fn name(&self) -> &str;

    /// Observe the operation once.
    async fn check(&self, handle: &mut OperationHandle) -> DeployResult<ProbeStatus>;
}

/// Probe whose statuses are scripted in advance. Used by tests.
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct ScriptedProbe {
        name: String,
        script: Mutex<VecDeque<DeployResult<ProbeStatus>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        pub fn new(name: &str, script: Vec<DeployResult<ProbeStatus>>) -> Self {
            Self {
                name: name.to_string(),
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn check(&self, _handle: &mut OperationHandle) -> DeployResult<ProbeStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }
}
