//! Deployment runner
//!
//! Drives the steps of a run tick by tick. The runner keeps no state of its
//! own: the cursor, status and tick count live in the variable store, so a
//! run can be resumed by any runner sharing the same stores.

use crate::error::{ControlError, Result};
use crate::lifecycle::StepLifecycleCoordinator;
use crate::step::{Step, StepServices};
use crate::steps::standard_steps;
use crate::store::{keys, ProgressMessage, ProgressStore, RunVariables, VariableStore};
use mta_types::{DesiredState, ErrorKind, RunId, StepOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Tick pacing of [`DeploymentRunner::run_to_completion`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between ticks that did not advance the run
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Give up after this many ticks
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

fn default_tick_interval_ms() -> u64 {
    5000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_ticks: None,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Where a run stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Stopped at a step that may succeed when resumed
    Retry { step: String, message: String },
    /// Stopped at a step that needs operator action
    Failed {
        step: String,
        kind: ErrorKind,
        message: String,
    },
    Aborted,
    Completed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Retry { step, .. } => write!(f, "retry at {step}"),
            RunStatus::Failed { step, kind, .. } => write!(f, "failed at {step} ({kind})"),
            RunStatus::Aborted => write!(f, "aborted"),
            RunStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Persisted state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Index of the current step
    pub cursor: usize,
    pub status: RunStatus,
    pub ticks: u64,
}

/// Runs deployment steps in order, one attempt per tick.
pub struct DeploymentRunner {
    steps: Vec<Box<dyn Step>>,
    services: StepServices,
    variables: Arc<dyn VariableStore>,
    progress: Arc<dyn ProgressStore>,
    coordinator: StepLifecycleCoordinator,
}

impl DeploymentRunner {
    /// Runner with the standard deployment pipeline.
    pub fn new(
        services: StepServices,
        variables: Arc<dyn VariableStore>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self::with_steps(standard_steps(), services, variables, progress)
    }

    pub fn with_steps(
        steps: Vec<Box<dyn Step>>,
        services: StepServices,
        variables: Arc<dyn VariableStore>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        let coordinator = StepLifecycleCoordinator::new(variables.clone(), progress.clone());
        Self {
            steps,
            services,
            variables,
            progress,
            coordinator,
        }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    fn vars(&self, run_id: RunId) -> RunVariables {
        RunVariables::new(self.variables.clone(), run_id)
    }

    /// Register a new run for the desired state.
    pub async fn start(&self, desired: &DesiredState) -> Result<RunId> {
        let run_id = RunId::generate();
        let vars = self.vars(run_id);
        vars.set(keys::DESIRED_STATE, desired).await?;
        vars.set(
            keys::RUN_STATE,
            &RunState {
                cursor: 0,
                status: RunStatus::Running,
                ticks: 0,
            },
        )
        .await?;
        info!(
            run_id = %run_id,
            package_id = %desired.package_id,
            steps = self.steps.len(),
            "Deployment run started"
        );
        Ok(run_id)
    }

    pub async fn state(&self, run_id: RunId) -> Result<RunState> {
        self.vars(run_id)
            .get::<RunState>(keys::RUN_STATE)
            .await?
            .ok_or(ControlError::UnknownRun(run_id))
    }

    async fn save(&self, run_id: RunId, state: &RunState) -> Result<()> {
        self.vars(run_id).set(keys::RUN_STATE, state).await?;
        Ok(())
    }

    /// Execute one attempt of the current step and advance the run.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn tick(&self, run_id: RunId) -> Result<RunState> {
        let mut state = self.state(run_id).await?;
        if state.status.is_terminal() {
            return Ok(state);
        }

        let step = match self.steps.get(state.cursor) {
            Some(step) => step,
            None => {
                state.status = RunStatus::Completed;
                self.save(run_id, &state).await?;
                return Ok(state);
            }
        };
        let step_name = step.name().to_string();

        let outcome = self
            .coordinator
            .execute(run_id, step.as_ref(), &self.services)
            .await;

        match outcome {
            Ok(StepOutcome::Done) => {
                state.cursor += 1;
                if state.cursor >= self.steps.len() {
                    state.status = RunStatus::Completed;
                    info!("Deployment run completed");
                }
            }
            Ok(StepOutcome::Poll) => {}
            Ok(StepOutcome::Retry { message }) => {
                warn!(step = %step_name, %message, "Step needs to be retried");
                state.status = RunStatus::Retry {
                    step: step_name,
                    message,
                };
            }
            Ok(StepOutcome::Failed {
                kind: ErrorKind::Aborted,
                ..
            }) => {
                warn!(step = %step_name, "Deployment run aborted");
                state.status = RunStatus::Aborted;
            }
            Ok(StepOutcome::Failed { kind, message }) => {
                warn!(step = %step_name, %kind, %message, "Step failed");
                state.status = RunStatus::Failed {
                    step: step_name,
                    kind,
                    message,
                };
            }
            Err(err) => {
                warn!(step = %step_name, error = %err, "Step could not be executed");
                state.status = RunStatus::Failed {
                    step: step_name,
                    kind: err.kind,
                    message: err.to_string(),
                };
            }
        }

        state.ticks += 1;
        self.save(run_id, &state).await?;
        Ok(state)
    }

    /// Continue a run that stopped in retry or failure at the same step.
    pub async fn resume(&self, run_id: RunId) -> Result<RunState> {
        let mut state = self.state(run_id).await?;
        match state.status {
            RunStatus::Aborted => return Err(ControlError::Aborted(run_id)),
            RunStatus::Retry { .. } | RunStatus::Failed { .. } => {
                info!(run_id = %run_id, cursor = state.cursor, "Resuming deployment run");
                state.status = RunStatus::Running;
                self.save(run_id, &state).await?;
            }
            RunStatus::Running | RunStatus::Completed => {}
        }
        Ok(state)
    }

    /// Request a cooperative abort; the current step notices it on its next
    /// attempt.
    pub async fn abort(&self, run_id: RunId) -> Result<()> {
        self.state(run_id).await?;
        self.coordinator.abort(run_id).await?;
        Ok(())
    }

    /// Tick until the run leaves the running status.
    pub async fn run_to_completion(
        &self,
        run_id: RunId,
        config: &SchedulerConfig,
    ) -> Result<RunState> {
        loop {
            let before = self.state(run_id).await?;
            let state = self.tick(run_id).await?;
            if state.status.is_terminal() {
                return Ok(state);
            }
            if let Some(max_ticks) = config.max_ticks {
                if state.ticks >= max_ticks {
                    return Err(ControlError::TickLimit { run_id, max_ticks });
                }
            }
            if state.cursor == before.cursor {
                tokio::time::sleep(config.tick_interval()).await;
            }
        }
    }

    /// Progress messages recorded for the run.
    pub async fn progress(&self, run_id: RunId) -> Result<Vec<ProgressMessage>> {
        Ok(self.progress.list(&run_id).await?)
    }
}
