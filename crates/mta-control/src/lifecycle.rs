//! Step lifecycle coordination
//!
//! Every step runs inside the same envelope: the abort flag is checked before
//! and after the step, the execution record is advanced, progress messages of
//! a failed attempt are discarded before the step runs again, and the outcome
//! is persisted so the next tick knows how to re-enter the step.

use crate::error::StoreResult;
use crate::logger::StepLogger;
use crate::step::{Step, StepContext, StepServices};
use crate::store::{keys, ProgressStore, RunVariables, VariableStore};
use mta_types::{
    DeployError, DeployResult, ErrorKind, RunId, StepExecutionRecord, StepOutcome, StepPhase,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Wraps step execution with persistence, cleanup and abort checks.
pub struct StepLifecycleCoordinator {
    variables: Arc<dyn VariableStore>,
    progress: Arc<dyn ProgressStore>,
}

impl StepLifecycleCoordinator {
    pub fn new(variables: Arc<dyn VariableStore>, progress: Arc<dyn ProgressStore>) -> Self {
        Self {
            variables,
            progress,
        }
    }

    fn vars(&self, run_id: RunId) -> RunVariables {
        RunVariables::new(self.variables.clone(), run_id)
    }

    pub async fn is_aborted(&self, run_id: RunId) -> StoreResult<bool> {
        self.vars(run_id).flag(keys::ABORTED).await
    }

    /// Request a cooperative abort of the run.
    pub async fn abort(&self, run_id: RunId) -> StoreResult<()> {
        info!(run_id = %run_id, "Abort requested");
        self.vars(run_id).set(keys::ABORTED, &true).await
    }

    pub async fn record(
        &self,
        run_id: RunId,
        step_name: &str,
    ) -> StoreResult<Option<StepExecutionRecord>> {
        self.vars(run_id).get(&keys::step_record(step_name)).await
    }

    /// Prepare the execution record for an attempt of the step.
    ///
    /// The index increments only on fresh entries. A previous attempt that
    /// ended in error keeps its index; its progress messages and stored error
    /// classification are removed first.
    pub async fn begin(&self, run_id: RunId, step_name: &str) -> StoreResult<StepExecutionRecord> {
        let vars = self.vars(run_id);
        let key = keys::step_record(step_name);
        let mut record = vars
            .get::<StepExecutionRecord>(&key)
            .await?
            .unwrap_or_else(|| StepExecutionRecord::new(step_name));

        if record.in_error() {
            let removed = self
                .progress
                .delete_step(&run_id, step_name, record.index)
                .await?;
            debug!(
                run_id = %run_id,
                step = step_name,
                index = record.index,
                removed,
                "Discarded progress of failed attempt"
            );
            record.error_kind = None;
        } else if !record.phase.is_continuation() {
            record.index += 1;
            record.phase = StepPhase::Execute;
        }

        vars.set(&key, &record).await?;
        Ok(record)
    }

    /// Persist the outcome of an attempt.
    pub async fn complete(
        &self,
        run_id: RunId,
        record: &mut StepExecutionRecord,
        outcome: &StepOutcome,
    ) -> StoreResult<()> {
        match outcome {
            StepOutcome::Done => {
                record.phase = StepPhase::Done;
                record.retry_message = None;
            }
            StepOutcome::Poll => {
                record.phase = StepPhase::Poll;
            }
            StepOutcome::Retry { message } => {
                record.phase = StepPhase::Retry;
                record.retry_message = Some(message.clone());
                record.error_kind = Some(ErrorKind::Timeout);
            }
            StepOutcome::Failed { kind, message } => {
                record.phase = StepPhase::Retry;
                record.retry_message = Some(message.clone());
                record.error_kind = Some(*kind);
            }
        }
        self.vars(run_id)
            .set(&keys::step_record(&record.step_name), record)
            .await
    }

    /// Run one attempt of a step.
    #[instrument(skip(self, step, services), fields(step = step.name()))]
    pub async fn execute(
        &self,
        run_id: RunId,
        step: &dyn Step,
        services: &StepServices,
    ) -> DeployResult<StepOutcome> {
        let mut record = self.begin(run_id, step.name()).await?;

        let outcome = if self.is_aborted(run_id).await? {
            StepOutcome::failed(&DeployError::aborted())
        } else {
            let log = StepLogger::new(self.progress.clone(), run_id, step.name(), record.index);
            let ctx = StepContext::new(services, self.vars(run_id), log.clone(), record.phase);

            let outcome = match step.execute(&ctx).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    log.error(err.to_string()).await;
                    if err.is_retryable() {
                        StepOutcome::Retry {
                            message: err.to_string(),
                        }
                    } else {
                        StepOutcome::failed(&err)
                    }
                }
            };

            if self.is_aborted(run_id).await? {
                StepOutcome::failed(&DeployError::aborted())
            } else {
                outcome
            }
        };

        debug!(run_id = %run_id, index = record.index, outcome = %outcome, "Step attempt finished");
        self.complete(run_id, &mut record, &outcome).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryProgressStore, InMemoryVariableStore, ProgressLevel};
    use async_trait::async_trait;
    use mta_platform::InMemoryPlatform;
    use mta_polling::MemoryLogSink;
    use mta_types::{DeploymentPolicy, PollingConfig};
    use std::sync::Mutex;

    struct ScriptedStep {
        outcomes: Mutex<Vec<DeployResult<StepOutcome>>>,
        phases: Mutex<Vec<StepPhase>>,
    }

    impl ScriptedStep {
        fn new(mut outcomes: Vec<DeployResult<StepOutcome>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                phases: Mutex::new(Vec::new()),
            }
        }

        fn phases(&self) -> Vec<StepPhase> {
            self.phases.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Step for ScriptedStep {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, ctx: &StepContext<'_>) -> DeployResult<StepOutcome> {
            self.phases.lock().unwrap().push(ctx.phase());
            ctx.log.info("working").await;
            self.outcomes.lock().unwrap().pop().unwrap_or(Ok(StepOutcome::Done))
        }
    }

    fn fixture() -> (StepLifecycleCoordinator, Arc<InMemoryProgressStore>, StepServices) {
        let progress = Arc::new(InMemoryProgressStore::new());
        let coordinator =
            StepLifecycleCoordinator::new(Arc::new(InMemoryVariableStore::new()), progress.clone());
        let platform = Arc::new(InMemoryPlatform::new());
        let services = StepServices::new(
            platform.clone(),
            platform,
            Arc::new(MemoryLogSink::new()),
            DeploymentPolicy::default(),
            PollingConfig::default(),
        );
        (coordinator, progress, services)
    }

    #[tokio::test]
    async fn test_index_increments_only_on_fresh_entry() {
        let (coordinator, _, services) = fixture();
        let run = RunId::generate();
        let step = ScriptedStep::new(vec![
            Ok(StepOutcome::Poll),
            Ok(StepOutcome::Poll),
            Ok(StepOutcome::Done),
            Ok(StepOutcome::Done),
        ]);

        for _ in 0..3 {
            coordinator.execute(run, &step, &services).await.unwrap();
        }
        let record = coordinator.record(run, "scripted").await.unwrap().unwrap();
        assert_eq!(record.index, 1);
        assert_eq!(record.phase, StepPhase::Done);
        assert_eq!(
            step.phases(),
            vec![StepPhase::Execute, StepPhase::Poll, StepPhase::Poll]
        );

        coordinator.execute(run, &step, &services).await.unwrap();
        let record = coordinator.record(run, "scripted").await.unwrap().unwrap();
        assert_eq!(record.index, 2);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_cleaned_before_rerun() {
        let (coordinator, progress, services) = fixture();
        let run = RunId::generate();
        let step = ScriptedStep::new(vec![
            Err(DeployError::platform("rejected")),
            Ok(StepOutcome::Done),
        ]);

        let outcome = coordinator.execute(run, &step, &services).await.unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Failed { kind: ErrorKind::Platform, .. }
        ));
        let record = coordinator.record(run, "scripted").await.unwrap().unwrap();
        assert_eq!(record.error_kind, Some(ErrorKind::Platform));
        assert!(record.retry_message.is_some());
        let messages = progress.list(&run).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].level, ProgressLevel::Error);

        let outcome = coordinator.execute(run, &step, &services).await.unwrap();
        assert_eq!(outcome, StepOutcome::Done);
        let record = coordinator.record(run, "scripted").await.unwrap().unwrap();
        assert_eq!(record.index, 1);
        assert_eq!(record.error_kind, None);
        assert_eq!(record.retry_message, None);
        assert_eq!(step.phases(), vec![StepPhase::Execute, StepPhase::Retry]);

        let messages = progress.list(&run).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].level, ProgressLevel::Info);
    }

    #[tokio::test]
    async fn test_timeout_becomes_retry() {
        let (coordinator, _, services) = fixture();
        let run = RunId::generate();
        let step = ScriptedStep::new(vec![Err(DeployError::timeout("too slow"))]);

        let outcome = coordinator.execute(run, &step, &services).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Retry { .. }));
    }

    #[tokio::test]
    async fn test_abort_is_checked_before_the_step() {
        let (coordinator, _, services) = fixture();
        let run = RunId::generate();
        let step = ScriptedStep::new(vec![Ok(StepOutcome::Done)]);

        coordinator.abort(run).await.unwrap();
        let outcome = coordinator.execute(run, &step, &services).await.unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Failed { kind: ErrorKind::Aborted, .. }
        ));
        assert!(step.phases().is_empty());
    }
}
