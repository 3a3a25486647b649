//! Step contract and the context a step runs in

use crate::logger::StepLogger;
use crate::store::{keys, RunVariables};
use async_trait::async_trait;
use mta_platform::{PlatformMutator, PlatformReader};
use mta_polling::{LogSink, PollingEngine};
use mta_types::{
    DeployError, DeployResult, DeployedPackage, DeploymentPolicy, DesiredState, PollingConfig,
    StepOutcome, StepPhase,
};
use std::sync::Arc;

/// Trait for deployment steps.
///
/// A step is re-entered on every tick until it reports something other than
/// [`StepOutcome::Poll`]. Everything it needs to resume must be kept in the
/// run variables.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable name, used to key the execution record
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &StepContext<'_>) -> DeployResult<StepOutcome>;
}

/// Dependencies shared by every step of a runner.
pub struct StepServices {
    pub reader: Arc<dyn PlatformReader>,
    pub mutator: Arc<dyn PlatformMutator>,
    pub engine: PollingEngine,
    pub policy: DeploymentPolicy,
    pub polling: PollingConfig,
}

impl StepServices {
    pub fn new(
        reader: Arc<dyn PlatformReader>,
        mutator: Arc<dyn PlatformMutator>,
        sink: Arc<dyn LogSink>,
        policy: DeploymentPolicy,
        polling: PollingConfig,
    ) -> Self {
        let engine = PollingEngine::new(reader.clone(), sink);
        Self {
            reader,
            mutator,
            engine,
            policy,
            polling,
        }
    }
}

/// Context of one step attempt.
pub struct StepContext<'a> {
    pub services: &'a StepServices,
    pub vars: RunVariables,
    pub log: StepLogger,
    phase: StepPhase,
}

impl<'a> StepContext<'a> {
    pub fn new(
        services: &'a StepServices,
        vars: RunVariables,
        log: StepLogger,
        phase: StepPhase,
    ) -> Self {
        Self {
            services,
            vars,
            log,
            phase,
        }
    }

    /// Phase the step was entered in
    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    pub fn reader(&self) -> &dyn PlatformReader {
        self.services.reader.as_ref()
    }

    pub fn mutator(&self) -> &dyn PlatformMutator {
        self.services.mutator.as_ref()
    }

    pub fn policy(&self) -> &DeploymentPolicy {
        &self.services.policy
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.services.polling
    }

    pub fn engine(&self) -> &PollingEngine {
        &self.services.engine
    }

    /// Whether an operator aborted the run.
    pub async fn aborted(&self) -> bool {
        self.vars.flag(keys::ABORTED).await.unwrap_or(false)
    }

    pub async fn desired_state(&self) -> DeployResult<DesiredState> {
        self.vars
            .get::<DesiredState>(keys::DESIRED_STATE)
            .await?
            .ok_or_else(|| DeployError::content("The run has no desired state"))
    }

    pub async fn deployed_package(&self) -> DeployResult<Option<DeployedPackage>> {
        Ok(self
            .vars
            .get::<Option<DeployedPackage>>(keys::DEPLOYED_PACKAGE)
            .await?
            .flatten())
    }
}
