use crate::step::{Step, StepContext};
use crate::store::keys;
use async_trait::async_trait;
use chrono::Utc;
use mta_polling::find_operations_in_progress;
use mta_types::{
    DeployError, DeployResult, DesiredState, OperationHandle, OperationKind, StepOutcome,
    StepPhase,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct PendingOperations {
    services: Vec<String>,
    handle: OperationHandle,
}

/// Waits until no declared service has an operation in progress.
///
/// Only operations observed in progress when the step started are waited
/// for; a failure of one of them is an error unless the service is optional.
pub struct WaitForServiceOperationsStep;

#[async_trait]
impl Step for WaitForServiceOperationsStep {
    fn name(&self) -> &'static str {
        "wait-for-service-operations"
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> DeployResult<StepOutcome> {
        let desired = ctx.desired_state().await?;

        let pending = match ctx.phase() {
            StepPhase::Poll => ctx
                .vars
                .get::<PendingOperations>(keys::SERVICES_IN_PROGRESS)
                .await?,
            _ => None,
        };

        let pending = match pending {
            Some(pending) => pending,
            None => {
                let names: Vec<String> = desired.services.iter().map(|s| s.name.clone()).collect();
                let report = find_operations_in_progress(ctx.reader(), &names).await?;
                if !report.has_pending() {
                    ctx.vars.remove(keys::SERVICES_IN_PROGRESS).await?;
                    return Ok(StepOutcome::Done);
                }
                ctx.log
                    .info(format!(
                        "Waiting for service operations in progress: {}",
                        report.in_progress.join(", ")
                    ))
                    .await;
                let handle = OperationHandle::start(
                    OperationKind::ServiceOperation,
                    desired.package_id.as_str(),
                    ctx.polling().timeout_for(OperationKind::ServiceOperation),
                    Utc::now(),
                );
                let pending = PendingOperations {
                    services: report.in_progress,
                    handle,
                };
                ctx.vars.set(keys::SERVICES_IN_PROGRESS, &pending).await?;
                return Ok(StepOutcome::Poll);
            }
        };

        self.poll(ctx, &desired, pending).await
    }
}

impl WaitForServiceOperationsStep {
    async fn poll(
        &self,
        ctx: &StepContext<'_>,
        desired: &DesiredState,
        mut pending: PendingOperations,
    ) -> DeployResult<StepOutcome> {
        let report = find_operations_in_progress(ctx.reader(), &pending.services).await?;

        for (name, operation) in &report.failed {
            let optional = desired.find_service(name).map(|s| s.optional).unwrap_or(false);
            let message = format!("Operation \"{operation}\" on service {name} failed");
            if optional {
                ctx.log.warn(message).await;
            } else {
                return Err(DeployError::platform(message).with_resource(name));
            }
        }

        if !report.has_pending() {
            ctx.vars.remove(keys::SERVICES_IN_PROGRESS).await?;
            return Ok(StepOutcome::Done);
        }

        if pending.handle.is_expired(Utc::now()) {
            return Ok(StepOutcome::Retry {
                message: format!(
                    "Service operations still in progress: {}",
                    report.in_progress.join(", ")
                ),
            });
        }

        pending.services = report.in_progress;
        ctx.vars.set(keys::SERVICES_IN_PROGRESS, &pending).await?;
        Ok(StepOutcome::Poll)
    }
}
