use super::{delete_service_instance, tolerate_optional, PlatformResultExt};
use crate::step::{Step, StepContext};
use crate::store::keys;
use async_trait::async_trait;
use chrono::Utc;
use mta_polling::{PollOutcome, Probe, ServiceOperationProbe};
use mta_reconcile::{ServiceKeyPlan, ServiceReconciler};
use mta_types::{
    DeployResult, DesiredService, OperationHandle, OperationKind, ServiceAction, StepOutcome,
    StepPhase,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ServiceCursor {
    index: usize,
    #[serde(default)]
    pending: Option<PendingServiceOperation>,
}

/// Asynchronous operation on the current service, with the key changes to
/// apply once it finished.
#[derive(Debug, Serialize, Deserialize)]
struct PendingServiceOperation {
    handle: OperationHandle,
    keys: ServiceKeyPlan,
    /// Instance to create once the pending delete settled
    #[serde(default)]
    recreate: Option<DesiredService>,
}

impl PendingServiceOperation {
    fn start(
        ctx: &StepContext<'_>,
        name: &str,
        keys: ServiceKeyPlan,
        recreate: Option<DesiredService>,
    ) -> Self {
        let handle = OperationHandle::start(
            OperationKind::ServiceOperation,
            name,
            ctx.polling().timeout_for(OperationKind::ServiceOperation),
            Utc::now(),
        );
        Self {
            handle,
            keys,
            recreate,
        }
    }
}

enum ServiceProgress {
    Pending(PendingServiceOperation),
    Done,
    Retry(String),
}

/// Converges every declared service instance and its keys, one at a time.
pub struct DeployServicesStep;

#[async_trait]
impl Step for DeployServicesStep {
    fn name(&self) -> &'static str {
        "deploy-services"
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> DeployResult<StepOutcome> {
        let desired = ctx.desired_state().await?;
        let mut cursor = match ctx.phase() {
            StepPhase::Execute => ServiceCursor::default(),
            _ => ctx
                .vars
                .get::<ServiceCursor>(keys::SERVICE_CURSOR)
                .await?
                .unwrap_or_default(),
        };
        let resume_poll = ctx.phase() == StepPhase::Poll;

        while let Some(service) = desired.services.get(cursor.index) {
            let progress = match cursor.pending.take() {
                Some(pending) if resume_poll => self.poll(ctx, service, pending).await,
                _ => self.deploy(ctx, service).await,
            };
            let progress = match progress {
                Ok(progress) => progress,
                Err(err) => {
                    tolerate_optional(ctx, err, service.optional).await?;
                    ServiceProgress::Done
                }
            };

            match progress {
                ServiceProgress::Done => cursor.index += 1,
                ServiceProgress::Pending(pending) => {
                    cursor.pending = Some(pending);
                    ctx.vars.set(keys::SERVICE_CURSOR, &cursor).await?;
                    return Ok(StepOutcome::Poll);
                }
                ServiceProgress::Retry(message) => {
                    ctx.vars.set(keys::SERVICE_CURSOR, &cursor).await?;
                    return Ok(StepOutcome::Retry { message });
                }
            }
        }

        ctx.vars.remove(keys::SERVICE_CURSOR).await?;
        Ok(StepOutcome::Done)
    }
}

impl DeployServicesStep {
    async fn deploy(
        &self,
        ctx: &StepContext<'_>,
        service: &DesiredService,
    ) -> DeployResult<ServiceProgress> {
        let name = service.name.as_str();
        let existing = ctx
            .reader()
            .get_service_instance(name)
            .await
            .for_resource(name, "get")?;
        let existing_keys = match (&existing, service.user_provided) {
            (Some(_), false) => ctx
                .reader()
                .list_service_keys(name)
                .await
                .for_resource(name, "list keys")?,
            _ => Vec::new(),
        };
        let default_tags = match (&service.label, service.user_provided) {
            (Some(label), false) => ctx
                .reader()
                .get_default_tags(label)
                .await
                .for_resource(name, "get default tags")?,
            _ => Vec::new(),
        };

        let reconciler = ServiceReconciler::new(ctx.policy().clone());
        let decision =
            reconciler.decide(service, existing.as_ref(), &existing_keys, &default_tags);
        for warning in &decision.warnings {
            ctx.log.warn(warning.clone()).await;
        }
        if decision.actions.is_empty() {
            ctx.log
                .info(format!("Service {name} is up to date"))
                .await;
            return Ok(ServiceProgress::Done);
        }
        ctx.log
            .info(format!("Service {name}: {}", decision.actions))
            .await;

        let mut to_create = service.clone();
        to_create.tags = ServiceReconciler::effective_tags(service, &default_tags);
        let mutator = ctx.mutator();
        let mut asynchronous = false;

        for action in decision.actions.iter() {
            match action {
                ServiceAction::Create => {
                    mutator
                        .create_service(&to_create)
                        .await
                        .for_resource(name, action)?;
                    asynchronous = true;
                }
                ServiceAction::Recreate => {
                    delete_service_instance(ctx, name).await?;
                    if !service.user_provided {
                        ctx.log
                            .info(format!("Waiting for service {name} to be deleted"))
                            .await;
                        return Ok(ServiceProgress::Pending(PendingServiceOperation::start(
                            ctx,
                            name,
                            decision.keys.clone(),
                            Some(to_create.clone()),
                        )));
                    }
                    mutator
                        .create_service(&to_create)
                        .await
                        .for_resource(name, action)?;
                }
                ServiceAction::UpdatePlan => {
                    if let Some(plan) = &service.plan {
                        mutator
                            .update_service_plan(name, plan)
                            .await
                            .for_resource(name, action)?;
                        asynchronous = true;
                    }
                }
                ServiceAction::UpdateTags => {
                    mutator
                        .update_service_tags(name, &to_create.tags)
                        .await
                        .for_resource(name, action)?;
                    asynchronous = true;
                }
                ServiceAction::UpdateCredentials => {
                    mutator
                        .update_service_credentials(name, &service.credentials)
                        .await
                        .for_resource(name, action)?;
                    asynchronous = true;
                }
                ServiceAction::UpdateSyslogDrainUrl => {
                    if let Some(url) = &service.syslog_drain_url {
                        mutator
                            .update_service_syslog_drain_url(name, url)
                            .await
                            .for_resource(name, action)?;
                    }
                }
                ServiceAction::Delete | ServiceAction::UpdateKeys => {}
            }
        }

        if asynchronous && !service.user_provided {
            return Ok(ServiceProgress::Pending(PendingServiceOperation::start(
                ctx,
                name,
                decision.keys,
                None,
            )));
        }

        self.apply_keys(ctx, name, &decision.keys).await?;
        Ok(ServiceProgress::Done)
    }

    async fn poll(
        &self,
        ctx: &StepContext<'_>,
        service: &DesiredService,
        mut pending: PendingServiceOperation,
    ) -> DeployResult<ServiceProgress> {
        let probes: Vec<Box<dyn Probe>> = vec![Box::new(ServiceOperationProbe::new(
            ctx.services.reader.clone(),
            service.optional,
        ))];
        let report = ctx
            .engine()
            .tick(&mut pending.handle, &probes, ctx.aborted().await)
            .await;
        let failed = !report.warnings.is_empty();
        for warning in report.warnings {
            ctx.log.warn(warning).await;
        }

        let name = service.name.as_str();
        match report.outcome {
            PollOutcome::Running => Ok(ServiceProgress::Pending(pending)),
            PollOutcome::Finished if failed => {
                ctx.log
                    .warn(format!(
                        "Skipping remaining operations on optional service {name}"
                    ))
                    .await;
                Ok(ServiceProgress::Done)
            }
            PollOutcome::Finished => match pending.recreate.take() {
                Some(to_create) => {
                    ctx.mutator()
                        .create_service(&to_create)
                        .await
                        .for_resource(name, ServiceAction::Recreate)?;
                    Ok(ServiceProgress::Pending(PendingServiceOperation::start(
                        ctx,
                        name,
                        pending.keys,
                        None,
                    )))
                }
                None => {
                    self.apply_keys(ctx, name, &pending.keys).await?;
                    ctx.log.info(format!("Service {name} is ready")).await;
                    Ok(ServiceProgress::Done)
                }
            },
            PollOutcome::Error(err) => Err(err),
            PollOutcome::Retry(message) => Ok(ServiceProgress::Retry(message)),
        }
    }

    async fn apply_keys(
        &self,
        ctx: &StepContext<'_>,
        service_name: &str,
        plan: &ServiceKeyPlan,
    ) -> DeployResult<()> {
        let mutator = ctx.mutator();
        for key in &plan.to_delete {
            mutator
                .delete_service_key(service_name, key)
                .await
                .for_resource(key, "delete key")?;
        }
        for key in &plan.to_recreate {
            mutator
                .delete_service_key(service_name, &key.name)
                .await
                .for_resource(&key.name, "delete key")?;
            mutator
                .create_service_key(service_name, key)
                .await
                .for_resource(&key.name, "create key")?;
        }
        for key in &plan.to_create {
            mutator
                .create_service_key(service_name, key)
                .await
                .for_resource(&key.name, "create key")?;
        }
        if plan.has_changes() {
            ctx.log
                .info(format!("Updated keys of service {service_name}"))
                .await;
        }
        Ok(())
    }
}
