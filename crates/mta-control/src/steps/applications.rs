use super::{tolerate_optional, PlatformResultExt};
use crate::step::{Step, StepContext};
use crate::store::keys;
use async_trait::async_trait;
use chrono::Utc;
use mta_polling::{ExecuteProbe, PollOutcome, Probe, StageProbe, StartProbe};
use mta_reconcile::{inject_service_keys, ApplicationDiff, ApplicationStateReconciler, ChangeFlags};
use mta_types::{
    ActionSet, ApplicationColor, ApplicationStartupState, ApplicationStateAction, DeployResult,
    DesiredApplication, DesiredState, ExistingApplication, OperationHandle, OperationKind,
    OwnershipMetadata, ServiceBinding, StepOutcome, StepPhase,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApplicationCursor {
    index: usize,
    #[serde(default)]
    pending: Option<PendingApplicationOperation>,
}

/// Operations started for the current application and the probe chain
/// that observes them.
#[derive(Debug, Serialize, Deserialize)]
struct PendingApplicationOperation {
    handle: OperationHandle,
    actions: ActionSet<ApplicationStateAction>,
    chain: Vec<OperationKind>,
}

enum ApplicationProgress {
    Pending(PendingApplicationOperation),
    Done,
    Retry(String),
}

/// Creates or updates every application in scope, applies its run-state
/// actions and polls the resulting operations, one application at a time.
pub struct DeployApplicationsStep;

#[async_trait]
impl Step for DeployApplicationsStep {
    fn name(&self) -> &'static str {
        "deploy-applications"
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> DeployResult<StepOutcome> {
        let desired = ctx.desired_state().await?;
        let applications: Vec<&DesiredApplication> = desired
            .applications
            .iter()
            .filter(|a| desired.includes_module(&a.module_name))
            .collect();

        let mut cursor = match ctx.phase() {
            StepPhase::Execute => ApplicationCursor::default(),
            _ => ctx
                .vars
                .get::<ApplicationCursor>(keys::APPLICATION_CURSOR)
                .await?
                .unwrap_or_default(),
        };
        let resume_poll = ctx.phase() == StepPhase::Poll;

        while let Some(app) = applications.get(cursor.index).copied() {
            let progress = match cursor.pending.take() {
                Some(pending) if resume_poll => self.poll(ctx, app, pending).await,
                _ => self.deploy(ctx, &desired, app).await,
            };
            let progress = match progress {
                Ok(progress) => progress,
                Err(err) => {
                    tolerate_optional(ctx, err, app.optional).await?;
                    ApplicationProgress::Done
                }
            };

            match progress {
                ApplicationProgress::Done => cursor.index += 1,
                ApplicationProgress::Pending(pending) => {
                    cursor.pending = Some(pending);
                    ctx.vars.set(keys::APPLICATION_CURSOR, &cursor).await?;
                    return Ok(StepOutcome::Poll);
                }
                ApplicationProgress::Retry(message) => {
                    ctx.vars.set(keys::APPLICATION_CURSOR, &cursor).await?;
                    return Ok(StepOutcome::Retry { message });
                }
            }
        }

        ctx.vars.remove(keys::APPLICATION_CURSOR).await?;
        Ok(StepOutcome::Done)
    }
}

impl DeployApplicationsStep {
    async fn deploy(
        &self,
        ctx: &StepContext<'_>,
        desired: &DesiredState,
        app: &DesiredApplication,
    ) -> DeployResult<ApplicationProgress> {
        let name = app.name.as_str();
        let existing = ctx
            .reader()
            .get_application(name)
            .await
            .for_resource(name, "get")?;
        let env = self.injected_env(ctx, app).await?;

        let (current, changes) = match &existing {
            None => {
                self.create(ctx, app, env).await?;
                let changes = ChangeFlags {
                    content: true,
                    ..Default::default()
                };
                (ApplicationStartupState::Stopped, changes)
            }
            Some(existing) => {
                let bindings = self.existing_bindings(ctx, app, existing).await?;
                let diff = ApplicationDiff::compute(app, &env, existing, &bindings);
                if !diff.is_empty() {
                    ctx.log
                        .info(format!("Updating application {name}"))
                        .await;
                    self.apply_diff(ctx, app, &diff).await?;
                }
                (existing.startup_state(), diff.change_flags(app.content_changed))
            }
        };

        self.update_metadata(ctx, desired, app, existing.as_ref())
            .await?;

        let actions = ApplicationStateReconciler::decide(
            name,
            current,
            app.desired_state(),
            &changes,
            &app.restart,
        );

        let mut chain = Vec::new();
        for action in actions.iter() {
            let mutator = ctx.mutator();
            match action {
                ApplicationStateAction::Stop => {
                    ctx.log.info(format!("Stopping application {name}")).await;
                    mutator.stop_application(name).await.for_resource(name, action)?;
                }
                ApplicationStateAction::Restage => {
                    ctx.log.info(format!("Staging application {name}")).await;
                    mutator
                        .restage_application(name)
                        .await
                        .for_resource(name, action)?;
                    chain.push(OperationKind::StageApplication);
                }
                ApplicationStateAction::Start => {
                    ctx.log.info(format!("Starting application {name}")).await;
                    mutator.start_application(name).await.for_resource(name, action)?;
                    chain.push(OperationKind::StartApplication);
                }
                ApplicationStateAction::Execute => {
                    chain.push(OperationKind::ExecuteApplication);
                }
                ApplicationStateAction::Keep => {}
            }
        }

        if chain.is_empty() {
            ctx.log
                .info(format!("Application {name} is already {}", app.desired_state()))
                .await;
            return Ok(ApplicationProgress::Done);
        }

        let timeout: Duration = chain.iter().map(|k| ctx.polling().timeout_for(*k)).sum();
        let kind = chain
            .last()
            .copied()
            .unwrap_or(OperationKind::StartApplication);
        Ok(ApplicationProgress::Pending(PendingApplicationOperation {
            handle: OperationHandle::start(kind, name, timeout, Utc::now()),
            actions,
            chain,
        }))
    }

    async fn poll(
        &self,
        ctx: &StepContext<'_>,
        app: &DesiredApplication,
        mut pending: PendingApplicationOperation,
    ) -> DeployResult<ApplicationProgress> {
        let probes = self.probes(ctx, app, &pending.chain)?;
        let report = ctx
            .engine()
            .tick(&mut pending.handle, &probes, ctx.aborted().await)
            .await;
        for warning in report.warnings {
            ctx.log.warn(warning).await;
        }

        match report.outcome {
            PollOutcome::Running => Ok(ApplicationProgress::Pending(pending)),
            PollOutcome::Finished => {
                if pending.actions.contains(ApplicationStateAction::Execute) {
                    self.finish_execution(ctx, app).await?;
                } else {
                    ctx.log
                        .info(format!("Application {} is {}", app.name, app.desired_state()))
                        .await;
                }
                Ok(ApplicationProgress::Done)
            }
            PollOutcome::Error(err) => Err(err),
            PollOutcome::Retry(message) => Ok(ApplicationProgress::Retry(message)),
        }
    }

    fn probes(
        &self,
        ctx: &StepContext<'_>,
        app: &DesiredApplication,
        chain: &[OperationKind],
    ) -> DeployResult<Vec<Box<dyn Probe>>> {
        let reader = &ctx.services.reader;
        let mut probes: Vec<Box<dyn Probe>> = Vec::with_capacity(chain.len());
        for kind in chain {
            match kind {
                OperationKind::StageApplication => {
                    probes.push(Box::new(StageProbe::new(reader.clone())))
                }
                OperationKind::StartApplication => probes.push(Box::new(StartProbe::new(
                    reader.clone(),
                    ctx.policy().fail_on_crashed,
                ))),
                OperationKind::ExecuteApplication => {
                    let settings = app.execute.clone().unwrap_or_default();
                    probes.push(Box::new(ExecuteProbe::new(reader.clone(), &settings)?))
                }
                OperationKind::ServiceOperation | OperationKind::ServiceBroker => {
                    debug!(kind = %kind, "Not an application operation");
                }
            }
        }
        Ok(probes)
    }

    async fn finish_execution(
        &self,
        ctx: &StepContext<'_>,
        app: &DesiredApplication,
    ) -> DeployResult<()> {
        let name = app.name.as_str();
        let settings = app.execute.clone().unwrap_or_default();
        if settings.stop_after_execution {
            ctx.mutator()
                .stop_application(name)
                .await
                .for_resource(name, "stop")?;
        }
        ctx.mutator()
            .mark_application_executed(name)
            .await
            .for_resource(name, "mark executed")?;
        ctx.log
            .info(format!("Application {name} executed successfully"))
            .await;
        Ok(())
    }

    /// Desired environment with the requested service keys merged in.
    async fn injected_env(
        &self,
        ctx: &StepContext<'_>,
        app: &DesiredApplication,
    ) -> DeployResult<std::collections::BTreeMap<String, String>> {
        if app.service_keys_to_inject.is_empty() {
            return Ok(app.env.clone());
        }
        let services: BTreeSet<&str> = app
            .service_keys_to_inject
            .iter()
            .map(|k| k.service_name.as_str())
            .collect();
        let mut keys = Vec::new();
        for service in services {
            keys.extend(
                ctx.reader()
                    .list_service_keys(service)
                    .await
                    .for_resource(service, "list keys")?,
            );
        }
        inject_service_keys(app, &keys)
    }

    /// Bindings of the application to the services it keeps.
    async fn existing_bindings(
        &self,
        ctx: &StepContext<'_>,
        app: &DesiredApplication,
        existing: &ExistingApplication,
    ) -> DeployResult<Vec<ServiceBinding>> {
        let mut bindings = Vec::new();
        for service in app.services.iter().filter(|s| existing.services.contains(s)) {
            let found = ctx
                .reader()
                .list_service_bindings(service)
                .await
                .for_resource(service, "list bindings")?;
            bindings.extend(found.into_iter().filter(|b| b.app_name == existing.name));
        }
        Ok(bindings)
    }

    async fn create(
        &self,
        ctx: &StepContext<'_>,
        app: &DesiredApplication,
        env: std::collections::BTreeMap<String, String>,
    ) -> DeployResult<()> {
        let name = app.name.as_str();
        ctx.log.info(format!("Creating application {name}")).await;

        let mut to_create = app.clone();
        to_create.env = env;
        ctx.mutator()
            .create_application(&to_create)
            .await
            .for_resource(name, "create")?;

        for service in &app.services {
            ctx.mutator()
                .bind_service(name, service, app.binding_parameters.get(service))
                .await
                .for_resource(name, format!("bind {service}"))?;
        }
        Ok(())
    }

    async fn apply_diff(
        &self,
        ctx: &StepContext<'_>,
        app: &DesiredApplication,
        diff: &ApplicationDiff,
    ) -> DeployResult<()> {
        let name = app.name.as_str();
        let mutator = ctx.mutator();

        if let Some(env) = &diff.env {
            mutator
                .update_application_env(name, env)
                .await
                .for_resource(name, "update env")?;
        }
        if let Some(memory) = diff.memory_mb {
            mutator
                .update_application_memory(name, memory)
                .await
                .for_resource(name, "update memory")?;
        }
        if let Some(disk) = diff.disk_mb {
            mutator
                .update_application_disk(name, disk)
                .await
                .for_resource(name, "update disk")?;
        }
        if let Some(instances) = diff.instances {
            mutator
                .update_application_instances(name, instances)
                .await
                .for_resource(name, "update instances")?;
        }
        if let Some(routes) = &diff.routes {
            mutator
                .update_application_routes(name, routes)
                .await
                .for_resource(name, "update routes")?;
        }
        if let Some(staging) = &diff.staging {
            mutator
                .update_application_staging(name, staging)
                .await
                .for_resource(name, "update staging")?;
        }
        for service in &diff.services_to_unbind {
            mutator
                .unbind_service(name, service)
                .await
                .for_resource(name, format!("unbind {service}"))?;
        }
        for service in &diff.services_to_rebind {
            ctx.log
                .info(format!("Rebinding service {service} to application {name}"))
                .await;
            mutator
                .unbind_service(name, service)
                .await
                .for_resource(name, format!("unbind {service}"))?;
            mutator
                .bind_service(name, service, app.binding_parameters.get(service))
                .await
                .for_resource(name, format!("bind {service}"))?;
        }
        for service in &diff.services_to_bind {
            mutator
                .bind_service(name, service, app.binding_parameters.get(service))
                .await
                .for_resource(name, format!("bind {service}"))?;
        }
        Ok(())
    }

    async fn update_metadata(
        &self,
        ctx: &StepContext<'_>,
        desired: &DesiredState,
        app: &DesiredApplication,
        existing: Option<&ExistingApplication>,
    ) -> DeployResult<()> {
        let metadata = OwnershipMetadata {
            package_id: desired.package_id.clone(),
            package_version: desired.version.clone(),
            module_name: app.module_name.clone(),
            color: ApplicationColor::from_app_name(&app.name),
            services: desired.services.iter().map(|s| s.name.clone()).collect(),
        };
        if existing.and_then(|e| e.metadata.as_ref()) == Some(&metadata) {
            return Ok(());
        }
        ctx.mutator()
            .update_application_metadata(&app.name, &metadata)
            .await
            .for_resource(&app.name, "update metadata")
    }
}
