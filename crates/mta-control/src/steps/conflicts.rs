use super::PlatformResultExt;
use crate::step::{Step, StepContext};
use async_trait::async_trait;
use mta_reconcile::ConflictDetector;
use mta_types::{DeployResult, ServiceBinding, StepOutcome};

/// Rejects runs that would take over resources owned by someone else.
pub struct CheckConflictsStep;

#[async_trait]
impl Step for CheckConflictsStep {
    fn name(&self) -> &'static str {
        "check-conflicts"
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> DeployResult<StepOutcome> {
        let desired = ctx.desired_state().await?;
        let deployed = ctx.deployed_package().await?;
        let applications = ctx
            .reader()
            .list_applications()
            .await
            .for_resource(desired.package_id.as_str(), "list applications")?;

        let mut services: Vec<(String, Vec<ServiceBinding>)> = Vec::new();
        for service in &desired.services {
            let exists = ctx
                .reader()
                .get_service_instance(&service.name)
                .await
                .for_resource(&service.name, "get")?
                .is_some();
            if !exists {
                continue;
            }
            let bindings = ctx
                .reader()
                .list_service_bindings(&service.name)
                .await
                .for_resource(&service.name, "list bindings")?;
            services.push((service.name.clone(), bindings));
        }

        let existing_apps: Vec<_> = applications
            .iter()
            .filter(|existing| {
                desired
                    .applications
                    .iter()
                    .any(|app| app.name == existing.name && desired.includes_module(&app.module_name))
            })
            .collect();

        let detector = ConflictDetector::new(&desired.package_id, deployed.as_ref(), &applications);
        let report = detector.check_all(&services, &existing_apps)?;
        for warning in report.warnings {
            ctx.log.warn(warning).await;
        }

        Ok(StepOutcome::Done)
    }
}
