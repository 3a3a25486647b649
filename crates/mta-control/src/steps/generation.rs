use super::PlatformResultExt;
use crate::step::{Step, StepContext};
use crate::store::keys;
use async_trait::async_trait;
use mta_platform::PlatformError;
use mta_reconcile::{
    assign_legacy_idle_names, find_deployed_package, plan_legacy_renames,
    BlueGreenColorCoordinator,
};
use mta_types::{DeployResult, DeployedPackage, DesiredState, StepOutcome};
use tracing::debug;

/// Names the new generation of a blue-green run.
///
/// With colors, the desired applications take the idle color. When original
/// names are kept, the deployed generation is renamed to `-live` first and
/// the new one is deployed as `-idle`.
pub struct PrepareGenerationStep;

#[async_trait]
impl Step for PrepareGenerationStep {
    fn name(&self) -> &'static str {
        "prepare-generation"
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> DeployResult<StepOutcome> {
        if !ctx.policy().blue_green {
            debug!("Not a blue-green run");
            return Ok(StepOutcome::Done);
        }

        let mut desired = ctx.desired_state().await?;

        if ctx.policy().keep_original_app_names {
            // A resumed attempt may find part of the renames already done.
            let deployed = self.refresh_deployed_package(ctx, &desired).await?;
            let plan = plan_legacy_renames(deployed.as_ref(), &desired);
            for name in &plan.to_undeploy {
                ctx.log
                    .info(format!("Deleting stale application {name}"))
                    .await;
                match ctx.mutator().delete_application(name).await {
                    Err(PlatformError::NotFound(_)) => {
                        debug!(app = %name, "Stale application already deleted");
                    }
                    result => result.for_resource(name, "delete")?,
                }
            }
            for rename in &plan.renames {
                ctx.log
                    .info(format!("Renaming application {} to {}", rename.from, rename.to))
                    .await;
                ctx.mutator()
                    .rename_application(&rename.from, &rename.to)
                    .await
                    .for_resource(&rename.from, "rename")?;
            }
            for rename in assign_legacy_idle_names(&mut desired) {
                debug!(from = %rename.from, to = %rename.to, "Deploying new generation as idle");
            }

            if !plan.renames.is_empty() || !plan.to_undeploy.is_empty() {
                self.refresh_deployed_package(ctx, &desired).await?;
            }
        } else {
            let coordinator = BlueGreenColorCoordinator::new(ctx.policy().color_override);
            let primary_routes: Vec<String> = desired
                .applications
                .iter()
                .filter(|a| desired.includes_module(&a.module_name))
                .flat_map(|a| a.routes.iter().cloned())
                .collect();

            let deployed = ctx.deployed_package().await?;
            let detection = coordinator.detect(deployed.as_ref(), &primary_routes);
            for warning in &detection.warnings {
                ctx.log.warn(warning.clone()).await;
            }
            ctx.log
                .info(format!(
                    "Deploying the {} generation ({})",
                    detection.idle, detection.source
                ))
                .await;

            let plan = coordinator.assign(&detection, &mut desired, deployed.as_ref());
            ctx.vars.set(keys::COLOR_PLAN, &plan).await?;
        }

        ctx.vars.set(keys::DESIRED_STATE, &desired).await?;
        Ok(StepOutcome::Done)
    }
}

impl PrepareGenerationStep {
    /// Rebuild the deployed package from the platform and store it.
    async fn refresh_deployed_package(
        &self,
        ctx: &StepContext<'_>,
        desired: &DesiredState,
    ) -> DeployResult<Option<DeployedPackage>> {
        let applications = ctx
            .reader()
            .list_applications()
            .await
            .for_resource(desired.package_id.as_str(), "list applications")?;
        let deployed = find_deployed_package(&applications, &desired.package_id);
        ctx.vars.set(keys::DEPLOYED_PACKAGE, &deployed).await?;
        Ok(deployed)
    }
}
