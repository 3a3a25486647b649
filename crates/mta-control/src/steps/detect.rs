use super::PlatformResultExt;
use crate::step::{Step, StepContext};
use crate::store::keys;
use async_trait::async_trait;
use mta_reconcile::find_deployed_package;
use mta_types::{DeployResult, StepOutcome};

/// Reads the ownership record of the package from application metadata.
pub struct DetectDeployedPackageStep;

#[async_trait]
impl Step for DetectDeployedPackageStep {
    fn name(&self) -> &'static str {
        "detect-deployed-package"
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> DeployResult<StepOutcome> {
        let desired = ctx.desired_state().await?;
        let applications = ctx
            .reader()
            .list_applications()
            .await
            .for_resource(desired.package_id.as_str(), "list applications")?;

        let deployed = find_deployed_package(&applications, &desired.package_id);
        match &deployed {
            Some(package) => {
                ctx.log
                    .info(format!(
                        "Detected deployed package {} version {} with {} application(s)",
                        package.id,
                        package.version.as_deref().unwrap_or("unknown"),
                        package.applications.len()
                    ))
                    .await
            }
            None => {
                ctx.log
                    .info(format!("Package {} is not deployed yet", desired.package_id))
                    .await
            }
        }

        ctx.vars.set(keys::DEPLOYED_PACKAGE, &deployed).await?;
        Ok(StepOutcome::Done)
    }
}
