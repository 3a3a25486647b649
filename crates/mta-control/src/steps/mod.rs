//! Deployment steps
//!
//! The standard pipeline, in order:
//!
//! 1. detect the deployed package
//! 2. prepare the blue-green generation
//! 3. check ownership conflicts
//! 4. wait for service operations already in progress
//! 5. converge services and service keys
//! 6. converge applications and poll their operations
//! 7. register service brokers
//! 8. remove the obsolete generation

mod applications;
mod brokers;
mod conflicts;
mod detect;
mod generation;
mod in_progress;
mod obsolete;
mod services;

pub use applications::DeployApplicationsStep;
pub use brokers::ServiceBrokersStep;
pub use conflicts::CheckConflictsStep;
pub use detect::DetectDeployedPackageStep;
pub use generation::PrepareGenerationStep;
pub use in_progress::WaitForServiceOperationsStep;
pub use obsolete::RemoveObsoleteStep;
pub use services::DeployServicesStep;

use crate::step::{Step, StepContext};
use mta_types::{DeployError, DeployResult};

/// Steps of a standard deployment run.
pub fn standard_steps() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(DetectDeployedPackageStep),
        Box::new(PrepareGenerationStep),
        Box::new(CheckConflictsStep),
        Box::new(WaitForServiceOperationsStep),
        Box::new(DeployServicesStep),
        Box::new(DeployApplicationsStep),
        Box::new(ServiceBrokersStep),
        Box::new(RemoveObsoleteStep),
    ]
}

/// Attach resource and action to platform failures.
pub(crate) trait PlatformResultExt<T> {
    fn for_resource(self, resource: &str, action: impl std::fmt::Display) -> DeployResult<T>;
}

impl<T> PlatformResultExt<T> for mta_platform::Result<T> {
    fn for_resource(self, resource: &str, action: impl std::fmt::Display) -> DeployResult<T> {
        self.map_err(|e| {
            DeployError::from(e)
                .with_resource(resource)
                .with_action(action)
        })
    }
}

/// Downgrade a failure on an optional resource to a warning.
pub(crate) async fn tolerate_optional(
    ctx: &StepContext<'_>,
    error: DeployError,
    optional: bool,
) -> DeployResult<()> {
    if error.is_fatal_for(optional) {
        return Err(error);
    }
    ctx.log
        .warn(format!("Ignoring failure of optional resource: {error}"))
        .await;
    Ok(())
}

/// Unbind every application, drop all keys, then delete the instance.
pub(crate) async fn delete_service_instance(ctx: &StepContext<'_>, name: &str) -> DeployResult<()> {
    let bindings = ctx
        .reader()
        .list_service_bindings(name)
        .await
        .for_resource(name, "list bindings")?;
    for binding in bindings {
        ctx.mutator()
            .unbind_service(&binding.app_name, name)
            .await
            .for_resource(name, "unbind")?;
    }
    let keys = ctx
        .reader()
        .list_service_keys(name)
        .await
        .for_resource(name, "list keys")?;
    for key in keys {
        ctx.mutator()
            .delete_service_key(name, &key.name)
            .await
            .for_resource(name, "delete key")?;
    }
    ctx.mutator()
        .delete_service(name)
        .await
        .for_resource(name, "delete")
}
