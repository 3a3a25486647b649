use super::{delete_service_instance, tolerate_optional, PlatformResultExt};
use crate::step::{Step, StepContext};
use crate::store::keys;
use async_trait::async_trait;
use mta_reconcile::{plan_legacy_finalize, ColorPlan, ServiceReconciler};
use mta_types::{DeployResult, DeployedPackage, DesiredState, ServiceAction, StepOutcome};
use std::collections::BTreeSet;

/// Removes what the new generation replaced: previous blue-green
/// applications, applications of dropped modules and, on a full deployment,
/// services the package no longer declares.
pub struct RemoveObsoleteStep;

#[async_trait]
impl Step for RemoveObsoleteStep {
    fn name(&self) -> &'static str {
        "remove-obsolete"
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> DeployResult<StepOutcome> {
        let desired = ctx.desired_state().await?;
        let deployed = ctx.deployed_package().await?;
        let existing: BTreeSet<String> = ctx
            .reader()
            .list_applications()
            .await
            .for_resource(desired.package_id.as_str(), "list applications")?
            .into_iter()
            .map(|app| app.name)
            .collect();

        let policy = ctx.policy();
        if policy.blue_green && policy.keep_original_app_names {
            self.finalize_legacy(ctx, &desired, deployed.as_ref(), &existing)
                .await?;
        } else if policy.blue_green {
            let plan = ctx
                .vars
                .get::<ColorPlan>(keys::COLOR_PLAN)
                .await?
                .unwrap_or_default();
            let names = plan
                .removal_candidates
                .iter()
                .chain(plan.obsolete.iter())
                .cloned();
            self.delete_applications(ctx, names, &existing).await?;
        } else {
            let names = obsolete_applications(&desired, deployed.as_ref(), |app| {
                !desired.applications.iter().any(|a| a.name == app)
            });
            self.delete_applications(ctx, names, &existing).await?;
        }

        if desired.modules_for_deployment.is_none() {
            self.delete_obsolete_services(ctx, &desired, deployed.as_ref())
                .await?;
        }

        Ok(StepOutcome::Done)
    }
}

impl RemoveObsoleteStep {
    async fn finalize_legacy(
        &self,
        ctx: &StepContext<'_>,
        desired: &DesiredState,
        deployed: Option<&DeployedPackage>,
        existing: &BTreeSet<String>,
    ) -> DeployResult<()> {
        let (to_delete, renames) = plan_legacy_finalize(desired);
        self.delete_applications(ctx, to_delete, existing).await?;

        for rename in &renames {
            ctx.log
                .info(format!("Renaming application {} to {}", rename.from, rename.to))
                .await;
            ctx.mutator()
                .rename_application(&rename.from, &rename.to)
                .await
                .for_resource(&rename.from, "rename")?;
        }

        let declared: BTreeSet<&str> = desired
            .applications
            .iter()
            .map(|a| a.module_name.as_str())
            .collect();
        let dropped = deployed
            .map(|p| {
                p.applications
                    .iter()
                    .filter(|a| !declared.contains(a.module_name.as_str()))
                    .filter(|a| desired.includes_module(&a.module_name))
                    .map(|a| a.name.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        self.delete_applications(ctx, dropped, existing).await
    }

    async fn delete_applications(
        &self,
        ctx: &StepContext<'_>,
        names: impl IntoIterator<Item = String>,
        existing: &BTreeSet<String>,
    ) -> DeployResult<()> {
        let names: BTreeSet<String> = names.into_iter().collect();
        for name in names.iter().filter(|n| existing.contains(*n)) {
            ctx.log
                .info(format!("Deleting obsolete application {name}"))
                .await;
            ctx.mutator()
                .delete_application(name)
                .await
                .for_resource(name, "delete")?;
        }
        Ok(())
    }

    async fn delete_obsolete_services(
        &self,
        ctx: &StepContext<'_>,
        desired: &DesiredState,
        deployed: Option<&DeployedPackage>,
    ) -> DeployResult<()> {
        let deployed = match deployed {
            Some(deployed) => deployed,
            None => return Ok(()),
        };
        let reconciler = ServiceReconciler::new(ctx.policy().clone());

        for name in &deployed.services {
            if desired.find_service(name).is_some() {
                continue;
            }
            let existing = ctx
                .reader()
                .get_service_instance(name)
                .await
                .for_resource(name, "get")?;
            let existing = match existing {
                Some(existing) => existing,
                None => continue,
            };

            let decision = reconciler.decide_obsolete(&existing);
            for warning in decision.warnings {
                ctx.log.warn(warning).await;
            }
            if decision.actions.contains(ServiceAction::Delete) {
                ctx.log
                    .info(format!("Deleting obsolete service {name}"))
                    .await;
                if let Err(err) = delete_service_instance(ctx, name).await {
                    tolerate_optional(ctx, err, true).await?;
                }
            }
        }
        Ok(())
    }
}

/// Deployed applications of in-scope modules matching `is_obsolete`.
fn obsolete_applications(
    desired: &DesiredState,
    deployed: Option<&DeployedPackage>,
    is_obsolete: impl Fn(&str) -> bool,
) -> Vec<String> {
    deployed
        .map(|p| {
            p.applications
                .iter()
                .filter(|a| desired.includes_module(&a.module_name))
                .filter(|a| is_obsolete(&a.name))
                .map(|a| a.name.clone())
                .collect()
        })
        .unwrap_or_default()
}
