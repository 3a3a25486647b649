//! Dry-run: decisions for a desired state against a platform snapshot

use crate::error::CliResult;
use crate::output::{print_output, OutputFormat};
use mta_platform::{InMemoryPlatform, PlatformReader};
use mta_reconcile::{
    assign_legacy_idle_names, decide_broker, find_deployed_package, inject_service_keys,
    plan_legacy_renames, resolve_broker, ApplicationDiff, ApplicationStateReconciler,
    BlueGreenColorCoordinator, ChangeFlags, ConflictDetector, ServiceReconciler,
};
use mta_types::{
    ApplicationStartupState, DeployError, DeployResult, DeploymentPolicy, DesiredState,
    ServiceBinding,
};
use serde::Serialize;
use tabled::Tabled;

/// One planned change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct PlanRow {
    #[tabled(rename = "KIND")]
    pub kind: String,
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "ACTIONS")]
    pub actions: String,
    #[tabled(rename = "NOTES")]
    pub notes: String,
}

impl PlanRow {
    fn new(kind: &str, name: &str, actions: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            actions: actions.into(),
            notes: String::new(),
        }
    }

    fn with_notes(mut self, notes: &[String]) -> Self {
        self.notes = notes.join("; ");
        self
    }
}

fn platform_error(resource: &str) -> impl Fn(mta_platform::PlatformError) -> DeployError + '_ {
    move |e| DeployError::from(e).with_resource(resource)
}

/// Compute every decision of a run without mutating anything.
pub async fn build_plan(
    mut desired: DesiredState,
    reader: &dyn PlatformReader,
    policy: &DeploymentPolicy,
) -> DeployResult<Vec<PlanRow>> {
    let mut rows = Vec::new();
    let applications = reader
        .list_applications()
        .await
        .map_err(platform_error(desired.package_id.as_str()))?;
    let deployed = find_deployed_package(&applications, &desired.package_id);

    if policy.blue_green && policy.keep_original_app_names {
        let legacy = plan_legacy_renames(deployed.as_ref(), &desired);
        for name in &legacy.to_undeploy {
            rows.push(PlanRow::new("application", name, "delete stale"));
        }
        for rename in &legacy.renames {
            rows.push(PlanRow::new("application", &rename.from, format!("rename to {}", rename.to)));
        }
        assign_legacy_idle_names(&mut desired);
    } else if policy.blue_green {
        let coordinator = BlueGreenColorCoordinator::new(policy.color_override);
        let routes: Vec<String> = desired
            .applications
            .iter()
            .filter(|a| desired.includes_module(&a.module_name))
            .flat_map(|a| a.routes.iter().cloned())
            .collect();
        let detection = coordinator.detect(deployed.as_ref(), &routes);
        let color_plan = coordinator.assign(&detection, &mut desired, deployed.as_ref());
        rows.push(
            PlanRow::new("generation", &detection.idle.to_string(), detection.source.to_string())
                .with_notes(&detection.warnings),
        );
        for name in color_plan
            .removal_candidates
            .iter()
            .chain(color_plan.obsolete.iter())
        {
            rows.push(PlanRow::new("application", name, "delete after deployment"));
        }
    }

    let mut bindings: Vec<(String, Vec<ServiceBinding>)> = Vec::new();
    for service in &desired.services {
        if reader
            .get_service_instance(&service.name)
            .await
            .map_err(platform_error(&service.name))?
            .is_some()
        {
            let found = reader
                .list_service_bindings(&service.name)
                .await
                .map_err(platform_error(&service.name))?;
            bindings.push((service.name.clone(), found));
        }
    }
    let existing_apps: Vec<_> = applications
        .iter()
        .filter(|e| {
            desired
                .applications
                .iter()
                .any(|a| a.name == e.name && desired.includes_module(&a.module_name))
        })
        .collect();
    let detector = ConflictDetector::new(&desired.package_id, deployed.as_ref(), &applications);
    if let Err(err) = detector.check_all(&bindings, &existing_apps) {
        rows.push(PlanRow::new(
            "conflict",
            err.resource.as_deref().unwrap_or("-"),
            err.message,
        ));
        return Ok(rows);
    }

    let reconciler = ServiceReconciler::new(policy.clone());
    for service in &desired.services {
        let existing = reader
            .get_service_instance(&service.name)
            .await
            .map_err(platform_error(&service.name))?;
        let keys = match existing {
            Some(_) => reader
                .list_service_keys(&service.name)
                .await
                .map_err(platform_error(&service.name))?,
            None => Vec::new(),
        };
        let default_tags = match &service.label {
            Some(label) if !service.user_provided => reader
                .get_default_tags(label)
                .await
                .map_err(platform_error(&service.name))?,
            _ => Vec::new(),
        };
        let decision = reconciler.decide(service, existing.as_ref(), &keys, &default_tags);
        let mut actions = decision.actions.to_string();
        if decision.keys.has_changes() {
            actions.push_str(&format!(
                " keys: +{} ~{} -{}",
                decision.keys.to_create.len(),
                decision.keys.to_recreate.len(),
                decision.keys.to_delete.len()
            ));
        }
        rows.push(PlanRow::new("service", &service.name, actions).with_notes(&decision.warnings));
    }

    for app in desired
        .applications
        .iter()
        .filter(|a| desired.includes_module(&a.module_name))
    {
        let existing = reader
            .get_application(&app.name)
            .await
            .map_err(platform_error(&app.name))?;
        let (prefix, current, changes) = match &existing {
            None => (
                "create".to_string(),
                ApplicationStartupState::Stopped,
                ChangeFlags {
                    content: true,
                    ..Default::default()
                },
            ),
            Some(existing) => {
                // Injection needs existing keys; unknown keys surface at deploy time.
                let mut keys = Vec::new();
                for injection in &app.service_keys_to_inject {
                    keys.extend(
                        reader
                            .list_service_keys(&injection.service_name)
                            .await
                            .map_err(platform_error(&injection.service_name))?,
                    );
                }
                let env = inject_service_keys(app, &keys).unwrap_or_else(|_| app.env.clone());
                let mut app_bindings = Vec::new();
                for service in app.services.iter().filter(|s| existing.services.contains(s)) {
                    app_bindings.extend(
                        reader
                            .list_service_bindings(service)
                            .await
                            .map_err(platform_error(service))?
                            .into_iter()
                            .filter(|b| b.app_name == existing.name),
                    );
                }
                let diff = ApplicationDiff::compute(app, &env, existing, &app_bindings);
                let prefix = if diff.is_empty() { "" } else { "update" };
                (
                    prefix.to_string(),
                    existing.startup_state(),
                    diff.change_flags(app.content_changed),
                )
            }
        };
        let state_actions = ApplicationStateReconciler::decide(
            &app.name,
            current,
            app.desired_state(),
            &changes,
            &app.restart,
        );
        let actions = if prefix.is_empty() {
            state_actions.to_string()
        } else {
            format!("{prefix} {state_actions}")
        };
        rows.push(PlanRow::new("application", &app.name, actions));

        if let Some(broker) = resolve_broker(app)? {
            let existing = reader
                .list_service_brokers()
                .await
                .map_err(platform_error(&broker.name))?;
            let decision = decide_broker(&broker, &existing);
            rows.push(
                PlanRow::new("service broker", &broker.name, decision.action.to_string())
                    .with_notes(&decision.warnings),
            );
        }
    }

    if !policy.blue_green {
        if let Some(deployed) = &deployed {
            for app in deployed.applications.iter().filter(|a| {
                desired.includes_module(&a.module_name)
                    && !desired.applications.iter().any(|d| d.name == a.name)
            }) {
                rows.push(PlanRow::new("application", &app.name, "delete obsolete"));
            }
        }
    }

    Ok(rows)
}

/// Execute the plan command.
pub async fn execute(
    desired: DesiredState,
    platform: &InMemoryPlatform,
    policy: &DeploymentPolicy,
    format: OutputFormat,
) -> CliResult<()> {
    let rows = build_plan(desired, platform, policy).await?;
    print_output(&rows, format)
}
