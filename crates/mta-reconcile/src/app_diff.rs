//! Property differences between a desired and an existing application

use crate::app_state::ChangeFlags;
use mta_types::{
    DeployError, DeployResult, DesiredApplication, ExistingApplication, ExistingServiceKey,
    ServiceBinding, Staging,
};
use std::collections::{BTreeMap, BTreeSet};

/// Updates needed to bring an existing application in line with its
/// desired properties. Run-state actions are decided separately.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationDiff {
    pub env: Option<BTreeMap<String, String>>,
    pub memory_mb: Option<u64>,
    pub disk_mb: Option<u64>,
    pub instances: Option<u32>,
    pub routes: Option<Vec<String>>,
    pub staging: Option<Staging>,
    pub services_to_bind: Vec<String>,
    pub services_to_unbind: Vec<String>,
    /// Bound services whose binding parameters changed
    pub services_to_rebind: Vec<String>,
}

impl ApplicationDiff {
    /// Compare desired against existing. `env` is the desired environment
    /// after service-key injection and `bindings` the existing bindings of
    /// the application.
    pub fn compute(
        desired: &DesiredApplication,
        env: &BTreeMap<String, String>,
        existing: &ExistingApplication,
        bindings: &[ServiceBinding],
    ) -> Self {
        let mut diff = Self::default();

        if env != &existing.env {
            diff.env = Some(env.clone());
        }
        if desired.memory_mb.is_some() && desired.memory_mb != existing.memory_mb {
            diff.memory_mb = desired.memory_mb;
        }
        if desired.disk_mb.is_some() && desired.disk_mb != existing.disk_mb {
            diff.disk_mb = desired.disk_mb;
        }
        if desired.instances != existing.instances {
            diff.instances = Some(desired.instances);
        }

        let desired_routes: BTreeSet<&String> = desired.routes.iter().collect();
        let existing_routes: BTreeSet<&String> = existing.routes.iter().collect();
        if desired_routes != existing_routes {
            diff.routes = Some(desired.routes.clone());
        }

        if desired.staging != existing.staging {
            diff.staging = Some(desired.staging.clone());
        }

        diff.services_to_bind = desired
            .services
            .iter()
            .filter(|s| !existing.services.contains(s))
            .cloned()
            .collect();
        diff.services_to_unbind = existing
            .services
            .iter()
            .filter(|s| !desired.services.contains(s))
            .cloned()
            .collect();
        diff.services_to_rebind = desired
            .services
            .iter()
            .filter(|s| existing.services.contains(s))
            .filter(|s| {
                bindings
                    .iter()
                    .find(|b| b.app_name == existing.name && &b.service_name == *s)
                    .is_some_and(|b| {
                        !same_parameters(b.parameters.as_ref(), desired.binding_parameters.get(*s))
                    })
            })
            .cloned()
            .collect();

        diff
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Change flags fed to the run-state decision.
    pub fn change_flags(&self, content_changed: bool) -> ChangeFlags {
        ChangeFlags {
            env: self.env.is_some(),
            services: !self.services_to_bind.is_empty()
                || !self.services_to_unbind.is_empty()
                || !self.services_to_rebind.is_empty(),
            routes: self.routes.is_some(),
            content: content_changed || self.staging.is_some(),
        }
    }
}

/// Absent parameters and an empty object are the same binding.
fn same_parameters(
    existing: Option<&serde_json::Value>,
    desired: Option<&serde_json::Value>,
) -> bool {
    let is_empty = |v: Option<&serde_json::Value>| match v {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    };
    if is_empty(existing) && is_empty(desired) {
        return true;
    }
    existing == desired
}

/// Merge the credentials of the requested service keys into the environment.
///
/// `keys` holds the keys of every service the application references. A key
/// that does not exist is a content error.
pub fn inject_service_keys(
    app: &DesiredApplication,
    keys: &[ExistingServiceKey],
) -> DeployResult<BTreeMap<String, String>> {
    let mut env = app.env.clone();
    for injection in &app.service_keys_to_inject {
        let key = keys
            .iter()
            .find(|k| k.service_name == injection.service_name && k.name == injection.key_name)
            .ok_or_else(|| {
                DeployError::content(format!(
                    "Service key {} of service {} does not exist",
                    injection.key_name, injection.service_name
                ))
                .with_resource(&app.name)
            })?;
        let credentials = serde_json::to_string(&key.credentials).map_err(|e| {
            DeployError::content(format!(
                "Cannot serialize credentials of service key {}: {e}",
                injection.key_name
            ))
            .with_resource(&app.name)
        })?;
        env.insert(injection.env_var_name.clone(), credentials);
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mta_types::{AppState, BuildState, ServiceKeyToInject};

    fn existing_from(desired: &DesiredApplication) -> ExistingApplication {
        ExistingApplication {
            name: desired.name.clone(),
            state: AppState::Started,
            instances: desired.instances,
            instance_states: vec![],
            memory_mb: desired.memory_mb,
            disk_mb: desired.disk_mb,
            staging: desired.staging.clone(),
            routes: desired.routes.clone(),
            services: desired.services.clone(),
            env: desired.env.clone(),
            metadata: None,
            build: BuildState::Staged,
            executed: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_identical_application_has_empty_diff() {
        let mut desired = DesiredApplication::new("web", "web");
        desired.routes = vec!["web.example.com".into()];
        desired.services = vec!["db".into()];
        let existing = existing_from(&desired);

        let diff = ApplicationDiff::compute(&desired, &desired.env, &existing, &[]);
        assert!(diff.is_empty());
        assert_eq!(diff.change_flags(false), ChangeFlags::default());
    }

    #[test]
    fn test_binding_and_route_changes() {
        let mut desired = DesiredApplication::new("web", "web");
        desired.services = vec!["db".into(), "cache".into()];
        desired.routes = vec!["b.example.com".into()];
        let mut existing = existing_from(&desired);
        existing.services = vec!["db".into(), "old".into()];
        existing.routes = vec!["a.example.com".into()];

        let diff = ApplicationDiff::compute(&desired, &desired.env, &existing, &[]);
        assert_eq!(diff.services_to_bind, vec!["cache".to_string()]);
        assert_eq!(diff.services_to_unbind, vec!["old".to_string()]);
        let flags = diff.change_flags(false);
        assert!(flags.services && flags.routes && !flags.env && !flags.content);
    }

    #[test]
    fn test_changed_binding_parameters_rebind() {
        let mut desired = DesiredApplication::new("web", "web");
        desired.services = vec!["db".into(), "cache".into()];
        desired
            .binding_parameters
            .insert("db".into(), serde_json::json!({"role": "new"}));
        let existing = existing_from(&desired);
        let bindings = vec![
            ServiceBinding {
                app_name: "web".into(),
                service_name: "db".into(),
                parameters: Some(serde_json::json!({"role": "old"})),
            },
            ServiceBinding {
                app_name: "web".into(),
                service_name: "cache".into(),
                parameters: Some(serde_json::json!({})),
            },
        ];

        let diff = ApplicationDiff::compute(&desired, &desired.env, &existing, &bindings);
        assert_eq!(diff.services_to_rebind, vec!["db".to_string()]);
        assert!(diff.services_to_bind.is_empty());
        assert!(diff.change_flags(false).services);
    }

    #[test]
    fn test_route_order_is_irrelevant() {
        let mut desired = DesiredApplication::new("web", "web");
        desired.routes = vec!["a".into(), "b".into()];
        let mut existing = existing_from(&desired);
        existing.routes = vec!["b".into(), "a".into()];

        assert!(ApplicationDiff::compute(&desired, &desired.env, &existing, &[]).is_empty());
    }

    #[test]
    fn test_inject_service_keys() {
        let mut app = DesiredApplication::new("web", "web");
        app.service_keys_to_inject = vec![ServiceKeyToInject {
            env_var_name: "DB_KEY".into(),
            service_name: "db".into(),
            key_name: "reader".into(),
        }];
        let mut credentials = BTreeMap::new();
        credentials.insert("user".to_string(), serde_json::json!("r"));
        let keys = vec![ExistingServiceKey {
            name: "reader".into(),
            service_name: "db".into(),
            parameters: BTreeMap::new(),
            credentials,
        }];

        let env = inject_service_keys(&app, &keys).unwrap();
        assert_eq!(env.get("DB_KEY").unwrap(), r#"{"user":"r"}"#);

        let err = inject_service_keys(&app, &[]).unwrap_err();
        assert_eq!(err.kind, mta_types::ErrorKind::Content);
    }
}
