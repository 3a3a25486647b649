//! Service key diff

use mta_types::{DesiredServiceKey, ExistingServiceKey};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Key operations for one service instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceKeyPlan {
    /// Keys that do not exist yet
    pub to_create: Vec<DesiredServiceKey>,

    /// Keys whose parameters changed; deleted then created
    pub to_recreate: Vec<DesiredServiceKey>,

    /// Keys no longer declared
    pub to_delete: Vec<String>,

    /// Undeclared keys kept because deleting keys is not allowed
    pub kept: Vec<String>,
}

impl ServiceKeyPlan {
    /// Plan for a service that is about to be created.
    pub fn for_new_service(desired: &[DesiredServiceKey]) -> Self {
        Self {
            to_create: desired.to_vec(),
            ..Default::default()
        }
    }

    /// Whether any key must be touched. Kept keys do not count.
    pub fn has_changes(&self) -> bool {
        !self.to_create.is_empty() || !self.to_recreate.is_empty() || !self.to_delete.is_empty()
    }
}

/// Compare desired keys with the keys the platform reports.
pub fn plan_service_keys(
    service_name: &str,
    desired: &[DesiredServiceKey],
    existing: &[ExistingServiceKey],
    delete_allowed: bool,
) -> ServiceKeyPlan {
    let mut plan = ServiceKeyPlan::default();

    for key in desired {
        match existing.iter().find(|e| e.name == key.name) {
            None => plan.to_create.push(key.clone()),
            Some(found) if found.parameters != key.parameters => {
                plan.to_recreate.push(key.clone())
            }
            Some(_) => {}
        }
    }

    for key in existing {
        if desired.iter().any(|d| d.name == key.name) {
            continue;
        }
        if delete_allowed {
            plan.to_delete.push(key.name.clone());
        } else {
            warn!(
                service = %service_name,
                key = %key.name,
                "Service key is no longer declared but deleting service keys is not allowed; keeping it"
            );
            plan.kept.push(key.name.clone());
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn existing(name: &str) -> ExistingServiceKey {
        ExistingServiceKey {
            name: name.into(),
            service_name: "db".into(),
            parameters: BTreeMap::new(),
            credentials: BTreeMap::new(),
        }
    }

    #[test]
    fn test_matching_keys_need_nothing() {
        let desired = vec![DesiredServiceKey::new("a"), DesiredServiceKey::new("b")];
        let plan = plan_service_keys("db", &desired, &[existing("a"), existing("b")], true);
        assert!(!plan.has_changes());
        assert_eq!(plan, ServiceKeyPlan::default());
    }

    #[test]
    fn test_create_recreate_delete() {
        let mut changed = DesiredServiceKey::new("b");
        changed
            .parameters
            .insert("role".into(), serde_json::json!("admin"));
        let desired = vec![DesiredServiceKey::new("a"), changed.clone()];

        let plan = plan_service_keys("db", &desired, &[existing("b"), existing("c")], true);
        assert_eq!(plan.to_create, vec![DesiredServiceKey::new("a")]);
        assert_eq!(plan.to_recreate, vec![changed]);
        assert_eq!(plan.to_delete, vec!["c".to_string()]);
    }

    #[test]
    fn test_undeclared_key_kept_without_policy() {
        let plan = plan_service_keys("db", &[], &[existing("c")], false);
        assert!(!plan.has_changes());
        assert_eq!(plan.kept, vec!["c".to_string()]);
    }
}
