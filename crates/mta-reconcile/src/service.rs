//! Service instance reconciliation
//!
//! An absent service is created. A present one is checked in a fixed order:
//! must it be recreated, then plan, tags, credentials, syslog drain and keys.
//! A recreate short-circuits everything after it.

use crate::service_keys::{plan_service_keys, ServiceKeyPlan};
use mta_types::{
    ActionSet, DeploymentPolicy, DesiredService, ExistingService, ExistingServiceKey,
    ServiceAction,
};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// What to do with one service instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDecision {
    pub actions: ActionSet<ServiceAction>,
    pub keys: ServiceKeyPlan,
    pub warnings: Vec<String>,
}

impl ServiceDecision {
    fn warn(&mut self, service: &str, message: String) {
        warn!(service = %service, "{}", message);
        self.warnings.push(message);
    }
}

/// Decides actions for service instances.
pub struct ServiceReconciler {
    policy: DeploymentPolicy,
}

impl ServiceReconciler {
    pub fn new(policy: DeploymentPolicy) -> Self {
        Self { policy }
    }

    /// Tags a service should carry: its own plus the offering defaults.
    pub fn effective_tags(desired: &DesiredService, default_tags: &[String]) -> Vec<String> {
        let mut tags = desired.tags.clone();
        for tag in default_tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        tags
    }

    /// Decide the actions for a declared service.
    pub fn decide(
        &self,
        desired: &DesiredService,
        existing: Option<&ExistingService>,
        existing_keys: &[ExistingServiceKey],
        default_tags: &[String],
    ) -> ServiceDecision {
        let mut decision = ServiceDecision::default();

        let existing = match existing {
            Some(existing) => existing,
            None => {
                decision.actions.insert(ServiceAction::Create);
                if !desired.user_provided {
                    decision.keys = ServiceKeyPlan::for_new_service(&desired.keys);
                }
                return self.finish(desired, decision);
            }
        };

        if let Some(reason) = recreate_reason(desired, existing) {
            if self.policy.delete_services {
                decision.actions.insert(ServiceAction::Recreate);
                if !desired.user_provided {
                    decision.keys = ServiceKeyPlan::for_new_service(&desired.keys);
                }
            } else {
                decision.warn(
                    &desired.name,
                    format!(
                        "Service {} must be recreated ({reason}) but deleting services is not allowed; leaving it unchanged",
                        desired.name
                    ),
                );
            }
            return self.finish(desired, decision);
        }

        if let Some(operation) = &existing.last_operation {
            if operation.left_instance_broken() {
                if self.policy.delete_services {
                    decision.actions.insert(ServiceAction::Recreate);
                    if !desired.user_provided {
                        decision.keys = ServiceKeyPlan::for_new_service(&desired.keys);
                    }
                    return self.finish(desired, decision);
                }
                decision.warn(
                    &desired.name,
                    format!(
                        "Last operation on service {} was \"{operation}\"; the service may not be operational",
                        desired.name
                    ),
                );
            }
        }

        if !desired.user_provided {
            if desired.plan.is_some() && desired.plan != existing.plan {
                decision.actions.insert(ServiceAction::UpdatePlan);
            }

            let desired_tags: BTreeSet<String> =
                Self::effective_tags(desired, default_tags).into_iter().collect();
            let existing_tags: BTreeSet<String> = existing.tags().iter().cloned().collect();
            if desired_tags != existing_tags {
                decision.actions.insert(ServiceAction::UpdateTags);
            }
        }

        if !desired.credentials.is_empty() && desired.credentials != existing.credentials {
            decision.actions.insert(ServiceAction::UpdateCredentials);
        }

        if desired.user_provided
            && desired.syslog_drain_url.is_some()
            && desired.syslog_drain_url != existing.syslog_drain_url
        {
            decision.actions.insert(ServiceAction::UpdateSyslogDrainUrl);
        }

        if !desired.user_provided {
            decision.keys = plan_service_keys(
                &desired.name,
                &desired.keys,
                existing_keys,
                self.policy.delete_service_keys,
            );
            if decision.keys.has_changes() {
                decision.actions.insert(ServiceAction::UpdateKeys);
            }
        }

        self.finish(desired, decision)
    }

    /// Decide what to do with a service that is no longer declared.
    pub fn decide_obsolete(&self, existing: &ExistingService) -> ServiceDecision {
        let mut decision = ServiceDecision::default();
        if self.policy.delete_services {
            decision.actions.insert(ServiceAction::Delete);
        } else {
            decision.warn(
                &existing.name,
                format!(
                    "Service {} is no longer part of the package but deleting services is not allowed; keeping it",
                    existing.name
                ),
            );
        }
        decision
    }

    fn finish(&self, desired: &DesiredService, decision: ServiceDecision) -> ServiceDecision {
        debug!(
            service = %desired.name,
            actions = %decision.actions,
            keys_to_create = decision.keys.to_create.len(),
            keys_to_recreate = decision.keys.to_recreate.len(),
            keys_to_delete = decision.keys.to_delete.len(),
            "Determined service actions"
        );
        decision
    }
}

fn recreate_reason(desired: &DesiredService, existing: &ExistingService) -> Option<String> {
    if desired.user_provided != existing.user_provided {
        let kind = |user_provided: bool| {
            if user_provided {
                "user-provided"
            } else {
                "managed"
            }
        };
        return Some(format!(
            "type changed from {} to {}",
            kind(existing.user_provided),
            kind(desired.user_provided)
        ));
    }
    if !existing.user_provided && desired.label != existing.label {
        return Some(format!(
            "offering changed from {} to {}",
            existing.label.as_deref().unwrap_or("none"),
            desired.label.as_deref().unwrap_or("none")
        ));
    }
    None
}
