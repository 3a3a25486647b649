//! Action sets decided per resource
//!
//! Each resource kind has its own action enum. Variants are declared in the
//! order they must be executed, so iterating an [`ActionSet`] yields the
//! execution order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ordered set of actions for one resource. Empty means converged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionSet<A: Ord>(BTreeSet<A>);

impl<A: Ord + Copy> ActionSet<A> {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, action: A) -> bool {
        self.0.insert(action)
    }

    pub fn contains(&self, action: A) -> bool {
        self.0.contains(&action)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Actions in execution order.
    pub fn iter(&self) -> impl Iterator<Item = A> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<A> {
        self.iter().collect()
    }
}

impl<A: Ord + Copy> Default for ActionSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Ord + Copy> FromIterator<A> for ActionSet<A> {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<A: Ord + Copy + std::fmt::Display> std::fmt::Display for ActionSet<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.iter().map(|a| a.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Run-state actions for an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStateAction {
    Stop,
    Restage,
    Start,
    Execute,
    Keep,
}

impl std::fmt::Display for ApplicationStateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplicationStateAction::Stop => write!(f, "stop"),
            ApplicationStateAction::Restage => write!(f, "restage"),
            ApplicationStateAction::Start => write!(f, "start"),
            ApplicationStateAction::Execute => write!(f, "execute"),
            ApplicationStateAction::Keep => write!(f, "keep"),
        }
    }
}

impl ActionSet<ApplicationStateAction> {
    /// Nothing to do besides keeping the application as it is.
    pub fn is_converged(&self) -> bool {
        self.iter().all(|a| a == ApplicationStateAction::Keep)
    }
}

/// Actions for a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Delete,
    Create,
    Recreate,
    UpdatePlan,
    UpdateTags,
    UpdateCredentials,
    UpdateSyslogDrainUrl,
    UpdateKeys,
}

impl ServiceAction {
    /// Actions that modify an instance that already exists.
    pub fn is_update(&self) -> bool {
        matches!(
            self,
            ServiceAction::UpdatePlan
                | ServiceAction::UpdateTags
                | ServiceAction::UpdateCredentials
                | ServiceAction::UpdateSyslogDrainUrl
                | ServiceAction::UpdateKeys
        )
    }
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceAction::Delete => write!(f, "delete"),
            ServiceAction::Create => write!(f, "create"),
            ServiceAction::Recreate => write!(f, "recreate"),
            ServiceAction::UpdatePlan => write!(f, "update-plan"),
            ServiceAction::UpdateTags => write!(f, "update-tags"),
            ServiceAction::UpdateCredentials => write!(f, "update-credentials"),
            ServiceAction::UpdateSyslogDrainUrl => write!(f, "update-syslog-drain-url"),
            ServiceAction::UpdateKeys => write!(f, "update-keys"),
        }
    }
}

/// Actions for a service broker registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceBrokerAction {
    Create,
    Update,
}

impl std::fmt::Display for ServiceBrokerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceBrokerAction::Create => write!(f, "create"),
            ServiceBrokerAction::Update => write!(f, "update"),
        }
    }
}
