//! Service broker types

use serde::{Deserialize, Serialize};

/// Broker attributes declared on an application module.
///
/// Only the name has a fallback (the application name); everything else
/// must be supplied before a [`DesiredServiceBroker`] can be built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBrokerSpec {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    /// Register the broker for the current space only
    #[serde(default)]
    pub space_scoped: bool,
}

/// Fully resolved broker registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredServiceBroker {
    pub name: String,
    pub username: String,
    pub password: String,
    pub url: String,
    pub space_scoped: bool,
}

/// A broker as reported by the platform. Passwords are never reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingServiceBroker {
    pub name: String,
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub space_scoped: bool,
}
