//! Serializable dump of platform state

use mta_types::{
    ExistingApplication, ExistingService, ExistingServiceBroker, ExistingServiceKey, LogLine,
    ServiceBinding,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Platform state as a plain document, used to seed and inspect the
/// in-memory platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformSnapshot {
    #[serde(default)]
    pub applications: Vec<ExistingApplication>,

    #[serde(default)]
    pub services: Vec<ExistingService>,

    #[serde(default)]
    pub service_keys: Vec<ExistingServiceKey>,

    #[serde(default)]
    pub bindings: Vec<ServiceBinding>,

    #[serde(default)]
    pub brokers: Vec<ExistingServiceBroker>,

    /// Default tags per offering label
    #[serde(default)]
    pub default_tags: BTreeMap<String, Vec<String>>,

    /// Log lines per application
    #[serde(default)]
    pub logs: BTreeMap<String, Vec<LogLine>>,
}
