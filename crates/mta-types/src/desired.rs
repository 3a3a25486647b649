//! Desired state of a whole package

use crate::application::DesiredApplication;
use crate::ids::PackageId;
use crate::service::DesiredService;
use serde::{Deserialize, Serialize};

/// Everything a run should converge the platform toward.
///
/// Built by the descriptor layer; the engine never looks at the descriptor
/// format itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub package_id: PackageId,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub applications: Vec<DesiredApplication>,

    #[serde(default)]
    pub services: Vec<DesiredService>,

    /// Deploy only these modules; `None` deploys all of them
    #[serde(default)]
    pub modules_for_deployment: Option<Vec<String>>,
}

impl DesiredState {
    pub fn new(package_id: PackageId) -> Self {
        Self {
            package_id,
            version: None,
            applications: Vec::new(),
            services: Vec::new(),
            modules_for_deployment: None,
        }
    }

    /// Whether a module takes part in this run.
    pub fn includes_module(&self, module_name: &str) -> bool {
        match &self.modules_for_deployment {
            Some(modules) => modules.iter().any(|m| m == module_name),
            None => true,
        }
    }

    pub fn find_service(&self, name: &str) -> Option<&DesiredService> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn find_application(&self, name: &str) -> Option<&DesiredApplication> {
        self.applications.iter().find(|a| a.name == name)
    }
}
