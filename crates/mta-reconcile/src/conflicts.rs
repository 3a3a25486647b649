//! Ownership conflict detection
//!
//! Before the run creates, rebinds or updates a resource that already exists
//! on the platform, it must prove the resource belongs to the current package
//! or to nobody. The detector only approves or rejects; it never mutates.

use mta_types::{
    DeployError, DeployResult, DeployedPackage, ExistingApplication, PackageId, ServiceBinding,
};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Warnings collected while checking for conflicts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub warnings: Vec<String>,
}

/// Checks existing resources against the ownership records of the platform.
pub struct ConflictDetector<'a> {
    package_id: &'a PackageId,
    deployed: Option<&'a DeployedPackage>,
    applications: &'a [ExistingApplication],
}

impl<'a> ConflictDetector<'a> {
    /// `deployed` is the record of the current package, `applications` every
    /// application in the target space.
    pub fn new(
        package_id: &'a PackageId,
        deployed: Option<&'a DeployedPackage>,
        applications: &'a [ExistingApplication],
    ) -> Self {
        Self {
            package_id,
            deployed,
            applications,
        }
    }

    /// Check an existing service instance the package wants to manage.
    ///
    /// Returns a warning when the service is not bound to anything.
    pub fn check_service(
        &self,
        service_name: &str,
        bindings: &[ServiceBinding],
    ) -> DeployResult<Option<String>> {
        if self
            .deployed
            .map(|d| d.contains_service(service_name))
            .unwrap_or(false)
        {
            debug!(service = %service_name, "Service belongs to the deployed package");
            return Ok(None);
        }

        if bindings.is_empty() {
            let message = format!(
                "Service {service_name} exists but is not bound to any application; it will be managed by package {}",
                self.package_id
            );
            warn!(service = %service_name, "{}", message);
            return Ok(Some(message));
        }

        let mut other_packages = BTreeSet::new();
        let mut standalone = BTreeSet::new();
        for binding in bindings {
            // An application missing from the listing carries no ownership
            // metadata, so it counts as unmanaged.
            let owner = self
                .applications
                .iter()
                .find(|a| a.name == binding.app_name)
                .and_then(|a| a.owner());
            match owner {
                Some(owner) if owner == self.package_id => {}
                Some(owner) => {
                    other_packages.insert(owner.to_string());
                }
                None => {
                    standalone.insert(binding.app_name.clone());
                }
            }
        }

        if !other_packages.is_empty() {
            return Err(DeployError::content(format!(
                "Service {service_name} is associated with other package(s): {}",
                join(&other_packages)
            ))
            .with_resource(service_name));
        }
        if !standalone.is_empty() {
            return Err(DeployError::content(format!(
                "Service {service_name} is associated with other applications: {}",
                join(&standalone)
            ))
            .with_resource(service_name));
        }
        Ok(None)
    }

    /// Check an existing application the package wants to deploy over.
    pub fn check_application(&self, app: &ExistingApplication) -> DeployResult<()> {
        if self
            .deployed
            .map(|d| d.contains_application(&app.name))
            .unwrap_or(false)
        {
            return Ok(());
        }

        match app.owner() {
            Some(owner) if owner == self.package_id => Ok(()),
            Some(owner) => Err(DeployError::content(format!(
                "Application {} is associated with another package: {owner}",
                app.name
            ))
            .with_resource(&app.name)),
            None => Err(DeployError::content(format!(
                "Application {} already exists as a standalone application and is not part of package {}",
                app.name, self.package_id
            ))
            .with_resource(&app.name)),
        }
    }

    /// Check every existing service and application in one pass.
    pub fn check_all(
        &self,
        services: &[(String, Vec<ServiceBinding>)],
        applications: &[&ExistingApplication],
    ) -> DeployResult<ConflictReport> {
        let mut report = ConflictReport::default();
        for (service_name, bindings) in services {
            if let Some(warning) = self.check_service(service_name, bindings)? {
                report.warnings.push(warning);
            }
        }
        for app in applications {
            self.check_application(app)?;
        }
        Ok(report)
    }
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mta_types::{
        AppState, BuildState, DeployedApplication, ErrorKind, OwnershipMetadata, Staging,
    };

    fn app(name: &str, owner: Option<&str>) -> ExistingApplication {
        ExistingApplication {
            name: name.into(),
            state: AppState::Started,
            instances: 1,
            instance_states: vec![],
            memory_mb: None,
            disk_mb: None,
            staging: Staging::default(),
            routes: vec![],
            services: vec![],
            env: Default::default(),
            metadata: owner.map(|id| OwnershipMetadata {
                package_id: PackageId::new(id),
                package_version: None,
                module_name: name.into(),
                color: None,
                services: vec![],
            }),
            build: BuildState::Staged,
            executed: false,
            created_at: Utc::now(),
        }
    }

    fn binding(app: &str) -> ServiceBinding {
        ServiceBinding {
            app_name: app.into(),
            service_name: "db".into(),
            parameters: None,
        }
    }

    fn own_package() -> DeployedPackage {
        let mut package = DeployedPackage::new(PackageId::new("shop"));
        package.services = vec!["db".into()];
        package.applications = vec![DeployedApplication {
            name: "web".into(),
            module_name: "web".into(),
            color: None,
            routes: vec![],
            created_at: Utc::now(),
        }];
        package
    }

    #[test]
    fn test_own_service_passes() {
        let id = PackageId::new("shop");
        let deployed = own_package();
        let apps = vec![app("other", Some("crm"))];
        let detector = ConflictDetector::new(&id, Some(&deployed), &apps);
        assert_eq!(detector.check_service("db", &[binding("other")]).unwrap(), None);
    }

    #[test]
    fn test_unbound_service_warns() {
        let id = PackageId::new("shop");
        let detector = ConflictDetector::new(&id, None, &[]);
        let warning = detector.check_service("db", &[]).unwrap();
        assert!(warning.unwrap().contains("not bound"));
    }

    #[test]
    fn test_bound_to_other_packages_fails() {
        let id = PackageId::new("shop");
        let apps = vec![app("a", Some("crm")), app("b", Some("billing"))];
        let detector = ConflictDetector::new(&id, None, &apps);

        let err = detector
            .check_service("db", &[binding("a"), binding("b")])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Content);
        assert!(err.message.contains("associated with other package"));
        assert!(err.message.contains("billing, crm"));
    }

    #[test]
    fn test_bound_to_standalone_fails() {
        let id = PackageId::new("shop");
        let apps = vec![app("legacy", None)];
        let detector = ConflictDetector::new(&id, None, &apps);

        let err = detector.check_service("db", &[binding("legacy")]).unwrap_err();
        assert!(err.message.contains("associated with other applications"));
    }

    #[test]
    fn test_bound_to_unlisted_application_fails_as_content() {
        let id = PackageId::new("shop");
        let detector = ConflictDetector::new(&id, None, &[]);

        let err = detector.check_service("db", &[binding("ghost")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Content);
        assert!(err.message.contains("associated with other applications: ghost"));
    }

    #[test]
    fn test_bound_to_own_apps_passes() {
        let id = PackageId::new("shop");
        let apps = vec![app("web", Some("shop"))];
        let detector = ConflictDetector::new(&id, None, &apps);
        assert!(detector.check_service("db", &[binding("web")]).unwrap().is_none());
    }

    #[test]
    fn test_existing_application_ownership() {
        let id = PackageId::new("shop");
        let deployed = own_package();
        let apps = vec![];
        let detector = ConflictDetector::new(&id, Some(&deployed), &apps);

        assert!(detector.check_application(&app("web", Some("shop"))).is_ok());

        let err = detector
            .check_application(&app("api", Some("crm")))
            .unwrap_err();
        assert!(err.message.contains("associated with another package: crm"));

        let err = detector.check_application(&app("api", None)).unwrap_err();
        assert!(err.message.contains("standalone application"));
    }
}
