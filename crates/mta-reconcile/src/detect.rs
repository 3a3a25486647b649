//! Deployed package detection from application metadata

use mta_types::{DeployedApplication, DeployedPackage, ExistingApplication, PackageId};
use std::collections::BTreeMap;

/// Group applications carrying ownership metadata into package records.
pub fn detect_deployed_packages(applications: &[ExistingApplication]) -> Vec<DeployedPackage> {
    let mut packages: BTreeMap<PackageId, DeployedPackage> = BTreeMap::new();

    for app in applications {
        let metadata = match &app.metadata {
            Some(metadata) => metadata,
            None => continue,
        };
        let package = packages
            .entry(metadata.package_id.clone())
            .or_insert_with(|| DeployedPackage::new(metadata.package_id.clone()));

        if package.version.is_none() {
            package.version = metadata.package_version.clone();
        }
        for service in &metadata.services {
            if !package.contains_service(service) {
                package.services.push(service.clone());
            }
        }
        package.applications.push(DeployedApplication {
            name: app.name.clone(),
            module_name: metadata.module_name.clone(),
            color: metadata.color,
            routes: app.routes.clone(),
            created_at: app.created_at,
        });
    }

    packages.into_values().collect()
}

/// The record of one package, if any of its applications exist.
pub fn find_deployed_package(
    applications: &[ExistingApplication],
    package_id: &PackageId,
) -> Option<DeployedPackage> {
    detect_deployed_packages(applications)
        .into_iter()
        .find(|p| &p.id == package_id)
}
