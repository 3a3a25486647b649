//! Concurrent check of service operations still in progress
//!
//! Before services are touched, every service the package declares is
//! probed for a pending last operation. The probes are read-only and run
//! concurrently; the results are joined before anything else happens.

use futures::future::join_all;
use mta_platform::PlatformReader;
use mta_types::{DeployError, DeployResult, ServiceOperation, ServiceOperationState};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Last operations of a set of services, split by state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InProgressReport {
    /// Services whose last operation is still running
    pub in_progress: Vec<String>,
    /// Services whose last operation failed, with the operation
    pub failed: Vec<(String, ServiceOperation)>,
    /// Services that do not exist or whose last operation succeeded
    pub settled: Vec<String>,
}

impl InProgressReport {
    pub fn has_pending(&self) -> bool {
        !self.in_progress.is_empty()
    }
}

/// Fetch the last operation of every named service concurrently.
pub async fn scan_operations(
    reader: &dyn PlatformReader,
    services: &[String],
) -> DeployResult<BTreeMap<String, Option<ServiceOperation>>> {
    let results = join_all(services.iter().map(|name| async move {
        let operation = reader.get_last_operation(name).await;
        (name.clone(), operation)
    }))
    .await;

    let mut operations = BTreeMap::new();
    for (name, result) in results {
        let operation = result
            .map_err(|e| DeployError::from(e).with_resource(&name))?;
        operations.insert(name, operation);
    }
    Ok(operations)
}

/// Scan and classify the last operations of the named services.
pub async fn find_operations_in_progress(
    reader: &dyn PlatformReader,
    services: &[String],
) -> DeployResult<InProgressReport> {
    let operations = scan_operations(reader, services).await?;

    let mut report = InProgressReport::default();
    for (name, operation) in operations {
        match operation {
            Some(op) if op.state == ServiceOperationState::InProgress => {
                info!(service = %name, operation = %op, "Service operation in progress");
                report.in_progress.push(name);
            }
            Some(op) if op.state == ServiceOperationState::Failed => {
                report.failed.push((name, op));
            }
            _ => {
                debug!(service = %name, "No pending service operation");
                report.settled.push(name);
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mta_platform::{InMemoryPlatform, PlatformError, PlatformMutator};
    use mta_types::{DesiredService, ErrorKind};

    #[tokio::test]
    async fn test_classifies_services() {
        let platform = InMemoryPlatform::new();
        platform
            .create_service(&DesiredService::user_provided("config"))
            .await
            .unwrap();
        platform.set_async_services(true);
        platform
            .create_service(&DesiredService::managed("db", "postgres", "small"))
            .await
            .unwrap();

        let names = vec!["config".to_string(), "db".to_string(), "ghost".to_string()];
        let report = find_operations_in_progress(&platform, &names).await.unwrap();

        assert_eq!(report.in_progress, vec!["db".to_string()]);
        assert_eq!(report.settled, vec!["config".to_string(), "ghost".to_string()]);
        assert!(report.failed.is_empty());
        assert!(report.has_pending());

        let report = find_operations_in_progress(&platform, &names).await.unwrap();
        assert!(!report.has_pending());
    }

    #[tokio::test]
    async fn test_reader_failure_names_the_service() {
        struct Failing;

        #[async_trait::async_trait]
        impl PlatformReader for Failing {
            async fn list_applications(&self) -> mta_platform::Result<Vec<mta_types::ExistingApplication>> {
                Ok(vec![])
            }
            async fn get_application(&self, _: &str) -> mta_platform::Result<Option<mta_types::ExistingApplication>> {
                Ok(None)
            }
            async fn get_service_instance(&self, _: &str) -> mta_platform::Result<Option<mta_types::ExistingService>> {
                Ok(None)
            }
            async fn list_service_bindings(&self, _: &str) -> mta_platform::Result<Vec<mta_types::ServiceBinding>> {
                Ok(vec![])
            }
            async fn list_service_keys(&self, _: &str) -> mta_platform::Result<Vec<mta_types::ExistingServiceKey>> {
                Ok(vec![])
            }
            async fn get_last_operation(&self, _: &str) -> mta_platform::Result<Option<ServiceOperation>> {
                Err(PlatformError::Unavailable("timeout".into()))
            }
            async fn get_recent_logs(&self, _: &str, _: u64) -> mta_platform::Result<mta_types::RecentLogs> {
                Ok(Default::default())
            }
            async fn list_service_brokers(&self) -> mta_platform::Result<Vec<mta_types::ExistingServiceBroker>> {
                Ok(vec![])
            }
            async fn get_default_tags(&self, _: &str) -> mta_platform::Result<Vec<String>> {
                Ok(vec![])
            }
        }

        let err = find_operations_in_progress(&Failing, &["db".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientPoll);
        assert_eq!(err.resource.as_deref(), Some("db"));
    }
}
