//! Read-only view of platform state

use crate::error::Result;
use async_trait::async_trait;
use mta_types::{
    ExistingApplication, ExistingService, ExistingServiceBroker, ExistingServiceKey,
    RecentLogs, ServiceBinding, ServiceOperation,
};

/// Queries current platform state. Every call reflects the platform at the
/// time of the call; nothing is cached across passes.
#[async_trait]
pub trait PlatformReader: Send + Sync {
    /// List all applications in the target space
    async fn list_applications(&self) -> Result<Vec<ExistingApplication>>;

    /// Get an application by name
    async fn get_application(&self, name: &str) -> Result<Option<ExistingApplication>>;

    /// Get a service instance by name
    async fn get_service_instance(&self, name: &str) -> Result<Option<ExistingService>>;

    /// List bindings of a service instance
    async fn list_service_bindings(&self, service_name: &str) -> Result<Vec<ServiceBinding>>;

    /// List keys of a service instance
    async fn list_service_keys(&self, service_name: &str) -> Result<Vec<ExistingServiceKey>>;

    /// Last operation on a service instance
    async fn get_last_operation(&self, service_name: &str) -> Result<Option<ServiceOperation>>;

    /// Log lines of an application after the given offset
    async fn get_recent_logs(&self, app_name: &str, since_offset: u64) -> Result<RecentLogs>;

    /// List registered service brokers
    async fn list_service_brokers(&self) -> Result<Vec<ExistingServiceBroker>>;

    /// Tags the platform attaches to every instance of an offering
    async fn get_default_tags(&self, label: &str) -> Result<Vec<String>>;
}
