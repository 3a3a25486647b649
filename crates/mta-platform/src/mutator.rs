//! Mutating platform operations

use crate::error::Result;
use async_trait::async_trait;
use mta_types::{
    DesiredApplication, DesiredService, DesiredServiceBroker, DesiredServiceKey,
    OwnershipMetadata, Staging,
};
use std::collections::BTreeMap;

/// Changes platform state.
///
/// Calls return once the platform accepted the request. Long-running effects
/// (staging, starting, service provisioning) are observed through
/// [`crate::PlatformReader`].
#[async_trait]
pub trait PlatformMutator: Send + Sync {
    async fn create_application(&self, app: &DesiredApplication) -> Result<()>;

    async fn update_application_env(
        &self,
        name: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<()>;

    async fn update_application_memory(&self, name: &str, memory_mb: u64) -> Result<()>;

    async fn update_application_disk(&self, name: &str, disk_mb: u64) -> Result<()>;

    async fn update_application_instances(&self, name: &str, instances: u32) -> Result<()>;

    async fn update_application_routes(&self, name: &str, routes: &[String]) -> Result<()>;

    async fn update_application_staging(&self, name: &str, staging: &Staging) -> Result<()>;

    async fn update_application_metadata(
        &self,
        name: &str,
        metadata: &OwnershipMetadata,
    ) -> Result<()>;

    async fn rename_application(&self, name: &str, new_name: &str) -> Result<()>;

    async fn delete_application(&self, name: &str) -> Result<()>;

    async fn start_application(&self, name: &str) -> Result<()>;

    async fn stop_application(&self, name: &str) -> Result<()>;

    async fn restage_application(&self, name: &str) -> Result<()>;

    /// Record that the application ran to completion.
    async fn mark_application_executed(&self, name: &str) -> Result<()>;

    async fn bind_service(
        &self,
        app_name: &str,
        service_name: &str,
        parameters: Option<&serde_json::Value>,
    ) -> Result<()>;

    async fn unbind_service(&self, app_name: &str, service_name: &str) -> Result<()>;

    async fn create_service(&self, service: &DesiredService) -> Result<()>;

    async fn update_service_credentials(
        &self,
        name: &str,
        credentials: &BTreeMap<String, serde_json::Value>,
    ) -> Result<()>;

    async fn update_service_tags(&self, name: &str, tags: &[String]) -> Result<()>;

    async fn update_service_plan(&self, name: &str, plan: &str) -> Result<()>;

    async fn update_service_syslog_drain_url(&self, name: &str, url: &str) -> Result<()>;

    async fn delete_service(&self, name: &str) -> Result<()>;

    async fn create_service_key(&self, service_name: &str, key: &DesiredServiceKey)
        -> Result<()>;

    async fn delete_service_key(&self, service_name: &str, key_name: &str) -> Result<()>;

    async fn create_service_broker(&self, broker: &DesiredServiceBroker) -> Result<()>;

    async fn update_service_broker(&self, broker: &DesiredServiceBroker) -> Result<()>;
}
