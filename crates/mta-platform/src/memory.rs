//! In-memory platform
//!
//! Suitable for development, dry runs and testing. Asynchronous effects
//! settle one read later: a started application reports starting instances
//! until the next `get_application`, a restaged one reports a pending build,
//! and (when enabled) a managed service operation stays in progress for one
//! `get_last_operation`. An asynchronous delete keeps the instance, and its
//! name, until that read.

use crate::error::{PlatformError, Result};
use crate::mutator::PlatformMutator;
use crate::reader::PlatformReader;
use crate::snapshot::PlatformSnapshot;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use mta_types::{
    AppState, BuildState, DesiredApplication, DesiredService, DesiredServiceBroker,
    DesiredServiceKey, ExistingApplication, ExistingService, ExistingServiceBroker,
    ExistingServiceKey, InstanceState, LogLine, OwnershipMetadata, RecentLogs, ServiceBinding,
    ServiceOperation, ServiceOperationState, ServiceOperationType, Staging,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory platform backend
pub struct InMemoryPlatform {
    applications: DashMap<String, ExistingApplication>,
    services: DashMap<String, ExistingService>,
    service_keys: DashMap<String, Vec<ExistingServiceKey>>,
    bindings: DashMap<String, Vec<ServiceBinding>>,
    brokers: DashMap<String, ExistingServiceBroker>,
    default_tags: DashMap<String, Vec<String>>,
    logs: DashMap<String, Vec<LogLine>>,

    /// Instance states an application settles into after a start
    settled_instances: DashMap<String, Vec<InstanceState>>,
    scripted_instances: DashMap<String, Vec<InstanceState>>,
    settled_builds: DashMap<String, BuildState>,
    failing_service_operations: DashSet<String>,
    failures: DashMap<String, PlatformError>,
    async_services: AtomicBool,
    journal: Mutex<Vec<String>>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self {
            applications: DashMap::new(),
            services: DashMap::new(),
            service_keys: DashMap::new(),
            bindings: DashMap::new(),
            brokers: DashMap::new(),
            default_tags: DashMap::new(),
            logs: DashMap::new(),
            settled_instances: DashMap::new(),
            scripted_instances: DashMap::new(),
            settled_builds: DashMap::new(),
            failing_service_operations: DashSet::new(),
            failures: DashMap::new(),
            async_services: AtomicBool::new(false),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Seed a platform from a snapshot document.
    pub fn from_snapshot(snapshot: PlatformSnapshot) -> Self {
        let platform = Self::new();
        for app in snapshot.applications {
            platform.insert_application(app);
        }
        for service in snapshot.services {
            platform.insert_service(service);
        }
        for key in snapshot.service_keys {
            platform
                .service_keys
                .entry(key.service_name.clone())
                .or_default()
                .push(key);
        }
        for binding in snapshot.bindings {
            platform.insert_binding(binding);
        }
        for broker in snapshot.brokers {
            platform.brokers.insert(broker.name.clone(), broker);
        }
        for (label, tags) in snapshot.default_tags {
            platform.default_tags.insert(label, tags);
        }
        for (app, lines) in snapshot.logs {
            platform.logs.insert(app, lines);
        }
        platform
    }

    /// Dump the current state.
    pub fn snapshot(&self) -> PlatformSnapshot {
        let mut applications: Vec<_> = self.applications.iter().map(|a| a.clone()).collect();
        applications.sort_by(|a, b| a.name.cmp(&b.name));
        let mut services: Vec<_> = self.services.iter().map(|s| s.clone()).collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        let mut brokers: Vec<_> = self.brokers.iter().map(|b| b.clone()).collect();
        brokers.sort_by(|a, b| a.name.cmp(&b.name));

        PlatformSnapshot {
            applications,
            services,
            service_keys: self
                .service_keys
                .iter()
                .flat_map(|k| k.value().clone())
                .collect(),
            bindings: self
                .bindings
                .iter()
                .flat_map(|b| b.value().clone())
                .collect(),
            brokers,
            default_tags: self
                .default_tags
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            logs: self
                .logs
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    pub fn insert_application(&self, app: ExistingApplication) {
        for service in &app.services {
            let binding = ServiceBinding {
                app_name: app.name.clone(),
                service_name: service.clone(),
                parameters: None,
            };
            self.insert_binding(binding);
        }
        self.applications.insert(app.name.clone(), app);
    }

    pub fn insert_service(&self, service: ExistingService) {
        self.services.insert(service.name.clone(), service);
    }

    pub fn insert_service_key(&self, key: ExistingServiceKey) {
        self.service_keys
            .entry(key.service_name.clone())
            .or_default()
            .push(key);
    }

    pub fn insert_binding(&self, binding: ServiceBinding) {
        let mut bindings = self.bindings.entry(binding.service_name.clone()).or_default();
        if !bindings.iter().any(|b| b.app_name == binding.app_name) {
            bindings.push(binding);
        }
    }

    pub fn insert_broker(&self, broker: ExistingServiceBroker) {
        self.brokers.insert(broker.name.clone(), broker);
    }

    pub fn set_default_tags(&self, label: impl Into<String>, tags: Vec<String>) {
        self.default_tags.insert(label.into(), tags);
    }

    pub fn push_log(&self, app_name: &str, line: LogLine) {
        self.logs.entry(app_name.to_string()).or_default().push(line);
    }

    /// Instance states the application settles into after its next start.
    pub fn script_instance_states(&self, app_name: &str, states: Vec<InstanceState>) {
        self.scripted_instances.insert(app_name.to_string(), states);
    }

    /// Make the next asynchronous operation on the service fail.
    pub fn script_service_failure(&self, service_name: &str) {
        self.failing_service_operations
            .insert(service_name.to_string());
    }

    /// Managed service operations stay in progress for one read.
    pub fn set_async_services(&self, enabled: bool) {
        self.async_services.store(enabled, Ordering::SeqCst);
    }

    /// Fail the next call of `operation` on `target` with `error`.
    pub fn fail_next(&self, operation: &str, target: &str, error: PlatformError) {
        self.failures.insert(failure_key(operation, target), error);
    }

    /// Mutations performed so far, as `operation target` entries.
    pub async fn mutations(&self) -> Vec<String> {
        self.journal.lock().await.clone()
    }

    async fn record(&self, operation: &str, target: &str) -> Result<()> {
        if let Some((_, error)) = self.failures.remove(&failure_key(operation, target)) {
            debug!(operation, target, error = %error, "Injected platform failure");
            return Err(error);
        }
        self.journal
            .lock()
            .await
            .push(format!("{operation} {target}"));
        Ok(())
    }

    fn with_application<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ExistingApplication),
    {
        let mut app = self
            .applications
            .get_mut(name)
            .ok_or_else(|| PlatformError::NotFound(format!("application {name}")))?;
        f(&mut app);
        Ok(())
    }

    fn with_service<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ExistingService),
    {
        let mut service = self
            .services
            .get_mut(name)
            .ok_or_else(|| PlatformError::NotFound(format!("service {name}")))?;
        f(&mut service);
        Ok(())
    }

    fn begin_service_operation(&self, service: &mut ExistingService, kind: ServiceOperationType) {
        let state = if !service.user_provided && self.async_services.load(Ordering::SeqCst) {
            ServiceOperationState::InProgress
        } else if self.failing_service_operations.remove(&service.name).is_some() {
            ServiceOperationState::Failed
        } else {
            ServiceOperationState::Succeeded
        };
        service.last_operation = Some(ServiceOperation::new(kind, state));
    }

    fn remove_service(&self, name: &str) {
        self.services.remove(name);
        self.service_keys.remove(name);
        self.bindings.remove(name);
    }

    fn settle_application(&self, name: &str) {
        if let Some((_, states)) = self.settled_instances.remove(name) {
            if let Some(mut app) = self.applications.get_mut(name) {
                app.instance_states = states;
            }
        }
        if let Some((_, build)) = self.settled_builds.remove(name) {
            if let Some(mut app) = self.applications.get_mut(name) {
                app.build = build;
            }
        }
    }
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn failure_key(operation: &str, target: &str) -> String {
    format!("{operation}:{target}")
}

#[async_trait]
impl PlatformReader for InMemoryPlatform {
    async fn list_applications(&self) -> Result<Vec<ExistingApplication>> {
        let names: Vec<String> = self.applications.iter().map(|a| a.key().clone()).collect();
        for name in &names {
            self.settle_application(name);
        }
        let mut apps: Vec<_> = self.applications.iter().map(|a| a.clone()).collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    async fn get_application(&self, name: &str) -> Result<Option<ExistingApplication>> {
        self.settle_application(name);
        Ok(self.applications.get(name).map(|a| a.clone()))
    }

    async fn get_service_instance(&self, name: &str) -> Result<Option<ExistingService>> {
        Ok(self.services.get(name).map(|s| s.clone()))
    }

    async fn list_service_bindings(&self, service_name: &str) -> Result<Vec<ServiceBinding>> {
        Ok(self
            .bindings
            .get(service_name)
            .map(|b| b.clone())
            .unwrap_or_default())
    }

    async fn list_service_keys(&self, service_name: &str) -> Result<Vec<ExistingServiceKey>> {
        Ok(self
            .service_keys
            .get(service_name)
            .map(|k| k.clone())
            .unwrap_or_default())
    }

    async fn get_last_operation(&self, service_name: &str) -> Result<Option<ServiceOperation>> {
        let (observed, deleted) = {
            let mut service = match self.services.get_mut(service_name) {
                Some(service) => service,
                None => return Ok(None),
            };
            let observed = service.last_operation.clone();
            let mut deleted = false;
            if let Some(operation) = service.last_operation.as_mut() {
                if operation.is_in_progress() {
                    operation.state =
                        if self.failing_service_operations.remove(service_name).is_some() {
                            ServiceOperationState::Failed
                        } else {
                            ServiceOperationState::Succeeded
                        };
                    deleted = operation.operation_type == ServiceOperationType::Delete
                        && operation.state == ServiceOperationState::Succeeded;
                }
            }
            (observed, deleted)
        };
        if deleted {
            self.remove_service(service_name);
        }
        Ok(observed)
    }

    async fn get_recent_logs(&self, app_name: &str, since_offset: u64) -> Result<RecentLogs> {
        let lines = self
            .logs
            .get(app_name)
            .map(|l| l.clone())
            .unwrap_or_default();
        let start = (since_offset as usize).min(lines.len());
        Ok(RecentLogs {
            next_offset: lines.len() as u64,
            lines: lines[start..].to_vec(),
        })
    }

    async fn list_service_brokers(&self) -> Result<Vec<ExistingServiceBroker>> {
        let mut brokers: Vec<_> = self.brokers.iter().map(|b| b.clone()).collect();
        brokers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(brokers)
    }

    async fn get_default_tags(&self, label: &str) -> Result<Vec<String>> {
        Ok(self
            .default_tags
            .get(label)
            .map(|t| t.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PlatformMutator for InMemoryPlatform {
    async fn create_application(&self, app: &DesiredApplication) -> Result<()> {
        self.record("create_application", &app.name).await?;
        if self.applications.contains_key(&app.name) {
            return Err(PlatformError::AlreadyExists(format!("application {}", app.name)));
        }
        let existing = ExistingApplication {
            name: app.name.clone(),
            state: AppState::Stopped,
            instances: app.instances,
            instance_states: Vec::new(),
            memory_mb: app.memory_mb,
            disk_mb: app.disk_mb,
            staging: app.staging.clone(),
            routes: app.routes.clone(),
            services: Vec::new(),
            env: app.env.clone(),
            metadata: None,
            build: BuildState::NotStaged,
            executed: false,
            created_at: Utc::now(),
        };
        self.applications.insert(app.name.clone(), existing);
        Ok(())
    }

    async fn update_application_env(
        &self,
        name: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.record("update_application_env", name).await?;
        self.with_application(name, |app| app.env = env.clone())
    }

    async fn update_application_memory(&self, name: &str, memory_mb: u64) -> Result<()> {
        self.record("update_application_memory", name).await?;
        self.with_application(name, |app| app.memory_mb = Some(memory_mb))
    }

    async fn update_application_disk(&self, name: &str, disk_mb: u64) -> Result<()> {
        self.record("update_application_disk", name).await?;
        self.with_application(name, |app| app.disk_mb = Some(disk_mb))
    }

    async fn update_application_instances(&self, name: &str, instances: u32) -> Result<()> {
        self.record("update_application_instances", name).await?;
        self.with_application(name, |app| app.instances = instances)
    }

    async fn update_application_routes(&self, name: &str, routes: &[String]) -> Result<()> {
        self.record("update_application_routes", name).await?;
        self.with_application(name, |app| app.routes = routes.to_vec())
    }

    async fn update_application_staging(&self, name: &str, staging: &Staging) -> Result<()> {
        self.record("update_application_staging", name).await?;
        self.with_application(name, |app| app.staging = staging.clone())
    }

    async fn update_application_metadata(
        &self,
        name: &str,
        metadata: &OwnershipMetadata,
    ) -> Result<()> {
        self.record("update_application_metadata", name).await?;
        self.with_application(name, |app| app.metadata = Some(metadata.clone()))
    }

    async fn rename_application(&self, name: &str, new_name: &str) -> Result<()> {
        self.record("rename_application", name).await?;
        if self.applications.contains_key(new_name) {
            return Err(PlatformError::AlreadyExists(format!("application {new_name}")));
        }
        let (_, mut app) = self
            .applications
            .remove(name)
            .ok_or_else(|| PlatformError::NotFound(format!("application {name}")))?;
        app.name = new_name.to_string();
        self.applications.insert(new_name.to_string(), app);

        for mut bindings in self.bindings.iter_mut() {
            for binding in bindings.iter_mut() {
                if binding.app_name == name {
                    binding.app_name = new_name.to_string();
                }
            }
        }
        if let Some((_, lines)) = self.logs.remove(name) {
            self.logs.insert(new_name.to_string(), lines);
        }
        Ok(())
    }

    async fn delete_application(&self, name: &str) -> Result<()> {
        self.record("delete_application", name).await?;
        self.applications
            .remove(name)
            .ok_or_else(|| PlatformError::NotFound(format!("application {name}")))?;
        for mut bindings in self.bindings.iter_mut() {
            bindings.retain(|b| b.app_name != name);
        }
        Ok(())
    }

    async fn start_application(&self, name: &str) -> Result<()> {
        self.record("start_application", name).await?;
        let mut target = 0;
        self.with_application(name, |app| {
            app.state = AppState::Started;
            app.executed = false;
            app.instance_states = vec![InstanceState::Starting; app.instances as usize];
            target = app.instances;
        })?;
        let settled = self
            .scripted_instances
            .remove(name)
            .map(|(_, states)| states)
            .unwrap_or_else(|| vec![InstanceState::Running; target as usize]);
        self.settled_instances.insert(name.to_string(), settled);
        Ok(())
    }

    async fn stop_application(&self, name: &str) -> Result<()> {
        self.record("stop_application", name).await?;
        self.settled_instances.remove(name);
        self.with_application(name, |app| {
            app.state = AppState::Stopped;
            app.instance_states.clear();
        })
    }

    async fn restage_application(&self, name: &str) -> Result<()> {
        self.record("restage_application", name).await?;
        self.with_application(name, |app| app.build = BuildState::Pending)?;
        self.settled_builds
            .insert(name.to_string(), BuildState::Staged);
        Ok(())
    }

    async fn mark_application_executed(&self, name: &str) -> Result<()> {
        self.record("mark_application_executed", name).await?;
        self.with_application(name, |app| app.executed = true)
    }

    async fn bind_service(
        &self,
        app_name: &str,
        service_name: &str,
        parameters: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.record("bind_service", &format!("{app_name}/{service_name}"))
            .await?;
        if !self.services.contains_key(service_name) {
            return Err(PlatformError::NotFound(format!("service {service_name}")));
        }
        self.with_application(app_name, |app| {
            if !app.services.iter().any(|s| s == service_name) {
                app.services.push(service_name.to_string());
            }
        })?;
        self.insert_binding(ServiceBinding {
            app_name: app_name.to_string(),
            service_name: service_name.to_string(),
            parameters: parameters.cloned(),
        });
        Ok(())
    }

    async fn unbind_service(&self, app_name: &str, service_name: &str) -> Result<()> {
        self.record("unbind_service", &format!("{app_name}/{service_name}"))
            .await?;
        self.with_application(app_name, |app| app.services.retain(|s| s != service_name))?;
        if let Some(mut bindings) = self.bindings.get_mut(service_name) {
            bindings.retain(|b| b.app_name != app_name);
        }
        Ok(())
    }

    async fn create_service(&self, service: &DesiredService) -> Result<()> {
        self.record("create_service", &service.name).await?;
        if self.services.contains_key(&service.name) {
            return Err(PlatformError::AlreadyExists(format!("service {}", service.name)));
        }
        let mut existing = ExistingService {
            name: service.name.clone(),
            label: service.label.clone(),
            plan: service.plan.clone(),
            user_provided: service.user_provided,
            credentials: service.credentials.clone(),
            tags: Some(service.tags.clone()),
            syslog_drain_url: service.syslog_drain_url.clone(),
            last_operation: None,
        };
        self.begin_service_operation(&mut existing, ServiceOperationType::Create);
        self.services.insert(service.name.clone(), existing);
        Ok(())
    }

    async fn update_service_credentials(
        &self,
        name: &str,
        credentials: &BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.record("update_service_credentials", name).await?;
        self.with_service(name, |service| {
            service.credentials = credentials.clone();
            self.begin_service_operation(service, ServiceOperationType::Update);
        })
    }

    async fn update_service_tags(&self, name: &str, tags: &[String]) -> Result<()> {
        self.record("update_service_tags", name).await?;
        self.with_service(name, |service| {
            service.tags = Some(tags.to_vec());
            self.begin_service_operation(service, ServiceOperationType::Update);
        })
    }

    async fn update_service_plan(&self, name: &str, plan: &str) -> Result<()> {
        self.record("update_service_plan", name).await?;
        self.with_service(name, |service| {
            service.plan = Some(plan.to_string());
            self.begin_service_operation(service, ServiceOperationType::Update);
        })
    }

    async fn update_service_syslog_drain_url(&self, name: &str, url: &str) -> Result<()> {
        self.record("update_service_syslog_drain_url", name).await?;
        self.with_service(name, |service| {
            service.syslog_drain_url = Some(url.to_string());
        })
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        self.record("delete_service", name).await?;
        let bound = self
            .bindings
            .get(name)
            .map(|b| !b.is_empty())
            .unwrap_or(false);
        if bound {
            return Err(PlatformError::rejected(
                422,
                format!("service {name} still has bindings"),
            ));
        }
        let asynchronous = {
            let mut service = self
                .services
                .get_mut(name)
                .ok_or_else(|| PlatformError::NotFound(format!("service {name}")))?;
            if service.user_provided || !self.async_services.load(Ordering::SeqCst) {
                false
            } else {
                service.last_operation = Some(ServiceOperation::new(
                    ServiceOperationType::Delete,
                    ServiceOperationState::InProgress,
                ));
                true
            }
        };
        if !asynchronous {
            self.remove_service(name);
        }
        Ok(())
    }

    async fn create_service_key(
        &self,
        service_name: &str,
        key: &DesiredServiceKey,
    ) -> Result<()> {
        self.record("create_service_key", &format!("{service_name}/{}", key.name))
            .await?;
        if !self.services.contains_key(service_name) {
            return Err(PlatformError::NotFound(format!("service {service_name}")));
        }
        let mut keys = self.service_keys.entry(service_name.to_string()).or_default();
        if keys.iter().any(|k| k.name == key.name) {
            return Err(PlatformError::AlreadyExists(format!(
                "service key {service_name}/{}",
                key.name
            )));
        }
        let mut credentials = BTreeMap::new();
        credentials.insert(
            "key".to_string(),
            serde_json::Value::String(format!("{service_name}-{}", key.name)),
        );
        keys.push(ExistingServiceKey {
            name: key.name.clone(),
            service_name: service_name.to_string(),
            parameters: key.parameters.clone(),
            credentials,
        });
        Ok(())
    }

    async fn delete_service_key(&self, service_name: &str, key_name: &str) -> Result<()> {
        self.record("delete_service_key", &format!("{service_name}/{key_name}"))
            .await?;
        let mut keys = self
            .service_keys
            .get_mut(service_name)
            .ok_or_else(|| PlatformError::NotFound(format!("service {service_name}")))?;
        let before = keys.len();
        keys.retain(|k| k.name != key_name);
        if keys.len() == before {
            return Err(PlatformError::NotFound(format!(
                "service key {service_name}/{key_name}"
            )));
        }
        Ok(())
    }

    async fn create_service_broker(&self, broker: &DesiredServiceBroker) -> Result<()> {
        self.record("create_service_broker", &broker.name).await?;
        if self.brokers.contains_key(&broker.name) {
            return Err(PlatformError::AlreadyExists(format!(
                "service broker {}",
                broker.name
            )));
        }
        self.brokers.insert(
            broker.name.clone(),
            ExistingServiceBroker {
                name: broker.name.clone(),
                url: broker.url.clone(),
                username: broker.username.clone(),
                space_scoped: broker.space_scoped,
            },
        );
        Ok(())
    }

    async fn update_service_broker(&self, broker: &DesiredServiceBroker) -> Result<()> {
        self.record("update_service_broker", &broker.name).await?;
        let mut existing = self
            .brokers
            .get_mut(&broker.name)
            .ok_or_else(|| PlatformError::NotFound(format!("service broker {}", broker.name)))?;
        existing.url = broker.url.clone();
        existing.username = broker.username.clone();
        Ok(())
    }
}
