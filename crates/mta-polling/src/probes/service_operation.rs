use super::{Probe, ProbeStatus};
use async_trait::async_trait;
use mta_platform::PlatformReader;
use mta_types::{DeployResult, OperationHandle, ServiceOperationState};
use std::sync::Arc;
use tracing::{debug, warn};

/// Watches the last operation of a service instance.
///
/// A failed operation on an optional service finishes with a warning.
pub struct ServiceOperationProbe {
    reader: Arc<dyn PlatformReader>,
    optional: bool,
}

impl ServiceOperationProbe {
    pub fn new(reader: Arc<dyn PlatformReader>, optional: bool) -> Self {
        Self { reader, optional }
    }
}

#[async_trait]
impl Probe for ServiceOperationProbe {
    fn name(&self) -> &str {
        "service operation"
    }

    async fn check(&self, handle: &mut OperationHandle) -> DeployResult<ProbeStatus> {
        let operation = match self.reader.get_last_operation(&handle.target).await? {
            Some(operation) => operation,
            None => {
                debug!(service = %handle.target, "No last operation");
                return Ok(ProbeStatus::Finished);
            }
        };

        match operation.state {
            ServiceOperationState::InProgress => Ok(ProbeStatus::Running),
            ServiceOperationState::Succeeded => Ok(ProbeStatus::Finished),
            ServiceOperationState::Failed => {
                let message = format!(
                    "Service {} {} failed{}",
                    handle.target,
                    operation.operation_type,
                    operation
                        .description
                        .as_deref()
                        .map(|d| format!(": {d}"))
                        .unwrap_or_default()
                );
                if self.optional {
                    warn!(service = %handle.target, "{}", message);
                    Ok(ProbeStatus::FinishedWithWarning(message))
                } else {
                    Ok(ProbeStatus::Error(message))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mta_platform::{InMemoryPlatform, PlatformMutator};
    use mta_types::{DesiredService, OperationKind};
    use std::time::Duration;

    fn handle() -> OperationHandle {
        OperationHandle::start(
            OperationKind::ServiceOperation,
            "db",
            Duration::from_secs(60),
            Utc::now(),
        )
    }

    async fn creating(fail: bool) -> Arc<InMemoryPlatform> {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.set_async_services(true);
        if fail {
            platform.script_service_failure("db");
        }
        platform
            .create_service(&DesiredService::managed("db", "postgres", "small"))
            .await
            .unwrap();
        platform
    }

    #[tokio::test]
    async fn test_in_progress_then_succeeded() {
        let probe = ServiceOperationProbe::new(creating(false).await, false);
        assert_eq!(probe.check(&mut handle()).await.unwrap(), ProbeStatus::Running);
        assert_eq!(probe.check(&mut handle()).await.unwrap(), ProbeStatus::Finished);
    }

    #[tokio::test]
    async fn test_failed_operation() {
        let probe = ServiceOperationProbe::new(creating(true).await, false);
        assert_eq!(probe.check(&mut handle()).await.unwrap(), ProbeStatus::Running);
        assert!(matches!(
            probe.check(&mut handle()).await.unwrap(),
            ProbeStatus::Error(_)
        ));

        let probe = ServiceOperationProbe::new(creating(true).await, true);
        probe.check(&mut handle()).await.unwrap();
        assert!(matches!(
            probe.check(&mut handle()).await.unwrap(),
            ProbeStatus::FinishedWithWarning(_)
        ));
    }
}
