use super::{Probe, ProbeStatus};
use async_trait::async_trait;
use mta_platform::PlatformReader;
use mta_types::{BuildState, DeployError, DeployResult, OperationHandle};
use std::sync::Arc;
use tracing::debug;

/// Watches the build state of an application until staging completes.
pub struct StageProbe {
    reader: Arc<dyn PlatformReader>,
}

impl StageProbe {
    pub fn new(reader: Arc<dyn PlatformReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl Probe for StageProbe {
    fn name(&self) -> &str {
        "stage"
    }

    async fn check(&self, handle: &mut OperationHandle) -> DeployResult<ProbeStatus> {
        let app = self
            .reader
            .get_application(&handle.target)
            .await?
            .ok_or_else(|| {
                DeployError::platform(format!("Application {} no longer exists", handle.target))
                    .with_resource(&handle.target)
            })?;

        debug!(app = %handle.target, build = ?app.build, "Checking staging");
        Ok(match app.build {
            BuildState::NotStaged | BuildState::Pending => ProbeStatus::Running,
            BuildState::Staged => ProbeStatus::Finished,
            BuildState::Failed { reason } => ProbeStatus::Error(format!(
                "Staging of application {} failed: {reason}",
                handle.target
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mta_platform::{InMemoryPlatform, PlatformMutator};
    use mta_types::{DesiredApplication, ErrorKind, OperationKind};
    use std::time::Duration;

    fn handle(target: &str) -> OperationHandle {
        OperationHandle::start(
            OperationKind::StageApplication,
            target,
            Duration::from_secs(60),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_restage_settles_to_staged() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform
            .create_application(&DesiredApplication::new("web", "web"))
            .await
            .unwrap();
        platform.restage_application("web").await.unwrap();

        let probe = StageProbe::new(platform.clone());
        assert_eq!(probe.check(&mut handle("web")).await.unwrap(), ProbeStatus::Finished);
    }

    #[tokio::test]
    async fn test_missing_application_is_an_error() {
        let probe = StageProbe::new(Arc::new(InMemoryPlatform::new()));
        let err = probe.check(&mut handle("ghost")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Platform);
    }
}
