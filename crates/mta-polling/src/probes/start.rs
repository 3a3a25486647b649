use super::{Probe, ProbeStatus};
use async_trait::async_trait;
use mta_platform::PlatformReader;
use mta_types::{DeployError, DeployResult, OperationHandle};
use std::sync::Arc;
use tracing::debug;

/// Watches instance counters until every requested instance is running.
pub struct StartProbe {
    reader: Arc<dyn PlatformReader>,
    fail_on_crashed: bool,
}

impl StartProbe {
    pub fn new(reader: Arc<dyn PlatformReader>, fail_on_crashed: bool) -> Self {
        Self {
            reader,
            fail_on_crashed,
        }
    }
}

#[async_trait]
impl Probe for StartProbe {
    fn name(&self) -> &str {
        "start"
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

        let counts = app.instance_counts();
        let summary = counts.describe(app.instances);
        debug!(app = %handle.target, "{}", summary);

        if counts.running == app.instances {
            return Ok(ProbeStatus::Finished);
        }
        if counts.flapping > 0 {
            return Ok(ProbeStatus::Error(format!(
                "Application {} is flapping: {summary}",
                handle.target
            )));
        }
        if counts.crashed > 0 && self.fail_on_crashed {
            return Ok(ProbeStatus::Error(format!(
                "Application {} crashed: {summary}",
                handle.target
            )));
        }
        Ok(ProbeStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mta_platform::{InMemoryPlatform, PlatformMutator};
    use mta_types::{DesiredApplication, InstanceState, OperationKind};
    use std::time::Duration;

    fn handle() -> OperationHandle {
        OperationHandle::start(
            OperationKind::StartApplication,
            "web",
            Duration::from_secs(60),
            Utc::now(),
        )
    }

    async fn started(states: Option<Vec<InstanceState>>) -> Arc<InMemoryPlatform> {
        let platform = Arc::new(InMemoryPlatform::new());
        let mut app = DesiredApplication::new("web", "web");
        app.instances = 2;
        platform.create_application(&app).await.unwrap();
        if let Some(states) = states {
            platform.script_instance_states("web", states);
        }
        platform.start_application("web").await.unwrap();
        platform
    }

    #[tokio::test]
    async fn test_all_running_finishes() {
        let probe = StartProbe::new(started(None).await, true);
        assert_eq!(probe.check(&mut handle()).await.unwrap(), ProbeStatus::Finished);
    }

    #[tokio::test]
    async fn test_starting_keeps_running() {
        let platform =
            started(Some(vec![InstanceState::Running, InstanceState::Starting])).await;
        let probe = StartProbe::new(platform, true);
        assert_eq!(probe.check(&mut handle()).await.unwrap(), ProbeStatus::Running);
    }

    #[tokio::test]
    async fn test_crashed_depends_on_policy() {
        let states = vec![InstanceState::Running, InstanceState::Crashed];

        let strict = StartProbe::new(started(Some(states.clone())).await, true);
        match strict.check(&mut handle()).await.unwrap() {
            ProbeStatus::Error(message) => {
                assert!(message.contains("1 of 2 instances running (1 crashed)"))
            }
            other => panic!("unexpected {other:?}"),
        }

        let lenient = StartProbe::new(started(Some(states)).await, false);
        assert_eq!(lenient.check(&mut handle()).await.unwrap(), ProbeStatus::Running);
    }

    #[tokio::test]
    async fn test_flapping_is_always_an_error() {
        let platform =
            started(Some(vec![InstanceState::Running, InstanceState::Flapping])).await;
        let probe = StartProbe::new(platform, false);
        assert!(matches!(
            probe.check(&mut handle()).await.unwrap(),
            ProbeStatus::Error(_)
        ));
    }
}
