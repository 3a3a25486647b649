//! Polling engine
//!
//! The engine is re-entered once per scheduler tick with the persisted
//! [`OperationHandle`] of an operation. It never sleeps: each tick forwards
//! new log output, probes the first unfinished probe of the chain and
//! reports where the operation stands.

use crate::logs::LogSink;
use crate::probes::{Probe, ProbeStatus};
use chrono::{DateTime, Utc};
use mta_platform::PlatformReader;
use mta_types::{DeployError, ErrorKind, OperationHandle, OperationKind};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Where an operation stands after one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Poll again on the next tick
    Running,
    /// Every probe of the chain finished
    Finished,
    /// A probe failed or the run was aborted
    Error(DeployError),
    /// The deadline passed while the operation was still running
    Retry(String),
}

impl std::fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollOutcome::Running => write!(f, "running"),
            PollOutcome::Finished => write!(f, "finished"),
            PollOutcome::Error(err) => write!(f, "error: {err}"),
            PollOutcome::Retry(message) => write!(f, "retry: {message}"),
        }
    }
}

/// Outcome of one tick plus warnings raised by probes during it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub outcome: PollOutcome,
    pub warnings: Vec<String>,
}

impl TickReport {
    fn new(outcome: PollOutcome, warnings: Vec<String>) -> Self {
        Self { outcome, warnings }
    }
}

/// Drives probe chains of asynchronous operations.
pub struct PollingEngine {
    reader: Arc<dyn PlatformReader>,
    sink: Arc<dyn LogSink>,
}

impl PollingEngine {
    pub fn new(reader: Arc<dyn PlatformReader>, sink: Arc<dyn LogSink>) -> Self {
        Self { reader, sink }
    }

    /// Run one tick at the current time.
    pub async fn tick(
        &self,
        handle: &mut OperationHandle,
        probes: &[Box<dyn Probe>],
        aborted: bool,
    ) -> TickReport {
        self.tick_at(handle, probes, aborted, Utc::now()).await
    }

    /// Run one tick as if the clock read `now`.
    #[instrument(skip(self, handle, probes), fields(kind = %handle.kind, resource = %handle.target))]
    pub async fn tick_at(
        &self,
        handle: &mut OperationHandle,
        probes: &[Box<dyn Probe>],
        aborted: bool,
        now: DateTime<Utc>,
    ) -> TickReport {
        if aborted {
            return TickReport::new(
                PollOutcome::Error(DeployError::aborted().with_resource(&handle.target)),
                Vec::new(),
            );
        }

        if has_application_logs(handle.kind) {
            self.forward_logs(handle).await;
        }

        let mut warnings = Vec::new();
        while let Some(probe) = probes.get(handle.probe_index) {
            match probe.check(handle).await {
                Ok(ProbeStatus::Running) => {
                    debug!(probe = probe.name(), "Probe still running");
                    return TickReport::new(self.still_running(handle, now), warnings);
                }
                Ok(ProbeStatus::Finished) => {
                    debug!(probe = probe.name(), "Probe finished");
                    handle.probe_index += 1;
                }
                Ok(ProbeStatus::FinishedWithWarning(message)) => {
                    warnings.push(message);
                    handle.probe_index += 1;
                }
                Ok(ProbeStatus::Error(message)) => {
                    let error = DeployError::platform(message)
                        .with_resource(&handle.target)
                        .with_action(handle.kind);
                    return TickReport::new(PollOutcome::Error(error), warnings);
                }
                Err(err) if err.kind == ErrorKind::TransientPoll => {
                    handle.transient_failures += 1;
                    warn!(
                        probe = probe.name(),
                        failures = handle.transient_failures,
                        error = %err,
                        "Transient polling failure"
                    );
                    return TickReport::new(self.still_running(handle, now), warnings);
                }
                Err(err) => {
                    let err = if err.resource.is_none() {
                        err.with_resource(&handle.target)
                    } else {
                        err
                    };
                    return TickReport::new(PollOutcome::Error(err), warnings);
                }
            }
        }

        TickReport::new(PollOutcome::Finished, warnings)
    }

    fn still_running(&self, handle: &OperationHandle, now: DateTime<Utc>) -> PollOutcome {
        if handle.is_expired(now) {
            let message = format!(
                "{} of {} did not finish before {}",
                capitalize(&handle.kind.to_string()),
                handle.target,
                handle.deadline.to_rfc3339()
            );
            warn!(resource = %handle.target, "{}", message);
            PollOutcome::Retry(message)
        } else {
            PollOutcome::Running
        }
    }

    /// Append log lines newer than the stored offset to the sink.
    async fn forward_logs(&self, handle: &mut OperationHandle) {
        let resource = handle.target.clone();
        let offset = handle.log_offset(&resource);
        match self.reader.get_recent_logs(&resource, offset).await {
            Ok(logs) => {
                if !logs.lines.is_empty() {
                    self.sink.append(&resource, &logs.lines).await;
                }
                handle.log_offsets.insert(resource, logs.next_offset);
            }
            Err(err) => {
                warn!(app = %resource, error = %err, "Could not fetch recent logs");
            }
        }
    }
}

fn has_application_logs(kind: OperationKind) -> bool {
    matches!(
        kind,
        OperationKind::StageApplication
            | OperationKind::StartApplication
            | OperationKind::ExecuteApplication
    )
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::MemoryLogSink;
    use crate::probes::scripted::ScriptedProbe;
    use mta_platform::InMemoryPlatform;
    use mta_types::{DeployResult, LogLine, LogStream};
    use std::time::Duration;

    struct Shared(Arc<ScriptedProbe>);

    #[async_trait::async_trait]
    impl Probe for Shared {
        fn name(&self) -> &str {
            self.0.name()
        }

        async fn check(&self, handle: &mut OperationHandle) -> DeployResult<ProbeStatus> {
            self.0.check(handle).await
        }
    }

    fn chain(
        a: Vec<DeployResult<ProbeStatus>>,
        b: Vec<DeployResult<ProbeStatus>>,
    ) -> (Arc<ScriptedProbe>, Arc<ScriptedProbe>, Vec<Box<dyn Probe>>) {
        let a = Arc::new(ScriptedProbe::new("a", a));
        let b = Arc::new(ScriptedProbe::new("b", b));
        let probes: Vec<Box<dyn Probe>> =
            vec![Box::new(Shared(a.clone())), Box::new(Shared(b.clone()))];
        (a, b, probes)
    }

    fn engine() -> (Arc<InMemoryPlatform>, Arc<MemoryLogSink>, PollingEngine) {
        let platform = Arc::new(InMemoryPlatform::new());
        let sink = Arc::new(MemoryLogSink::new());
        let engine = PollingEngine::new(platform.clone(), sink.clone());
        (platform, sink, engine)
    }

    fn handle(kind: OperationKind, now: DateTime<Utc>) -> OperationHandle {
        OperationHandle::start(kind, "web", Duration::from_secs(60), now)
    }

    #[tokio::test]
    async fn test_second_probe_waits_for_first() {
        let (_, _, engine) = engine();
        let (a, b, probes) = chain(
            vec![Ok(ProbeStatus::Running), Ok(ProbeStatus::Finished)],
            vec![Ok(ProbeStatus::Finished)],
        );
        let now = Utc::now();
        let mut handle = handle(OperationKind::StartApplication, now);

        let report = engine.tick_at(&mut handle, &probes, false, now).await;
        assert_eq!(report.outcome, PollOutcome::Running);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);

        let report = engine.tick_at(&mut handle, &probes, false, now).await;
        assert_eq!(report.outcome, PollOutcome::Finished);
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_error_stops_chain() {
        let (_, _, engine) = engine();
        let (_, b, probes) = chain(
            vec![Ok(ProbeStatus::Error("staging failed".into()))],
            vec![Ok(ProbeStatus::Finished)],
        );
        let now = Utc::now();
        let mut handle = handle(OperationKind::StageApplication, now);

        let report = engine.tick_at(&mut handle, &probes, false, now).await;
        match report.outcome {
            PollOutcome::Error(err) => {
                assert_eq!(err.kind, ErrorKind::Platform);
                assert_eq!(err.resource.as_deref(), Some("web"));
                assert!(err.message.contains("staging failed"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_deadline_turns_running_into_retry() {
        let (_, _, engine) = engine();
        let (_, _, probes) = chain(vec![Ok(ProbeStatus::Running)], vec![]);
        let now = Utc::now();
        let mut handle = handle(OperationKind::StartApplication, now);

        let later = now + chrono::Duration::seconds(61);
        let report = engine.tick_at(&mut handle, &probes, false, later).await;
        assert!(matches!(report.outcome, PollOutcome::Retry(_)));
    }

    #[tokio::test]
    async fn test_finished_past_deadline_is_still_finished() {
        let (_, _, engine) = engine();
        let (_, _, probes) = chain(
            vec![Ok(ProbeStatus::Finished)],
            vec![Ok(ProbeStatus::Finished)],
        );
        let now = Utc::now();
        let mut handle = handle(OperationKind::StartApplication, now);

        let later = now + chrono::Duration::hours(2);
        let report = engine.tick_at(&mut handle, &probes, false, later).await;
        assert_eq!(report.outcome, PollOutcome::Finished);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_polling() {
        let (_, _, engine) = engine();
        let (_, _, probes) = chain(
            vec![
                Err(DeployError::transient("connection reset")),
                Ok(ProbeStatus::Finished),
            ],
            vec![Ok(ProbeStatus::Finished)],
        );
        let now = Utc::now();
        let mut handle = handle(OperationKind::ServiceOperation, now);

        let report = engine.tick_at(&mut handle, &probes, false, now).await;
        assert_eq!(report.outcome, PollOutcome::Running);
        assert_eq!(handle.transient_failures, 1);

        let report = engine.tick_at(&mut handle, &probes, false, now).await;
        assert_eq!(report.outcome, PollOutcome::Finished);
    }

    #[tokio::test]
    async fn test_abort_is_checked_first() {
        let (_, _, engine) = engine();
        let (a, _, probes) = chain(vec![Ok(ProbeStatus::Finished)], vec![]);
        let now = Utc::now();
        let mut handle = handle(OperationKind::StartApplication, now);

        let report = engine.tick_at(&mut handle, &probes, true, now).await;
        assert!(matches!(
            report.outcome,
            PollOutcome::Error(DeployError { kind: ErrorKind::Aborted, .. })
        ));
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_logs_forwarded_once_per_line() {
        let (platform, sink, engine) = engine();
        let (_, _, probes) = chain(vec![Ok(ProbeStatus::Running)], vec![]);
        let now = Utc::now();
        let mut handle = handle(OperationKind::StartApplication, now);
        let log = |message: &str| LogLine {
            timestamp: Utc::now(),
            stream: LogStream::Stdout,
            source: "APP/PROC/WEB/0".into(),
            message: message.into(),
        };

        platform.push_log("web", log("booting"));
        engine.tick_at(&mut handle, &probes, false, now).await;
        engine.tick_at(&mut handle, &probes, false, now).await;
        platform.push_log("web", log("listening"));
        engine.tick_at(&mut handle, &probes, false, now).await;

        let messages: Vec<_> = sink.lines("web").into_iter().map(|l| l.message).collect();
        assert_eq!(messages, vec!["booting", "listening"]);
        assert_eq!(handle.log_offset("web"), 2);
    }

    #[tokio::test]
    async fn test_warnings_are_reported() {
        let (_, _, engine) = engine();
        let (_, _, probes) = chain(
            vec![Ok(ProbeStatus::FinishedWithWarning("optional failed".into()))],
            vec![Ok(ProbeStatus::Finished)],
        );
        let now = Utc::now();
        let mut handle = handle(OperationKind::ServiceOperation, now);

        let report = engine.tick_at(&mut handle, &probes, false, now).await;
        assert_eq!(report.outcome, PollOutcome::Finished);
        assert_eq!(report.warnings, vec!["optional failed".to_string()]);
    }
}
