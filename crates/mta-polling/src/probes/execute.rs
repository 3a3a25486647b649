use super::{Probe, ProbeStatus};
use async_trait::async_trait;
use mta_platform::PlatformReader;
use mta_types::{DeployError, DeployResult, ExecuteSettings, LogLine, LogStream, OperationHandle};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

/// A `STREAM:pattern` marker searched for in application output.
#[derive(Debug, Clone)]
pub struct LogMarker {
    stream: LogStream,
    pattern: Regex,
}

impl LogMarker {
    pub fn parse(marker: &str) -> DeployResult<Self> {
        let (stream, pattern) = marker.split_once(':').ok_or_else(|| {
            DeployError::content(format!(
                "Invalid log marker \"{marker}\": expected STREAM:pattern"
            ))
        })?;
        let stream = stream
            .parse::<LogStream>()
            .map_err(|e| DeployError::content(format!("Invalid log marker \"{marker}\": {e}")))?;
        let pattern = Regex::new(pattern)
            .map_err(|e| DeployError::content(format!("Invalid log marker \"{marker}\": {e}")))?;
        Ok(Self { stream, pattern })
    }

    pub fn matches(&self, line: &LogLine) -> bool {
        line.stream == self.stream && self.pattern.is_match(&line.message)
    }
}

/// Scans application output for the success and failure markers of an
/// application that runs to completion.
///
/// Only lines emitted by the application itself since the operation started
/// are considered, and each line is searched once: the handle remembers how
/// far the output was scanned.
pub struct ExecuteProbe {
    reader: Arc<dyn PlatformReader>,
    success: LogMarker,
    failure: LogMarker,
}

impl ExecuteProbe {
    pub fn new(reader: Arc<dyn PlatformReader>, settings: &ExecuteSettings) -> DeployResult<Self> {
        Ok(Self {
            reader,
            success: LogMarker::parse(&settings.success_marker)?,
            failure: LogMarker::parse(&settings.failure_marker)?,
        })
    }
}

#[async_trait]
impl Probe for ExecuteProbe {
    fn name(&self) -> &str {
        "execute"
    }

    async fn check(&self, handle: &mut OperationHandle) -> DeployResult<ProbeStatus> {
        let logs = self
            .reader
            .get_recent_logs(&handle.target, handle.marker_offset)
            .await?;

        for line in logs
            .lines
            .iter()
            .filter(|l| l.is_from_application() && l.timestamp >= handle.started_at)
        {
            if self.failure.matches(line) {
                return Ok(ProbeStatus::Error(format!(
                    "Execution of application {} failed: {}",
                    handle.target, line.message
                )));
            }
            if self.success.matches(line) {
                info!(app = %handle.target, "Execution finished: {}", line.message);
                return Ok(ProbeStatus::Finished);
            }
        }

        handle.marker_offset = logs.next_offset;
        debug!(app = %handle.target, offset = handle.marker_offset, "No execution marker yet");
        Ok(ProbeStatus::Running)
    }
}
