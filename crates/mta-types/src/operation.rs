//! Handles for asynchronous platform operations and their log output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Kind of asynchronous operation being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    StageApplication,
    StartApplication,
    ExecuteApplication,
    ServiceOperation,
    ServiceBroker,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::StageApplication => write!(f, "stage application"),
            OperationKind::StartApplication => write!(f, "start application"),
            OperationKind::ExecuteApplication => write!(f, "execute application"),
            OperationKind::ServiceOperation => write!(f, "service operation"),
            OperationKind::ServiceBroker => write!(f, "service broker"),
        }
    }
}

/// One asynchronous operation in flight.
///
/// The handle is persisted between scheduler ticks. Everything the polling
/// engine needs to resume after a restart lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub kind: OperationKind,

    /// Name of the resource the operation acts on
    pub target: String,

    pub started_at: DateTime<Utc>,

    /// Fixed once at start
    pub deadline: DateTime<Utc>,

    /// Index of the first probe in the chain that has not finished
    #[serde(default)]
    pub probe_index: usize,

    /// Log offset per resource name
    #[serde(default)]
    pub log_offsets: BTreeMap<String, u64>,

    /// Log offset up to which execution markers were searched
    #[serde(default)]
    pub marker_offset: u64,

    /// Transient failures seen so far
    #[serde(default)]
    pub transient_failures: u32,
}

impl OperationHandle {
    pub fn start(
        kind: OperationKind,
        target: impl Into<String>,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let timeout = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        Self {
            kind,
            target: target.into(),
            started_at: now,
            deadline: now.checked_add_signed(timeout).unwrap_or(DateTime::<Utc>::MAX_UTC),
            probe_index: 0,
            log_offsets: BTreeMap::new(),
            marker_offset: 0,
            transient_failures: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    pub fn log_offset(&self, resource: &str) -> u64 {
        self.log_offsets.get(resource).copied().unwrap_or(0)
    }
}

/// Output stream of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "STDOUT"),
            LogStream::Stderr => write!(f, "STDERR"),
        }
    }
}

impl std::str::FromStr for LogStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STDOUT" | "OUT" => Ok(LogStream::Stdout),
            "STDERR" | "ERR" => Ok(LogStream::Stderr),
            other => Err(format!("unknown log stream: {other}")),
        }
    }
}

/// A single application log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,

    pub stream: LogStream,

    /// Emitting component, e.g. `APP/PROC/WEB/0` or `STG/0`
    pub source: String,

    pub message: String,
}

impl LogLine {
    /// Emitted by the application itself rather than the platform.
    pub fn is_from_application(&self) -> bool {
        self.source.starts_with("APP")
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {} {}",
            self.timestamp.to_rfc3339(),
            self.source,
            self.stream,
            self.message
        )
    }
}

/// Log lines newer than a given offset, plus the offset to resume from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentLogs {
    pub lines: Vec<LogLine>,
    pub next_offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_is_fixed_at_start() {
        let now = Utc::now();
        let handle = OperationHandle::start(
            OperationKind::StartApplication,
            "web",
            Duration::from_secs(60),
            now,
        );
        assert_eq!(handle.deadline, now + chrono::Duration::seconds(60));
        assert!(!handle.is_expired(now + chrono::Duration::seconds(60)));
        assert!(handle.is_expired(now + chrono::Duration::seconds(61)));
        assert_eq!(handle.log_offset("web"), 0);
    }
}
