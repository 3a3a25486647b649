//! Log sinks for application output collected while polling

use async_trait::async_trait;
use dashmap::DashMap;
use mta_types::LogLine;
use tracing::info;

/// Destination of application log lines, keyed by resource name.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, resource: &str, lines: &[LogLine]);
}

/// Keeps collected lines in memory.
pub struct MemoryLogSink {
    lines: DashMap<String, Vec<LogLine>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self {
            lines: DashMap::new(),
        }
    }

    pub fn lines(&self, resource: &str) -> Vec<LogLine> {
        self.lines
            .get(resource)
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lines.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for MemoryLogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn append(&self, resource: &str, lines: &[LogLine]) {
        self.lines
            .entry(resource.to_string())
            .or_default()
            .extend_from_slice(lines);
    }
}

/// Forwards lines to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn append(&self, resource: &str, lines: &[LogLine]) {
        for line in lines {
            info!(target: "mta::app_logs", app = %resource, "{}", line);
        }
    }
}
