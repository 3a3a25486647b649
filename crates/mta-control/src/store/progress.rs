use crate::error::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mta_types::RunId;
use serde::{Deserialize, Serialize};

/// Severity of a progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for ProgressLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressLevel::Info => write!(f, "info"),
            ProgressLevel::Warning => write!(f, "warning"),
            ProgressLevel::Error => write!(f, "error"),
        }
    }
}

/// An operator-facing message recorded by a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub run_id: RunId,
    pub step_name: String,
    pub step_index: u32,
    pub level: ProgressLevel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Storage for progress messages, keyed by run, step name and step index.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn append(&self, message: ProgressMessage) -> StoreResult<()>;

    /// Messages of a run in the order they were recorded
    async fn list(&self, run_id: &RunId) -> StoreResult<Vec<ProgressMessage>>;

    /// Delete the messages of one step attempt, returning how many were removed
    async fn delete_step(&self, run_id: &RunId, step_name: &str, step_index: u32)
        -> StoreResult<usize>;
}

/// In-memory progress store for development and testing
pub struct InMemoryProgressStore {
    messages: DashMap<RunId, Vec<ProgressMessage>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
        }
    }
}

impl Default for InMemoryProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn append(&self, message: ProgressMessage) -> StoreResult<()> {
        self.messages
            .entry(message.run_id)
            .or_default()
            .push(message);
        Ok(())
    }

    async fn list(&self, run_id: &RunId) -> StoreResult<Vec<ProgressMessage>> {
        Ok(self
            .messages
            .get(run_id)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    async fn delete_step(
        &self,
        run_id: &RunId,
        step_name: &str,
        step_index: u32,
    ) -> StoreResult<usize> {
        let mut messages = match self.messages.get_mut(run_id) {
            Some(messages) => messages,
            None => return Ok(0),
        };
        let before = messages.len();
        messages.retain(|m| !(m.step_name == step_name && m.step_index == step_index));
        Ok(before - messages.len())
    }
}
