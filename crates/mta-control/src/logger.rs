//! Operator-facing step logging

use crate::store::{ProgressLevel, ProgressMessage, ProgressStore};
use chrono::Utc;
use mta_types::RunId;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Writes progress messages of one step attempt to `tracing` and to the
/// progress store. A failing store never fails the step.
#[derive(Clone)]
pub struct StepLogger {
    progress: Arc<dyn ProgressStore>,
    run_id: RunId,
    step_name: String,
    step_index: u32,
}

impl StepLogger {
    pub fn new(
        progress: Arc<dyn ProgressStore>,
        run_id: RunId,
        step_name: impl Into<String>,
        step_index: u32,
    ) -> Self {
        Self {
            progress,
            run_id,
            step_name: step_name.into(),
            step_index,
        }
    }

    pub async fn info(&self, text: impl Into<String>) {
        let text = text.into();
        info!(run_id = %self.run_id, step = %self.step_name, "{}", text);
        self.record(ProgressLevel::Info, text).await;
    }

    pub async fn warn(&self, text: impl Into<String>) {
        let text = text.into();
        warn!(run_id = %self.run_id, step = %self.step_name, "{}", text);
        self.record(ProgressLevel::Warning, text).await;
    }

    pub async fn error(&self, text: impl Into<String>) {
        let text = text.into();
        error!(run_id = %self.run_id, step = %self.step_name, "{}", text);
        self.record(ProgressLevel::Error, text).await;
    }

    async fn record(&self, level: ProgressLevel, text: String) {
        let message = ProgressMessage {
            run_id: self.run_id,
            step_name: self.step_name.clone(),
            step_index: self.step_index,
            level,
            text,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.progress.append(message).await {
            error!(run_id = %self.run_id, error = %e, "Failed to record progress message");
        }
    }
}
