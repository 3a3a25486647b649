//! Full deployment run against an in-memory platform

use crate::error::CliResult;
use crate::output::{print_output, print_single, print_success, print_warning, OutputFormat};
use mta_control::{
    DeploymentRunner, InMemoryProgressStore, InMemoryVariableStore, ProgressMessage, RunState,
    RunStatus, SchedulerConfig, StepServices,
};
use mta_platform::InMemoryPlatform;
use mta_polling::TracingLogSink;
use mta_types::{DeploymentPolicy, DesiredState, PollingConfig};
use serde::Serialize;
use std::sync::Arc;
use tabled::Tabled;
use tracing::info;

/// A progress message as shown to the operator.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct ProgressRow {
    #[tabled(rename = "STEP")]
    pub step: String,
    #[tabled(rename = "#")]
    pub index: u32,
    #[tabled(rename = "LEVEL")]
    pub level: String,
    #[tabled(rename = "MESSAGE")]
    pub message: String,
}

impl From<ProgressMessage> for ProgressRow {
    fn from(message: ProgressMessage) -> Self {
        Self {
            step: message.step_name,
            index: message.step_index,
            level: format!("{:?}", message.level).to_lowercase(),
            message: message.text,
        }
    }
}

/// Result of a simulated run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub state: RunState,
    pub mutations: Vec<String>,
    pub progress: Vec<ProgressRow>,
}

/// Run the standard pipeline to the end on `platform`.
pub async fn simulate(
    desired: &DesiredState,
    platform: Arc<InMemoryPlatform>,
    policy: DeploymentPolicy,
    polling: PollingConfig,
    scheduler: &SchedulerConfig,
) -> CliResult<SimulationReport> {
    let services = StepServices::new(
        platform.clone(),
        platform.clone(),
        Arc::new(TracingLogSink),
        policy,
        polling,
    );
    let runner = DeploymentRunner::new(
        services,
        Arc::new(InMemoryVariableStore::new()),
        Arc::new(InMemoryProgressStore::new()),
    );

    let run_id = runner.start(desired).await?;
    let state = runner.run_to_completion(run_id, scheduler).await?;
    info!(run_id = %run_id, status = %state.status, ticks = state.ticks, "Simulation finished");

    let progress = runner
        .progress(run_id)
        .await?
        .into_iter()
        .map(ProgressRow::from)
        .collect();
    Ok(SimulationReport {
        state,
        mutations: platform.mutations().await,
        progress,
    })
}

/// Print a simulation report. Returns whether the run completed.
pub fn print_report(report: &SimulationReport, format: OutputFormat) -> CliResult<bool> {
    let completed = report.state.status == RunStatus::Completed;
    match format {
        OutputFormat::Json => print_single(report)?,
        OutputFormat::Table => {
            print_output(&report.progress, format)?;
            println!();
            for mutation in &report.mutations {
                println!("  {mutation}");
            }
            println!();
            let summary = format!(
                "Run {} after {} ticks, {} platform mutations",
                report.state.status,
                report.state.ticks,
                report.mutations.len()
            );
            if completed {
                print_success(&summary);
            } else {
                print_warning(&summary);
            }
        }
    }
    Ok(completed)
}
