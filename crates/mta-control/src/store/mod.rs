//! Run-scoped storage
//!
//! The workflow engine of a deployment is reduced to two stores: opaque
//! variables keyed by run id, and operator-facing progress messages.

mod progress;
mod variables;

pub use progress::{InMemoryProgressStore, ProgressLevel, ProgressMessage, ProgressStore};
pub use variables::{InMemoryVariableStore, RunVariables, VariableStore};

/// Variable names shared by the steps of a run.
pub mod keys {
    pub const RUN_STATE: &str = "run_state";
    pub const ABORTED: &str = "aborted";
    pub const DESIRED_STATE: &str = "desired_state";
    pub const DEPLOYED_PACKAGE: &str = "deployed_package";
    pub const COLOR_PLAN: &str = "color_plan";
    pub const SERVICES_IN_PROGRESS: &str = "services_in_progress";
    pub const SERVICE_CURSOR: &str = "service_cursor";
    pub const APPLICATION_CURSOR: &str = "application_cursor";

    /// Execution record of a step
    pub fn step_record(step_name: &str) -> String {
        format!("step:{step_name}")
    }
}
