//! MTA Control - Step lifecycle and deployment runner
//!
//! A deployment is a sequence of steps executed one attempt per tick. Steps
//! never block on the platform: asynchronous operations are persisted as
//! operation handles and checked again on the next tick.
//!
//! ## Key Components
//!
//! - **DeploymentRunner**: owns the step list, advances the run cursor and
//!   maps step outcomes to the run status
//! - **StepLifecycleCoordinator**: execution records, abort checks and
//!   cleanup of failed attempts around every step
//! - **Steps**: detection, blue-green preparation, conflict checks, service,
//!   application and broker convergence, removal of the old generation
//! - **Stores**: run variables and progress messages
//!
//! ## Example
//!
//! ```rust,ignore
//! use mta_control::{DeploymentRunner, SchedulerConfig, StepServices};
//!
//! let services = StepServices::new(reader, mutator, sink, policy, polling);
//! let runner = DeploymentRunner::new(services, variables, progress);
//! let run_id = runner.start(&desired).await?;
//! let state = runner.run_to_completion(run_id, &SchedulerConfig::default()).await?;
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod lifecycle;
pub mod logger;
pub mod runner;
pub mod step;
pub mod steps;
pub mod store;

// Re-exports
pub use error::{ControlError, Result, StoreError, StoreResult};
pub use lifecycle::StepLifecycleCoordinator;
pub use logger::StepLogger;
pub use runner::{DeploymentRunner, RunState, RunStatus, SchedulerConfig};
pub use step::{Step, StepContext, StepServices};
pub use steps::standard_steps;
pub use store::{
    InMemoryProgressStore, InMemoryVariableStore, ProgressLevel, ProgressMessage, ProgressStore,
    RunVariables, VariableStore,
};
