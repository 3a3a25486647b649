//! MTA Polling - Tracking of asynchronous platform operations
//!
//! Staging, starting, executing applications and provisioning services all
//! complete asynchronously. This crate observes them without ever blocking.
//!
//! ## Key Components
//!
//! - **PollingEngine**: re-entered once per tick with a persisted
//!   [`OperationHandle`](mta_types::OperationHandle); probes the first
//!   unfinished probe of a chain and enforces the operation deadline
//! - **Probes**: stage, start, execute and service operation probes
//! - **LogSink**: receives application output exactly once per line
//! - **In-progress scan**: concurrent read of service last operations
//!
//! ## Example
//!
//! ```rust,ignore
//! use mta_polling::{PollingEngine, MemoryLogSink, StartProbe, Probe};
//!
//! let engine = PollingEngine::new(reader.clone(), Arc::new(MemoryLogSink::new()));
//! let probes: Vec<Box<dyn Probe>> = vec![Box::new(StartProbe::new(reader, true))];
//! let report = engine.tick(&mut handle, &probes, false).await;
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod engine;
pub mod in_progress;
pub mod logs;
pub mod probes;

// Re-exports
pub use engine::{PollOutcome, PollingEngine, TickReport};
pub use in_progress::{find_operations_in_progress, scan_operations, InProgressReport};
pub use logs::{LogSink, MemoryLogSink, TracingLogSink};
pub use probes::{
    ExecuteProbe, LogMarker, Probe, ProbeStatus, ServiceOperationProbe, StageProbe, StartProbe,
};
