//! MTA Types - Core types for deployment reconciliation
//!
//! A multi-target application ("MTA", or package) is deployed by converging
//! the platform's applications, service instances, service keys and service
//! brokers toward a desired state. This crate holds the shared vocabulary of
//! that process.
//!
//! ## Key Concepts
//!
//! - **Desired / Existing**: what a resource should look like versus what the
//!   platform reported for it during the current pass
//! - **ActionSet**: ordered set of actions decided for one resource
//! - **DeployedPackage**: ownership record read back from platform metadata
//! - **OperationHandle**: an asynchronous platform operation being polled
//! - **StepExecutionRecord**: persisted identity and phase of a step
//! - **DeployError**: the single tagged error type of the engine

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod actions;
pub mod application;
pub mod broker;
pub mod desired;
pub mod error;
pub mod ids;
pub mod operation;
pub mod package;
pub mod policy;
pub mod service;
pub mod step;

// Re-export main types
pub use actions::{ActionSet, ApplicationStateAction, ServiceAction, ServiceBrokerAction};
pub use application::{
    AppState, ApplicationStartupState, BuildState, DesiredApplication, ExecuteSettings,
    ExistingApplication, InstanceCounts, InstanceState, OwnershipMetadata, RestartParameters,
    ServiceKeyToInject, Staging, DEFAULT_FAILURE_MARKER, DEFAULT_SUCCESS_MARKER,
};
pub use broker::{DesiredServiceBroker, ExistingServiceBroker, ServiceBrokerSpec};
pub use desired::DesiredState;
pub use error::{
    DeployError, DeployResult, ErrorKind, STATUS_BAD_GATEWAY, STATUS_FORBIDDEN,
    STATUS_NOT_IMPLEMENTED,
};
pub use ids::{PackageId, RunId};
pub use operation::{LogLine, LogStream, OperationHandle, OperationKind, RecentLogs};
pub use package::{ApplicationColor, DeployedApplication, DeployedPackage, LegacySuffix};
pub use policy::{DeploymentPolicy, PollingConfig};
pub use service::{
    DesiredService, DesiredServiceKey, ExistingService, ExistingServiceKey, ServiceBinding,
    ServiceOperation, ServiceOperationState, ServiceOperationType,
};
pub use step::{StepExecutionRecord, StepOutcome, StepPhase};
