//! MTA Reconcile - Decision logic for deployment reconciliation
//!
//! Every function in this crate is pure: it takes the desired state and a
//! snapshot of what the platform reported, and returns what should be done.
//! Executing the decisions is the job of the deployment steps.
//!
//! ## Key Components
//!
//! - **ApplicationStateReconciler**: START/STOP/RESTAGE/EXECUTE/KEEP for one app
//! - **ApplicationDiff**: property updates and the change flags feeding the above
//! - **ServiceReconciler**: create/recreate/update actions for one service,
//!   including its service keys
//! - **Brokers**: service broker registration from application attributes
//! - **ConflictDetector**: ownership gate before touching existing resources
//! - **BlueGreenColorCoordinator**: live/idle colors and generation naming
//!
//! ## Example
//!
//! ```rust
//! use mta_reconcile::{ApplicationStateReconciler, ChangeFlags};
//! use mta_types::{ApplicationStartupState, ApplicationStateAction, RestartParameters};
//!
//! let actions = ApplicationStateReconciler::decide(
//!     "web",
//!     ApplicationStartupState::Stopped,
//!     ApplicationStartupState::Started,
//!     &ChangeFlags::default(),
//!     &RestartParameters::default(),
//! );
//! assert_eq!(actions.to_vec(), vec![ApplicationStateAction::Start]);
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod app_diff;
pub mod app_state;
pub mod broker;
pub mod color;
pub mod conflicts;
pub mod detect;
pub mod service;
pub mod service_keys;

// Re-exports
pub use app_diff::{inject_service_keys, ApplicationDiff};
pub use app_state::{
    create_calculator, ActionCalculator, ApplicationStateReconciler, ChangeFlags,
    ChangedApplicationActionCalculator, UnchangedApplicationActionCalculator,
};
pub use broker::{classify_broker_error, decide_broker, resolve_broker, BrokerDecision, BrokerFailure};
pub use color::{
    assign_legacy_idle_names, plan_legacy_finalize, plan_legacy_renames, AppRename,
    BlueGreenColorCoordinator, ColorDetection, ColorPlan, ColorSource, LegacyRenamePlan,
};
pub use conflicts::{ConflictDetector, ConflictReport};
pub use detect::{detect_deployed_packages, find_deployed_package};
pub use service::{ServiceDecision, ServiceReconciler};
pub use service_keys::{plan_service_keys, ServiceKeyPlan};
