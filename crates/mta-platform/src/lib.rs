//! MTA Platform - Platform contracts for deployment reconciliation
//!
//! The engine never talks to a concrete platform API. It depends on two
//! traits injected per run:
//!
//! - **PlatformReader**: read-only queries of applications, services,
//!   bindings, keys, last operations, logs and brokers
//! - **PlatformMutator**: the mutating calls the reconcilers' actions map to
//!
//! ## In-Memory Platform
//!
//! [`InMemoryPlatform`] implements both traits. It is used for tests and for
//! simulating a deployment against a snapshot of a real space.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod memory;
pub mod mutator;
pub mod reader;
pub mod snapshot;

// Re-exports
pub use error::{
    PlatformError, Result, STATUS_BAD_GATEWAY, STATUS_FORBIDDEN, STATUS_NOT_IMPLEMENTED,
};
pub use memory::InMemoryPlatform;
pub use mutator::PlatformMutator;
pub use reader::PlatformReader;
pub use snapshot::PlatformSnapshot;
