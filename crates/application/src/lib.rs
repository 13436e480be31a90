//! Application services and ports.

#![forbid(unsafe_code)]

mod lease_coordinator;
mod lease_ports;
mod retry_policy;

pub use lease_coordinator::{ExclusiveRunOutcome, LeaseCoordinator};
pub use lease_ports::{Clock, LeaseStore};
pub use retry_policy::{RetryOutcome, RetryPolicy};
