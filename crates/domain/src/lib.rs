//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod decision;
mod lease;
mod result;

pub use decision::{LeaseCandidate, LeaseIntent, WriteDecision, evaluate_conditional_write};
pub use lease::{
    Lease, LeaseFilter, LeaseId, LeaseInfo, LeaseTicket, LeaseToken, released_sentinel,
};
pub use result::{LeaseAcquireOutcome, LeaseAcquireResult, LeaseReleaseResult};
