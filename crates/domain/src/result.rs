use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lease::{Lease, LeaseInfo, LeaseTicket};

/// Outcome of one acquire, renew or conditional-write round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseAcquireResult {
    /// Ticket for the hold, present only when the write took effect.
    pub ticket: Option<LeaseTicket>,
    /// Expiry of the lease after the round, if any row exists.
    pub expires: Option<DateTime<Utc>>,
    /// When the current (possibly foreign) hold was confirmed.
    pub last_acquired_at: Option<DateTime<Utc>>,
    /// When a holder last gave the lease up.
    pub last_released_at: Option<DateTime<Utc>>,
}

/// Discriminated view over [`LeaseAcquireResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAcquireOutcome {
    /// The caller holds the lease.
    Acquired(LeaseTicket),
    /// Someone else holds the lease, or the filter declined.
    Contended,
}

impl LeaseAcquireResult {
    /// Builds a successful result from the row that was written.
    #[must_use]
    pub fn acquired(lease: &Lease) -> Self {
        Self {
            ticket: Some(lease.ticket()),
            expires: Some(lease.expires),
            last_acquired_at: lease.acquired,
            last_released_at: lease.released,
        }
    }

    /// Builds a negative result carrying the current holder's metadata.
    #[must_use]
    pub fn contended(current: Option<&LeaseInfo>) -> Self {
        Self {
            ticket: None,
            expires: current.map(|info| info.expires),
            last_acquired_at: current.and_then(|info| info.acquired),
            last_released_at: current.and_then(|info| info.released),
        }
    }

    /// Returns whether the round succeeded.
    #[must_use]
    pub fn is_lease_acquired(&self) -> bool {
        self.ticket.is_some()
    }

    /// Returns the discriminated outcome.
    #[must_use]
    pub fn outcome(&self) -> LeaseAcquireOutcome {
        match &self.ticket {
            Some(ticket) => LeaseAcquireOutcome::Acquired(ticket.clone()),
            None => LeaseAcquireOutcome::Contended,
        }
    }
}

/// Outcome of one release round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseReleaseResult {
    /// Whether the caller's hold was given up by this call.
    pub is_released: bool,
    /// Expiry of the lease after the round, if any row exists.
    pub expires: Option<DateTime<Utc>>,
    /// When the current hold was confirmed.
    pub last_acquired_at: Option<DateTime<Utc>>,
    /// When a holder last gave the lease up.
    pub last_released_at: Option<DateTime<Utc>>,
}

impl From<LeaseAcquireResult> for LeaseReleaseResult {
    fn from(value: LeaseAcquireResult) -> Self {
        Self {
            is_released: value.is_lease_acquired(),
            expires: value.expires,
            last_acquired_at: value.last_acquired_at,
            last_released_at: value.last_released_at,
        }
    }
}
