//! Conditional-write rules shared by every lease store.
//!
//! Stores read the current row inside their transaction, call
//! [`evaluate_conditional_write`] and persist the returned row only on
//! [`WriteDecision::Apply`].

use chrono::{DateTime, Utc};

use crate::lease::{Lease, LeaseFilter, LeaseId, LeaseInfo, LeaseTicket, LeaseToken, released_sentinel};
use crate::result::LeaseAcquireResult;

/// What a candidate row is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseIntent {
    /// Take over a vacant, lapsed or released lease with a fresh token.
    Acquire,
    /// Push out the expiry of a hold the caller already owns.
    Renew,
    /// Give up a hold before it lapses.
    Release,
}

impl LeaseIntent {
    /// Returns a stable label for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Renew => "renew",
            Self::Release => "release",
        }
    }
}

/// Proposed lease row together with its intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseCandidate {
    /// Intent the store evaluates the row under.
    pub intent: LeaseIntent,
    /// Proposed row.
    pub lease: Lease,
}

impl LeaseCandidate {
    /// Candidate for a fresh acquisition.
    ///
    /// `released` carries the assumption that any prior holder is gone as of
    /// `now`; the store reconciles it against the row it actually reads.
    #[must_use]
    pub fn acquire(lease_id: LeaseId, now: DateTime<Utc>, expires: DateTime<Utc>) -> Self {
        Self {
            intent: LeaseIntent::Acquire,
            lease: Lease {
                id: lease_id,
                token: LeaseToken::generate(),
                expires,
                acquired: None,
                released: Some(now),
            },
        }
    }

    /// Candidate extending the hold identified by `ticket` to `expires`.
    #[must_use]
    pub fn renew(ticket: &LeaseTicket, expires: DateTime<Utc>) -> Self {
        Self {
            intent: LeaseIntent::Renew,
            lease: Lease {
                id: ticket.lease_id.clone(),
                token: ticket.token,
                expires,
                acquired: None,
                released: None,
            },
        }
    }

    /// Candidate giving up the hold identified by `ticket`.
    #[must_use]
    pub fn release(ticket: &LeaseTicket, now: DateTime<Utc>) -> Self {
        Self {
            intent: LeaseIntent::Release,
            lease: Lease {
                id: ticket.lease_id.clone(),
                token: ticket.token,
                expires: released_sentinel(),
                acquired: None,
                released: Some(now),
            },
        }
    }

    /// Returns the lease this candidate targets.
    #[must_use]
    pub fn lease_id(&self) -> &LeaseId {
        &self.lease.id
    }
}

/// Verdict of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDecision {
    /// Persist this row.
    Apply(Lease),
    /// Leave the current row untouched.
    Reject,
}

impl WriteDecision {
    /// Converts the verdict into the result reported to callers.
    #[must_use]
    pub fn into_result(self, current: Option<&Lease>) -> LeaseAcquireResult {
        match self {
            Self::Apply(lease) => LeaseAcquireResult::acquired(&lease),
            Self::Reject => LeaseAcquireResult::contended(current.map(Lease::info).as_ref()),
        }
    }
}

/// Decides whether `candidate` may replace `current` at `now`.
///
/// `filter` only applies to acquisitions and sees the current row, or a
/// vacant [`LeaseInfo`] when no row exists.
#[must_use]
pub fn evaluate_conditional_write(
    current: Option<&Lease>,
    candidate: &LeaseCandidate,
    now: DateTime<Utc>,
    filter: Option<&LeaseFilter>,
) -> WriteDecision {
    match candidate.intent {
        LeaseIntent::Acquire => {
            if current.is_some_and(|lease| lease.is_live_at(now)) {
                return WriteDecision::Reject;
            }

            if let Some(filter) = filter {
                let info = current
                    .map(Lease::info)
                    .unwrap_or_else(|| LeaseInfo::vacant(candidate.lease.id.clone()));
                if !filter.accepts(&info) {
                    return WriteDecision::Reject;
                }
            }

            let released = match current {
                None => None,
                Some(lease) if lease.is_released() => lease.released.or(candidate.lease.released),
                Some(lease) => Some(lease.expires),
            };

            WriteDecision::Apply(Lease {
                id: candidate.lease.id.clone(),
                token: candidate.lease.token,
                expires: candidate.lease.expires,
                acquired: Some(now),
                released,
            })
        }
        LeaseIntent::Renew => match current {
            Some(lease) if lease.token == candidate.lease.token && !lease.is_released() => {
                WriteDecision::Apply(Lease {
                    id: lease.id.clone(),
                    token: lease.token,
                    expires: candidate.lease.expires,
                    acquired: lease.acquired,
                    released: lease.released,
                })
            }
            _ => WriteDecision::Reject,
        },
        LeaseIntent::Release => match current {
            Some(lease) if lease.token == candidate.lease.token && !lease.is_released() => {
                WriteDecision::Apply(Lease {
                    id: lease.id.clone(),
                    token: lease.token,
                    expires: released_sentinel(),
                    acquired: lease.acquired,
                    released: candidate.lease.released.or(Some(now)),
                })
            }
            _ => WriteDecision::Reject,
        },
    }
}
