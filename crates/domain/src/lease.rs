use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use leasewarden_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds between the Unix epoch and `0001-01-01T00:00:00Z`.
const RELEASED_SENTINEL_SECONDS: i64 = -62_135_596_800;

/// Returns the expiry written on explicit release.
///
/// It sits before any clock reading, so a released lease is available
/// regardless of wall clock. Year 1 keeps the value inside the range of
/// common SQL timestamp types.
#[must_use]
pub fn released_sentinel() -> DateTime<Utc> {
    DateTime::from_timestamp(RELEASED_SENTINEL_SECONDS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Name of a coordinated resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(NonEmptyString);

impl LeaseId {
    /// Creates a validated lease identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value).map(Self).map_err(|_| {
            AppError::Validation("lease id must not be empty or whitespace".to_owned())
        })
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for LeaseId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Opaque value identifying one holder generation of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    /// Generates a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for LeaseToken {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Persisted lease row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Coordinated resource name.
    pub id: LeaseId,
    /// Current holder generation.
    pub token: LeaseToken,
    /// The lease is held only while `now < expires`.
    pub expires: DateTime<Utc>,
    /// When the current hold was confirmed.
    pub acquired: Option<DateTime<Utc>>,
    /// When a holder last gave the lease up, explicitly or by lapsing.
    pub released: Option<DateTime<Utc>>,
}

impl Lease {
    /// Returns whether a holder is live at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires
    }

    /// Returns whether the last holder gave the lease up explicitly.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.expires <= released_sentinel()
    }

    /// Returns the token-free projection of this row.
    #[must_use]
    pub fn info(&self) -> LeaseInfo {
        LeaseInfo {
            lease_id: self.id.clone(),
            expires: self.expires,
            acquired: self.acquired,
            released: self.released,
        }
    }

    /// Returns the ticket proving ownership of this row.
    #[must_use]
    pub fn ticket(&self) -> LeaseTicket {
        LeaseTicket {
            lease_id: self.id.clone(),
            token: self.token,
        }
    }
}

/// Client-held proof of ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseTicket {
    /// Leased resource.
    pub lease_id: LeaseId,
    /// Holder generation the ticket was issued for.
    pub token: LeaseToken,
}

/// Read-only projection of a lease without its token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    /// Leased resource.
    pub lease_id: LeaseId,
    /// Current expiry.
    pub expires: DateTime<Utc>,
    /// When the current hold was confirmed.
    pub acquired: Option<DateTime<Utc>>,
    /// When a holder last gave the lease up.
    pub released: Option<DateTime<Utc>>,
}

impl LeaseInfo {
    /// State reported for a lease that has never been written.
    #[must_use]
    pub fn vacant(lease_id: LeaseId) -> Self {
        Self {
            lease_id,
            expires: released_sentinel(),
            acquired: None,
            released: None,
        }
    }
}

/// Caller-supplied condition evaluated against the pre-write lease state.
///
/// The predicate only ever sees an immutable [`LeaseInfo`] snapshot.
#[derive(Clone)]
pub struct LeaseFilter(Arc<dyn Fn(&LeaseInfo) -> bool + Send + Sync>);

impl LeaseFilter {
    /// Wraps a predicate.
    pub fn new(predicate: impl Fn(&LeaseInfo) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Accepts only when no holder released the lease after `since`.
    #[must_use]
    pub fn not_released_since(since: DateTime<Utc>) -> Self {
        Self::new(move |info| info.released.is_none_or(|released| released <= since))
    }

    /// Evaluates the predicate.
    #[must_use]
    pub fn accepts(&self, info: &LeaseInfo) -> bool {
        (self.0)(info)
    }
}

impl Debug for LeaseFilter {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("LeaseFilter(..)")
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Lease, LeaseFilter, LeaseId, LeaseInfo, LeaseToken, released_sentinel};

    fn lease_id() -> LeaseId {
        LeaseId::new("sync-job").unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn lease_id_rejects_blank_values() {
        assert!(LeaseId::new("").is_err());
        assert!(LeaseId::new("  ").is_err());
    }

    #[test]
    fn released_sentinel_is_year_one() {
        assert_eq!(released_sentinel().to_rfc3339(), "0001-01-01T00:00:00+00:00");
    }

    #[test]
    fn released_lease_is_never_live() {
        let now = Utc::now();
        let lease = Lease {
            id: lease_id(),
            token: LeaseToken::generate(),
            expires: released_sentinel(),
            acquired: Some(now - Duration::seconds(5)),
            released: Some(now),
        };

        assert!(lease.is_released());
        assert!(!lease.is_live_at(now));
    }

    #[test]
    fn lease_is_live_strictly_before_expiry() {
        let now = Utc::now();
        let lease = Lease {
            id: lease_id(),
            token: LeaseToken::generate(),
            expires: now,
            acquired: None,
            released: None,
        };

        assert!(lease.is_live_at(now - Duration::milliseconds(1)));
        assert!(!lease.is_live_at(now));
    }

    #[test]
    fn not_released_since_filter_checks_release_timestamp() {
        let now = Utc::now();
        let filter = LeaseFilter::not_released_since(now - Duration::minutes(10));

        assert!(filter.accepts(&LeaseInfo::vacant(lease_id())));

        let mut info = LeaseInfo::vacant(lease_id());
        info.released = Some(now - Duration::minutes(20));
        assert!(filter.accepts(&info));

        info.released = Some(now - Duration::minutes(1));
        assert!(!filter.accepts(&info));
    }
}
