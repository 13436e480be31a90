//! Shared primitives for all Rust crates in Leasewarden.

#![forbid(unsafe_code)]

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across Leasewarden crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for NonEmptyString {
    type Error = AppError;

    fn try_from(value: String) -> AppResult<Self> {
        Self::new(value)
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl Display for NonEmptyString {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Common application error categories.
///
/// Ordinary lease contention is never an error; it is reported through the
/// lease result values instead.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// The backing store detected a write-ordering conflict; safe to retry.
    #[error("transient conflict: {0}")]
    TransientConflict(String),

    /// The caller aborted the operation before anything was persisted.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true for the error class that retry policies may absorb.
    #[must_use]
    pub fn is_transient_conflict(&self) -> bool {
        matches!(self, Self::TransientConflict(_))
    }

    /// Returns true when the error reports caller-requested cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, NonEmptyString};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());
    }

    #[test]
    fn non_empty_string_displays_inner_value() {
        let value = NonEmptyString::new("sync-job");
        assert!(value.is_ok());
        assert_eq!(
            value.unwrap_or_else(|_| unreachable!()).to_string(),
            "sync-job"
        );
    }

    #[test]
    fn only_transient_conflicts_are_retryable() {
        assert!(AppError::TransientConflict("40001".to_owned()).is_transient_conflict());
        assert!(!AppError::Internal("connection reset".to_owned()).is_transient_conflict());
        assert!(!AppError::Cancelled("shutdown".to_owned()).is_transient_conflict());
    }
}
