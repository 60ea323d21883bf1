//! Error types for the store crate.

use std::fmt;

use registrar_core::{CancelReason, ObjectKey};

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error types.
///
/// "Object not found" on a read is not an error; see [`crate::Fetched`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Conditional write lost against a concurrent modification.
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },
    /// Write targeted an object that no longer exists.
    Gone { key: String },
    /// Create targeted an object that already exists.
    AlreadyExists { key: String },
    /// Backend could not serve the request.
    Unavailable { operation: String, reason: String },
    /// Caller cancelled the operation.
    Cancelled { operation: String },
    /// Caller's deadline passed before the operation finished.
    DeadlineExceeded { operation: String },
    /// Object failed to decode or validate.
    InvalidObject { reason: String },
    /// Watch channel closed.
    WatchClosed,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict {
                key,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "conflict on '{key}': expected resource version {expected}, found {actual}"
                )
            }
            Self::Gone { key } => {
                write!(f, "object '{key}' no longer exists")
            }
            Self::AlreadyExists { key } => {
                write!(f, "object '{key}' already exists")
            }
            Self::Unavailable { operation, reason } => {
                write!(f, "store operation '{operation}' failed: {reason}")
            }
            Self::Cancelled { operation } => {
                write!(f, "store operation '{operation}' cancelled")
            }
            Self::DeadlineExceeded { operation } => {
                write!(f, "store operation '{operation}' exceeded its deadline")
            }
            Self::InvalidObject { reason } => {
                write!(f, "invalid object: {reason}")
            }
            Self::WatchClosed => {
                write!(f, "watch channel closed")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Create a conflict error.
    pub fn conflict(key: &ObjectKey, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            key: key.to_string(),
            expected,
            actual,
        }
    }

    /// Create a gone error.
    pub fn gone(key: &ObjectKey) -> Self {
        Self::Gone {
            key: key.to_string(),
        }
    }

    /// Create an already-exists error.
    pub fn already_exists(key: &ObjectKey) -> Self {
        Self::AlreadyExists {
            key: key.to_string(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid object error.
    pub fn invalid_object(reason: impl Into<String>) -> Self {
        Self::InvalidObject {
            reason: reason.into(),
        }
    }

    /// Map a fired cancel token onto the operation it interrupted.
    pub fn interrupted(operation: impl Into<String>, reason: CancelReason) -> Self {
        let operation = operation.into();
        match reason {
            CancelReason::Cancelled => Self::Cancelled { operation },
            CancelReason::DeadlineExceeded => Self::DeadlineExceeded { operation },
        }
    }

    /// Whether the error is a lost optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::Gone { .. }
                | Self::Unavailable { .. }
                | Self::Cancelled { .. }
                | Self::DeadlineExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let err = StoreError::conflict(&ObjectKey::new("ns", "a"), 3, 4);
        let msg = err.to_string();
        assert!(msg.contains("ns/a"));
        assert!(msg.contains('3'));
        assert!(msg.contains('4'));
        assert!(err.is_conflict());
        assert!(err.is_transient());
    }

    #[test]
    fn test_interrupted_maps_reason() {
        assert_eq!(
            StoreError::interrupted("get", CancelReason::Cancelled),
            StoreError::Cancelled {
                operation: "get".into()
            }
        );
        assert!(matches!(
            StoreError::interrupted("get", CancelReason::DeadlineExceeded),
            StoreError::DeadlineExceeded { .. }
        ));
    }

    #[test]
    fn test_invalid_object_is_not_transient() {
        assert!(!StoreError::invalid_object("bad").is_transient());
        assert!(!StoreError::WatchClosed.is_transient());
    }
}
