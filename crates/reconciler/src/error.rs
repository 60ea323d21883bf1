//! Error types for the reconciler crate.

use registrar_core::ObjectKey;
use registrar_store::StoreError;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// A per-object error returned from a reconcile means "requeue with
/// backoff". Setup errors are fatal.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading the object failed.
    #[error("failed to get {kind} '{key}': {source}")]
    FetchFailed {
        kind: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    /// Persisting the derived status failed.
    #[error("failed to update {kind} '{key}' status: {source}")]
    StatusUpdateFailed {
        kind: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    /// Wiring a controller to its watch source failed.
    #[error("failed to register {kind} controller: {reason}")]
    RegistrationFailed { kind: &'static str, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Loading configuration failed.
    #[error(transparent)]
    Config(#[from] registrar_core::Error),
}

impl Error {
    /// Create a fetch failed error.
    pub fn fetch_failed(kind: &'static str, key: &ObjectKey, source: StoreError) -> Self {
        Self::FetchFailed {
            kind,
            key: key.to_string(),
            source,
        }
    }

    /// Create a status update failed error.
    pub fn status_update_failed(kind: &'static str, key: &ObjectKey, source: StoreError) -> Self {
        Self::StatusUpdateFailed {
            kind,
            key: key.to_string(),
            source,
        }
    }

    /// Create a registration failed error.
    pub fn registration_failed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            kind,
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// The store error behind a per-object failure, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::FetchFailed { source, .. } | Self::StatusUpdateFailed { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Whether the failure was a lost optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_conflict)
    }

    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_transient)
    }

    /// Whether the error must stop startup rather than trigger a retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RegistrationFailed { .. } | Self::InvalidConfig { .. } | Self::Config(_)
        )
    }
}
