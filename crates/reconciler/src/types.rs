//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use registrar_core::ObjectKey;

/// A request to reconcile one object.
///
/// Carries identity only; the reconciler always re-reads the object because
/// the request may be stale or stand for several coalesced changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    pub key: ObjectKey,
}

impl ReconcileRequest {
    /// Create a request for `key`.
    pub fn new(key: ObjectKey) -> Self {
        Self { key }
    }
}

impl From<ObjectKey> for ReconcileRequest {
    fn from(key: ObjectKey) -> Self {
        Self::new(key)
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// What the dispatcher should do after a successful reconcile.
///
/// A failed reconcile (an `Err` from [`crate::Reconciler::reconcile`]) means
/// "requeue with backoff".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing further to do until the object changes again.
    Done,
    /// Reconcile again after the given delay even without a change.
    RequeueAfter(Duration),
}

/// What a reconcile observed and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The object no longer exists.
    Deleted,
    /// The spec has no data to derive a status from yet; status untouched.
    NothingToDerive,
    /// The persisted status already matches; no write issued.
    Unchanged,
    /// The status was written.
    Updated { resource_version: u64 },
}

impl Outcome {
    /// Whether a status write was issued.
    pub fn wrote_status(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }

    /// Short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::NothingToDerive => "nothing_to_derive",
            Self::Unchanged => "unchanged",
            Self::Updated { .. } => "updated",
        }
    }
}

/// Result of a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub outcome: Outcome,
    pub action: Action,
}

impl Reconciled {
    /// A finished reconcile with no follow-up.
    pub fn done(outcome: Outcome) -> Self {
        Self {
            outcome,
            action: Action::Done,
        }
    }
}
