//! Status derivation.

use std::borrow::Cow;

use registrar_core::Kind;

/// Result of deriving a status from a spec.
#[derive(Debug, Clone, PartialEq)]
pub enum Derivation<S> {
    /// The status the object should have.
    Derived(S),
    /// The spec carries no data to derive from yet.
    Undefined { reason: Cow<'static, str> },
}

impl<S> Derivation<S> {
    /// Shorthand for [`Derivation::Undefined`].
    pub fn undefined(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Undefined {
            reason: reason.into(),
        }
    }

    /// The derived status, if any.
    pub fn into_status(self) -> Option<S> {
        match self {
            Self::Derived(status) => Some(status),
            Self::Undefined { .. } => None,
        }
    }
}

/// A kind whose status is a pure function of its spec.
///
/// `derive_status` must be deterministic and side-effect free: the reconciler
/// relies on it returning an identical status for an identical spec to skip
/// redundant writes.
pub trait Reconcilable: Kind {
    /// Compute the status the object should have.
    fn derive_status(spec: &Self::Spec) -> Derivation<Self::Status>;

    /// Human-readable name taken from the spec, for log lines.
    fn display_name(_spec: &Self::Spec) -> Option<&str> {
        None
    }
}
