//! `Guestbook`: an opaque payload with no derived state yet.

use registrar_core::Kind;
use serde::{Deserialize, Serialize};

use crate::derive::{Derivation, Reconcilable};

/// Marker type for the `Guestbook` kind.
#[derive(Debug, Clone, Copy)]
pub struct Guestbook;

/// Declared state of a guestbook. Fields other than `foo` are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestbookSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foo: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Derived state of a guestbook. Empty for now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestbookStatus {}

impl Kind for Guestbook {
    const KIND: &'static str = "Guestbook";
    const API_VERSION: &'static str = "webapp.my.domain/v1";

    type Spec = GuestbookSpec;
    type Status = GuestbookStatus;
}

impl Reconcilable for Guestbook {
    fn derive_status(_spec: &GuestbookSpec) -> Derivation<GuestbookStatus> {
        Derivation::Derived(GuestbookStatus::default())
    }
}
