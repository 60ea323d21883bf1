//! Change notifications emitted by a store.

use registrar_core::ObjectKey;

/// A change notification for one object.
///
/// Events carry identity only. Consumers must re-read the object, since the
/// event may be stale by the time it is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Object was created or written (spec or status).
    Applied { key: ObjectKey, resource_version: u64 },
    /// Object was deleted.
    Deleted { key: ObjectKey },
    /// The subscriber fell behind and missed `missed` events; it should
    /// relist every object.
    Resync { missed: u64 },
}

impl WatchEvent {
    /// The object this event refers to, if it refers to a single one.
    pub fn key(&self) -> Option<&ObjectKey> {
        match self {
            Self::Applied { key, .. } | Self::Deleted { key } => Some(key),
            Self::Resync { .. } => None,
        }
    }

    /// Short name of the event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Deleted { .. } => "deleted",
            Self::Resync { .. } => "resync",
        }
    }
}
