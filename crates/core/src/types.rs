//! Object identity, metadata and the resource envelope.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Error;

/// Namespace used when a manifest or key omits one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Stable identity of an object: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Create a key from a namespace and a name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a key in the default namespace.
    pub fn in_default(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_NAMESPACE, name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Parses `namespace/name`, or a bare `name` in the default namespace.
impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = match s.split_once('/') {
            Some((namespace, name)) => (namespace, name),
            None => (DEFAULT_NAMESPACE, s),
        };

        if namespace.is_empty() {
            return Err(Error::invalid_key(s, "namespace is empty"));
        }
        if name.is_empty() {
            return Err(Error::invalid_key(s, "name is empty"));
        }
        if name.contains('/') {
            return Err(Error::invalid_key(s, "name must not contain '/'"));
        }

        Ok(Self::new(namespace, name))
    }
}

/// Unique identifier assigned by the store when an object is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid(Ulid);

impl Uid {
    /// Create a new random uid.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Object metadata maintained by the store.
///
/// `resource_version` changes on every write (spec or status) and is the
/// optimistic-concurrency token for status updates. `generation` changes only
/// when the spec changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata for an object that has not been stored yet.
    pub fn new(key: &ObjectKey) -> Self {
        Self {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            uid: None,
            resource_version: 0,
            generation: 0,
            creation_timestamp: None,
        }
    }

    /// The identity of the object.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// A managed resource kind: its name plus its spec and status schema.
///
/// Implementors are usually zero-sized marker types.
pub trait Kind: Send + Sync + 'static {
    /// Kind name as it appears in manifests (e.g. `Student`).
    const KIND: &'static str;
    /// API group/version as it appears in manifests.
    const API_VERSION: &'static str;

    /// User-declared configuration. Read-only to controllers.
    type Spec: Clone
        + fmt::Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Controller-derived state.
    type Status: Clone
        + fmt::Debug
        + Default
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
}

/// A stored object of kind `K`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "", rename_all = "camelCase")]
pub struct Resource<K: Kind> {
    pub metadata: ObjectMeta,
    pub spec: K::Spec,
    #[serde(default)]
    pub status: K::Status,
}

impl<K: Kind> Resource<K> {
    /// Create an unsaved resource with a default status.
    pub fn new(key: &ObjectKey, spec: K::Spec) -> Self {
        Self {
            metadata: ObjectMeta::new(key),
            spec,
            status: K::Status::default(),
        }
    }

    /// The identity of the resource.
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Copy of this resource carrying `status` instead of the current one.
    ///
    /// Metadata (and therefore `resource_version`) is preserved so the copy
    /// can be submitted as a conditional status update.
    #[must_use]
    pub fn with_status(&self, status: K::Status) -> Self {
        Self {
            metadata: self.metadata.clone(),
            spec: self.spec.clone(),
            status,
        }
    }
}

impl<K: Kind> Clone for Resource<K> {
    fn clone(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            spec: self.spec.clone(),
            status: self.status.clone(),
        }
    }
}

impl<K: Kind> fmt::Debug for Resource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("kind", &K::KIND)
            .field("metadata", &self.metadata)
            .field("spec", &self.spec)
            .field("status", &self.status)
            .finish()
    }
}

impl<K: Kind> PartialEq for Resource<K> {
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata && self.spec == other.spec && self.status == other.status
    }
}
