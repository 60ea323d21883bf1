//! Object store capability and implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use registrar_core::{CancelToken, Kind, ObjectKey, Resource, Uid};
use tokio::sync::RwLock;

use crate::bus::{WatchBus, WatchSource, WatchSubscription};
use crate::error::{Result, StoreError};
use crate::event::WatchEvent;

/// Outcome of a read: the object, or proof that it does not exist.
pub enum Fetched<K: Kind> {
    Found(Resource<K>),
    NotFound,
}

impl<K: Kind> Fetched<K> {
    /// Whether the object exists.
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Convert into an `Option`.
    pub fn into_option(self) -> Option<Resource<K>> {
        match self {
            Self::Found(resource) => Some(resource),
            Self::NotFound => None,
        }
    }
}

impl<K: Kind> From<Option<Resource<K>>> for Fetched<K> {
    fn from(value: Option<Resource<K>>) -> Self {
        value.map_or(Self::NotFound, Self::Found)
    }
}

impl<K: Kind> Clone for Fetched<K> {
    fn clone(&self) -> Self {
        match self {
            Self::Found(resource) => Self::Found(resource.clone()),
            Self::NotFound => Self::NotFound,
        }
    }
}

impl<K: Kind> fmt::Debug for Fetched<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(resource) => f.debug_tuple("Found").field(resource).finish(),
            Self::NotFound => f.write_str("NotFound"),
        }
    }
}

/// The narrow store capability a reconciler needs.
///
/// Both calls must honour `cancel` by returning promptly with
/// [`StoreError::Cancelled`] or [`StoreError::DeadlineExceeded`].
#[async_trait]
pub trait ObjectStore<K: Kind>: Send + Sync {
    /// Read the current object.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails. A missing object is
    /// [`Fetched::NotFound`], not an error.
    async fn get(&self, key: &ObjectKey, cancel: &CancelToken) -> Result<Fetched<K>>;

    /// Replace the status of `resource`, conditional on its
    /// `resource_version` still being current.
    ///
    /// Returns the stored object after the write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the object changed since it was
    /// read, [`StoreError::Gone`] if it was deleted, or another store error.
    async fn update_status(&self, resource: &Resource<K>, cancel: &CancelToken)
    -> Result<Resource<K>>;
}

#[async_trait]
impl<K: Kind, S: ObjectStore<K> + ?Sized> ObjectStore<K> for Arc<S> {
    async fn get(&self, key: &ObjectKey, cancel: &CancelToken) -> Result<Fetched<K>> {
        (**self).get(key, cancel).await
    }

    async fn update_status(
        &self,
        resource: &Resource<K>,
        cancel: &CancelToken,
    ) -> Result<Resource<K>> {
        (**self).update_status(resource, cancel).await
    }
}

/// In-memory versioned object store.
///
/// Every write bumps a store-wide resource version and is announced on the
/// watch bus. Spec changes also bump the object's generation.
pub struct InMemoryStore<K: Kind> {
    objects: RwLock<HashMap<ObjectKey, Resource<K>>>,
    version: AtomicU64,
    bus: WatchBus,
}

impl<K: Kind> InMemoryStore<K> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_bus(WatchBus::new())
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create an empty store publishing on `bus`.
    pub fn with_bus(bus: WatchBus) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            bus,
        }
    }

    /// The bus this store publishes on.
    pub fn bus(&self) -> &WatchBus {
        &self.bus
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    fn stamp_new(&self, mut resource: Resource<K>) -> Resource<K> {
        resource.metadata.uid = Some(Uid::new());
        resource.metadata.generation = 1;
        resource.metadata.resource_version = self.next_version();
        resource.metadata.creation_timestamp = Some(Utc::now());
        resource
    }

    /// Store a new object. Spec and status are taken from `resource`;
    /// metadata other than namespace and name is assigned by the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the key is taken.
    pub async fn create(&self, resource: Resource<K>) -> Result<Resource<K>> {
        let key = resource.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::already_exists(&key));
        }

        let stored = self.stamp_new(resource);
        objects.insert(key.clone(), stored.clone());
        drop(objects);

        self.bus.publish(WatchEvent::Applied {
            key,
            resource_version: stored.metadata.resource_version,
        });
        Ok(stored)
    }

    /// Create the object, or replace the spec of an existing one.
    ///
    /// The status of an existing object is left alone. Applying an identical
    /// spec is a no-op and does not bump the resource version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Gone`] if the object vanished mid-write.
    pub async fn apply(&self, resource: Resource<K>) -> Result<Resource<K>> {
        let key = resource.key();
        let mut objects = self.objects.write().await;

        let stored = match objects.get(&key).map(|current| current.spec == resource.spec) {
            None => {
                let stored = self.stamp_new(resource);
                objects.insert(key.clone(), stored.clone());
                stored
            }
            Some(true) => {
                return objects
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| StoreError::gone(&key));
            }
            Some(false) => {
                let current = objects.get_mut(&key).ok_or_else(|| StoreError::gone(&key))?;
                current.spec = resource.spec;
                current.metadata.generation = current.metadata.generation.saturating_add(1);
                current.metadata.resource_version = self.next_version();
                current.clone()
            }
        };
        drop(objects);

        self.bus.publish(WatchEvent::Applied {
            key,
            resource_version: stored.metadata.resource_version,
        });
        Ok(stored)
    }

    /// Remove an object, returning it if it existed.
    pub async fn delete(&self, key: &ObjectKey) -> Option<Resource<K>> {
        let removed = self.objects.write().await.remove(key);
        if removed.is_some() {
            self.bus.publish(WatchEvent::Deleted { key: key.clone() });
        }
        removed
    }

    /// Every stored object, ordered by key.
    pub async fn list(&self) -> Vec<Resource<K>> {
        self.objects
            .read()
            .await
            .values()
            .cloned()
            .sorted_by(|a, b| a.key().cmp(&b.key()))
            .collect()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl<K: Kind> Default for InMemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: Kind> ObjectStore<K> for InMemoryStore<K> {
    async fn get(&self, key: &ObjectKey, cancel: &CancelToken) -> Result<Fetched<K>> {
        let objects = cancel
            .run(self.objects.read())
            .await
            .map_err(|reason| StoreError::interrupted("get", reason))?;
        Ok(objects.get(key).cloned().into())
    }

    async fn update_status(
        &self,
        resource: &Resource<K>,
        cancel: &CancelToken,
    ) -> Result<Resource<K>> {
        let key = resource.key();
        let mut objects = cancel
            .run(self.objects.write())
            .await
            .map_err(|reason| StoreError::interrupted("update_status", reason))?;

        let current = objects.get_mut(&key).ok_or_else(|| StoreError::gone(&key))?;
        let expected = resource.metadata.resource_version;
        let actual = current.metadata.resource_version;
        if expected != actual {
            return Err(StoreError::conflict(&key, expected, actual));
        }

        if current.status == resource.status {
            return Ok(current.clone());
        }

        current.status = resource.status.clone();
        current.metadata.resource_version = self.next_version();
        let stored = current.clone();
        drop(objects);

        self.bus.publish(WatchEvent::Applied {
            key,
            resource_version: stored.metadata.resource_version,
        });
        Ok(stored)
    }
}

#[async_trait]
impl<K: Kind> WatchSource for InMemoryStore<K> {
    fn kind(&self) -> &'static str {
        K::KIND
    }

    fn watch(&self) -> Result<WatchSubscription> {
        self.bus.subscribe()
    }

    async fn list_keys(&self, cancel: &CancelToken) -> Result<Vec<ObjectKey>> {
        let objects = cancel
            .run(self.objects.read())
            .await
            .map_err(|reason| StoreError::interrupted("list", reason))?;
        Ok(objects.keys().cloned().sorted().collect())
    }
}

/// A wrapper that adds tracing to an object store.
pub struct TracingStore<S> {
    inner: S,
}

impl<S> TracingStore<S> {
    /// Create a new tracing store.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<K: Kind, S: ObjectStore<K>> ObjectStore<K> for TracingStore<S> {
    async fn get(&self, key: &ObjectKey, cancel: &CancelToken) -> Result<Fetched<K>> {
        tracing::debug!(kind = K::KIND, key = %key, "Getting object");
        let result = self.inner.get(key, cancel).await;
        match &result {
            Ok(fetched) => tracing::trace!(found = fetched.is_found(), "Object fetched"),
            Err(e) => tracing::debug!(error = %e, "Get failed"),
        }
        result
    }

    async fn update_status(
        &self,
        resource: &Resource<K>,
        cancel: &CancelToken,
    ) -> Result<Resource<K>> {
        tracing::debug!(
            kind = K::KIND,
            key = %resource.key(),
            resource_version = resource.metadata.resource_version,
            "Updating status"
        );
        let result = self.inner.update_status(resource, cancel).await;
        match &result {
            Ok(stored) => tracing::trace!(
                resource_version = stored.metadata.resource_version,
                "Status updated"
            ),
            Err(e) => tracing::debug!(error = %e, "Status update failed"),
        }
        result
    }
}
