//! Reconciler implementation.

use std::sync::Arc;
use std::time::Duration;

use registrar_core::CancelToken;
use registrar_store::{Fetched, ObjectStore, TracingStore};
use tracing::{Instrument, error, info, info_span, warn};

use crate::derive::{Derivation, Reconcilable};
use crate::error::{Error, Result};
use crate::types::{Action, Outcome, ReconcileRequest, Reconciled};

/// Configuration for the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Reconcile again this long after every success, even without a change.
    pub resync_period: Option<Duration>,
}

/// Level-triggered reconciler for one kind.
///
/// Each call re-reads the object, derives the status its spec implies and
/// writes it back only when it differs from what is persisted. Nothing is
/// remembered between calls, so any number of coalesced or repeated requests
/// converge on the same result.
pub struct Reconciler<K: Reconcilable> {
    store: Arc<dyn ObjectStore<K>>,
    config: ReconcilerConfig,
}

impl<K: Reconcilable> Reconciler<K> {
    /// Create a new reconciler.
    pub fn new(store: Arc<dyn ObjectStore<K>>, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    /// Start building a reconciler.
    pub fn builder() -> ReconcilerBuilder<K> {
        ReconcilerBuilder::new()
    }

    /// The configuration in use.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Bring the status of the requested object in line with its spec.
    ///
    /// `cancel` is forwarded to every store call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FetchFailed`] or [`Error::StatusUpdateFailed`] when
    /// the store fails, including version conflicts and cancellation. Both
    /// mean the request should be retried with backoff.
    pub async fn reconcile(
        &self,
        request: &ReconcileRequest,
        cancel: &CancelToken,
    ) -> Result<Reconciled> {
        let span = info_span!(
            "reconcile",
            kind = K::KIND,
            namespace = %request.key.namespace,
            name = %request.key.name,
        );
        self.reconcile_inner(request, cancel).instrument(span).await
    }

    async fn reconcile_inner(
        &self,
        request: &ReconcileRequest,
        cancel: &CancelToken,
    ) -> Result<Reconciled> {
        let key = &request.key;

        let resource = match self.store.get(key, cancel).await {
            Ok(Fetched::Found(resource)) => resource,
            Ok(Fetched::NotFound) => {
                info!("Object not found, assuming it was deleted");
                return Ok(Reconciled::done(Outcome::Deleted));
            }
            Err(source) => {
                error!(error = %source, "Unable to fetch object");
                return Err(Error::fetch_failed(K::KIND, key, source));
            }
        };

        let display_name = K::display_name(&resource.spec).unwrap_or_default();

        let desired = match K::derive_status(&resource.spec) {
            Derivation::Derived(status) => status,
            Derivation::Undefined { reason } => {
                info!(display_name, %reason, "Nothing to derive, status left as is");
                return Ok(self.finish(Outcome::NothingToDerive));
            }
        };

        if resource.status == desired {
            info!(display_name, status = ?desired, "Reconciled, status already up to date");
            return Ok(self.finish(Outcome::Unchanged));
        }

        match self
            .store
            .update_status(&resource.with_status(desired), cancel)
            .await
        {
            Ok(stored) => {
                info!(
                    display_name,
                    status = ?stored.status,
                    resource_version = stored.metadata.resource_version,
                    "Reconciled, status updated"
                );
                Ok(self.finish(Outcome::Updated {
                    resource_version: stored.metadata.resource_version,
                }))
            }
            Err(source) => {
                if source.is_conflict() {
                    warn!(error = %source, "Object changed while reconciling, will retry");
                } else {
                    error!(error = %source, "Unable to update status");
                }
                Err(Error::status_update_failed(K::KIND, key, source))
            }
        }
    }

    fn finish(&self, outcome: Outcome) -> Reconciled {
        match self.config.resync_period {
            Some(period) => Reconciled {
                outcome,
                action: Action::RequeueAfter(period),
            },
            None => Reconciled::done(outcome),
        }
    }
}

/// Builder for creating a reconciler.
pub struct ReconcilerBuilder<K: Reconcilable> {
    store: Option<Arc<dyn ObjectStore<K>>>,
    config: ReconcilerConfig,
    traced: bool,
}

impl<K: Reconcilable> ReconcilerBuilder<K> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            config: ReconcilerConfig::default(),
            traced: false,
        }
    }

    /// Set the object store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ObjectStore<K>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the config.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the resync period.
    #[must_use]
    pub fn resync_period(mut self, period: Duration) -> Self {
        self.config.resync_period = Some(period);
        self
    }

    /// Log every store call at debug level.
    #[must_use]
    pub fn traced(mut self) -> Self {
        self.traced = true;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if no store was set or the resync
    /// period is zero.
    pub fn build(self) -> Result<Reconciler<K>> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("reconciler requires an object store"))?;
        if self.config.resync_period.is_some_and(|period| period.is_zero()) {
            return Err(Error::invalid_config("resync_period must be > 0 when set"));
        }

        let store: Arc<dyn ObjectStore<K>> = if self.traced {
            Arc::new(TracingStore::new(store))
        } else {
            store
        };

        Ok(Reconciler::new(store, self.config))
    }
}

impl<K: Reconcilable> Default for ReconcilerBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}
