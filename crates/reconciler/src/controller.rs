//! Controller: wires a reconciler to a watch source and runs its workers.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use registrar_core::{CancelHandle, CancelToken, ObjectKey};
use registrar_store::{WatchEvent, WatchSource, WatchSubscription};
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::derive::Reconcilable;
use crate::error::{Error, Result};
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::types::{Action, ReconcileRequest, Reconciled};

/// Longest accepted [`LoopConfig::reconcile_timeout`].
pub const MAX_RECONCILE_TIMEOUT: Duration = Duration::from_secs(86_400);

/// Configuration for the worker loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Concurrent reconciles.
    pub workers: usize,
    /// Deadline for one reconcile.
    pub reconcile_timeout: Duration,
    /// Retry policy for failed reconciles.
    pub backoff: BackoffPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            reconcile_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl LoopConfig {
    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero workers, a timeout that is
    /// zero or above [`MAX_RECONCILE_TIMEOUT`], or an invalid backoff policy.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be > 0"));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(Error::invalid_config("reconcile_timeout must be > 0"));
        }
        if self.reconcile_timeout > MAX_RECONCILE_TIMEOUT {
            return Err(Error::invalid_config(format!(
                "reconcile_timeout must be at most {}s",
                MAX_RECONCILE_TIMEOUT.as_secs()
            )));
        }
        self.backoff.validate()
    }
}

/// Handle for stopping a running controller.
#[derive(Debug, Clone)]
pub struct LoopStopper {
    handle: CancelHandle,
}

impl LoopStopper {
    /// Ask the controller to stop. In-flight reconciles see their token fire.
    pub fn stop(&self) {
        self.handle.cancel();
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Resolve once the controller was asked to stop, by this handle or by
    /// the controller itself after its watch ended.
    pub async fn stopped(&self) {
        self.handle.token().cancelled().await;
    }
}

/// Counters reported when a controller stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Reconciles that returned `Ok`.
    pub reconciled: u64,
    /// Reconciles that returned `Err` and were requeued with backoff.
    pub failed: u64,
}

impl LoopStats {
    /// Sum two sets of counters.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            reconciled: self.reconciled.saturating_add(other.reconciled),
            failed: self.failed.saturating_add(other.failed),
        }
    }
}

/// A registered controller for one kind.
///
/// Every create, update or delete announced by the watch source becomes a
/// reconcile request for that object's key. Requests for one key are
/// coalesced and never run concurrently; requests for different keys run on
/// up to `workers` tasks in no particular order.
pub struct Controller<K: Reconcilable> {
    reconciler: Arc<Reconciler<K>>,
    source: Arc<dyn WatchSource>,
    subscription: WatchSubscription,
    queue: Arc<WorkQueue>,
    config: LoopConfig,
    stop: CancelHandle,
}

impl<K: Reconcilable> Controller<K> {
    /// Subscribe to `source` and enqueue every object it already holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistrationFailed`] if the source serves another
    /// kind, cannot be watched or cannot be listed, and
    /// [`Error::InvalidConfig`] for an unusable `config`. Both are fatal.
    pub async fn register(
        reconciler: Arc<Reconciler<K>>,
        source: Arc<dyn WatchSource>,
        config: LoopConfig,
    ) -> Result<Self> {
        config.validate()?;

        if source.kind() != K::KIND {
            return Err(Error::registration_failed(
                K::KIND,
                format!("watch source serves '{}'", source.kind()),
            ));
        }

        // Subscribe before listing so nothing written in between is missed.
        let subscription = source
            .watch()
            .map_err(|e| Error::registration_failed(K::KIND, format!("watch failed: {e}")))?;

        let list_token = CancelToken::never().with_timeout(config.reconcile_timeout);
        let keys = source
            .list_keys(&list_token)
            .await
            .map_err(|e| Error::registration_failed(K::KIND, format!("initial list failed: {e}")))?;

        let queue = Arc::new(WorkQueue::new(config.backoff.clone()));
        let initial = keys.len();
        for key in keys {
            queue.add(key).await;
        }

        let (stop, _) = CancelToken::pair();
        info!(kind = K::KIND, initial, workers = config.workers, "Controller registered");

        Ok(Self {
            reconciler,
            source,
            subscription,
            queue,
            config,
            stop,
        })
    }

    /// A handle that stops [`run`](Self::run).
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            handle: self.stop.clone(),
        }
    }

    /// The queue feeding the workers.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Run until stopped.
    ///
    /// Per-object failures are logged and retried with backoff; they never
    /// end the loop. A watch that ends stops the controller, since it would
    /// no longer see changes.
    pub async fn run(self) -> LoopStats {
        let Self {
            reconciler,
            source,
            subscription,
            queue,
            config,
            stop,
        } = self;
        let stop_token = stop.token();

        let pump = tokio::spawn(pump_events(
            K::KIND,
            source,
            subscription,
            Arc::clone(&queue),
            stop.clone(),
        ));

        let workers: Vec<_> = (0..config.workers)
            .map(|worker| {
                tokio::spawn(work(
                    worker,
                    Arc::clone(&reconciler),
                    Arc::clone(&queue),
                    stop_token.clone(),
                    config.reconcile_timeout,
                ))
            })
            .collect();

        stop_token.cancelled().await;
        info!(kind = K::KIND, "Controller stopping");
        queue.shutdown().await;

        let stats = join_all(workers)
            .await
            .into_iter()
            .fold(LoopStats::default(), |total, joined| match joined {
                Ok(stats) => total.merge(stats),
                Err(e) => {
                    error!(kind = K::KIND, error = %e, "Worker task failed");
                    total
                }
            });
        if let Err(e) = pump.await {
            error!(kind = K::KIND, error = %e, "Watch task failed");
        }

        info!(
            kind = K::KIND,
            reconciled = stats.reconciled,
            failed = stats.failed,
            "Controller stopped"
        );
        stats
    }
}

async fn pump_events(
    kind: &'static str,
    source: Arc<dyn WatchSource>,
    mut subscription: WatchSubscription,
    queue: Arc<WorkQueue>,
    stop_handle: CancelHandle,
) {
    let stop = stop_handle.token();
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            event = subscription.recv() => event,
        };

        match event {
            Ok(WatchEvent::Applied { key, .. } | WatchEvent::Deleted { key }) => {
                queue.add(key).await;
            }
            Ok(WatchEvent::Resync { missed }) => {
                warn!(kind, missed, "Watch fell behind, relisting");
                match source.list_keys(&stop).await {
                    Ok(keys) => {
                        for key in keys {
                            queue.add(key).await;
                        }
                    }
                    Err(e) => warn!(kind, error = %e, "Relist failed"),
                }
            }
            Err(e) => {
                error!(kind, error = %e, "Watch ended, stopping controller");
                stop_handle.cancel();
                return;
            }
        }
    }
}

async fn work<K: Reconcilable>(
    worker: usize,
    reconciler: Arc<Reconciler<K>>,
    queue: Arc<WorkQueue>,
    stop: CancelToken,
    timeout: Duration,
) -> LoopStats {
    let mut stats = LoopStats::default();

    while let Some(key) = queue.get().await {
        let cancel = stop.with_timeout(timeout);
        let request = ReconcileRequest::new(key.clone());

        match reconciler.reconcile(&request, &cancel).await {
            Ok(Reconciled { outcome, action }) => {
                stats.reconciled = stats.reconciled.saturating_add(1);
                debug!(worker, key = %key, outcome = outcome.as_str(), "Reconciled");
                queue.forget(&key).await;
                if let Action::RequeueAfter(delay) = action {
                    queue.add_after(key.clone(), delay);
                }
            }
            Err(e) if stop.is_cancelled() => {
                debug!(worker, key = %key, error = %e, "Reconcile interrupted by shutdown");
            }
            Err(e) => {
                stats.failed = stats.failed.saturating_add(1);
                requeue_failed(&queue, key.clone(), &e).await;
            }
        }

        queue.done(&key).await;
    }

    stats
}

async fn requeue_failed(queue: &Arc<WorkQueue>, key: ObjectKey, error: &Error) {
    let delay = queue.add_rate_limited(key.clone()).await;
    warn!(
        key = %key,
        error = %error,
        conflict = error.is_conflict(),
        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        "Reconcile failed, requeued"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_config_validation() {
        assert!(LoopConfig::default().validate().is_ok());
        assert!(
            LoopConfig {
                workers: 0,
                ..LoopConfig::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            LoopConfig {
                reconcile_timeout: Duration::ZERO,
                ..LoopConfig::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_stats_merge() {
        let a = LoopStats {
            reconciled: 2,
            failed: 1,
        };
        let b = LoopStats {
            reconciled: 3,
            failed: 0,
        };
        assert_eq!(
            a.merge(b),
            LoopStats {
                reconciled: 5,
                failed: 1
            }
        );
    }

    #[test]
    fn test_loop_config_rejects_timeout_above_cap() {
        let config = LoopConfig {
            reconcile_timeout: Duration::from_secs(u64::MAX),
            ..LoopConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));

        let at_cap = LoopConfig {
            reconcile_timeout: MAX_RECONCILE_TIMEOUT,
            ..LoopConfig::default()
        };
        assert!(at_cap.validate().is_ok());
    }

    #[test]
    fn test_stats_merge_saturates() {
        let full = LoopStats {
            reconciled: u64::MAX,
            failed: 0,
        };
        assert_eq!(full.merge(full).reconciled, u64::MAX);
    }

    #[test]
    fn test_stopper_is_shared() {
        let (handle, _) = CancelToken::pair();
        let stopper = LoopStopper { handle };
        let copy = stopper.clone();
        stopper.stop();
        assert!(copy.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_stop() {
        let (handle, _) = CancelToken::pair();
        let stopper = LoopStopper { handle };
        let waiter = stopper.clone();

        let waiting = tokio::spawn(async move { waiter.stopped().await });
        stopper.stop();

        tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap();
    }
}
