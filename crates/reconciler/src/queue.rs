//! Work queue feeding reconcile requests to workers.
//!
//! Keys are deduplicated while waiting and serialized while processing: a key
//! added again while a worker holds it is parked until that worker calls
//! [`WorkQueue::done`], so one key never has two reconciles in flight.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use registrar_core::{CancelHandle, CancelToken, ObjectKey};
use tokio::sync::{Mutex, Notify};
use tracing::trace;

use crate::backoff::{BackoffPolicy, FailureTracker};

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: FailureTracker,
    shutting_down: bool,
}

/// Deduplicating, rate-limited queue of object keys.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    policy: BackoffPolicy,
    shutdown: CancelHandle,
    shutdown_token: CancelToken,
}

impl WorkQueue {
    /// Create a queue retrying failures with `policy`.
    pub fn new(policy: BackoffPolicy) -> Self {
        let (shutdown, shutdown_token) = CancelToken::pair();
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            policy,
            shutdown,
            shutdown_token,
        }
    }

    /// Enqueue `key` unless it is already waiting.
    ///
    /// Ignored after shutdown.
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            trace!(key = %key, "Key in flight, deferring");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key and mark it as processing.
    ///
    /// Returns `None` once the queue is shut down; keys still waiting at
    /// that point are dropped.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release a key returned by [`get`](Self::get).
    ///
    /// If it was added again meanwhile, it goes back on the queue.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue `key` after `delay`. The timer is dropped on shutdown.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if delay.is_zero()
                || queue
                    .shutdown_token
                    .run(tokio::time::sleep(delay))
                    .await
                    .is_ok()
            {
                queue.add(key).await;
            }
        });
    }

    /// Enqueue `key` after its backoff delay and return that delay.
    pub async fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) -> Duration {
        let delay = self
            .state
            .lock()
            .await
            .failures
            .record_failure(&key, &self.policy);
        self.add_after(key, delay);
        delay
    }

    /// Clear the failure history of `key`.
    pub async fn forget(&self, key: &ObjectKey) {
        self.state.lock().await.failures.forget(key);
    }

    /// Consecutive failures recorded for `key`.
    pub async fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.state.lock().await.failures.failures(key)
    }

    /// Keys waiting to be picked up.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Whether no key is waiting.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop handing out keys and wake every waiting worker.
    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("policy", &self.policy)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
