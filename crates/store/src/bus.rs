//! Watch bus for change notifications.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use registrar_core::{CancelToken, ObjectKey};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::event::WatchEvent;

/// Default broadcast buffer per bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Something a controller can register against: a stream of change
/// notifications for one kind plus a way to list what already exists.
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Kind name of the watched objects.
    fn kind(&self) -> &'static str;

    /// Subscribe to change notifications.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WatchClosed`] if the source no longer delivers
    /// events.
    fn watch(&self) -> Result<WatchSubscription>;

    /// Keys of every object currently stored.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails or is cancelled.
    async fn list_keys(&self, cancel: &CancelToken) -> Result<Vec<ObjectKey>>;
}

/// Subscription handle for receiving watch events.
#[derive(Debug)]
pub struct WatchSubscription {
    receiver: broadcast::Receiver<WatchEvent>,
}

impl WatchSubscription {
    /// Receive the next event.
    ///
    /// A subscriber that fell behind receives [`WatchEvent::Resync`] instead
    /// of the events it missed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WatchClosed`] once the bus is dropped.
    pub async fn recv(&mut self) -> Result<WatchEvent> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(RecvError::Lagged(missed)) => Ok(WatchEvent::Resync { missed }),
            Err(RecvError::Closed) => Err(StoreError::WatchClosed),
        }
    }
}

/// Broadcast bus fanning store changes out to subscribers.
#[derive(Debug)]
pub struct WatchBus {
    sender: broadcast::Sender<WatchEvent>,
    closed: AtomicBool,
    published: AtomicU64,
}

impl WatchBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            closed: AtomicBool::new(false),
            published: AtomicU64::new(0),
        }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of subscribers that received it. Having no
    /// subscribers is not an error.
    pub fn publish(&self, event: WatchEvent) -> usize {
        if self.is_closed() {
            return 0;
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        let delivered = self.sender.send(event.clone()).unwrap_or(0);

        debug!(
            event_type = event.event_type(),
            key = ?event.key(),
            delivered,
            "Published watch event"
        );

        delivered
    }

    /// Subscribe to future events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WatchClosed`] after [`WatchBus::close`].
    pub fn subscribe(&self) -> Result<WatchSubscription> {
        if self.is_closed() {
            return Err(StoreError::WatchClosed);
        }
        Ok(WatchSubscription {
            receiver: self.sender.subscribe(),
        })
    }

    /// Stop accepting subscribers and publishing events.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the bus was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total events published since creation.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for WatchBus {
    fn default() -> Self {
        Self::new()
    }
}
