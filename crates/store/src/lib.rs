//! Versioned object storage with watch notifications.
//!
//! - **Store capability**: [`ObjectStore`], the narrow `get` / `update_status`
//!   surface a reconciler depends on
//! - **In-memory backend**: [`InMemoryStore`], versioned with optimistic
//!   concurrency on status writes
//! - **Watch**: [`WatchBus`] fans change notifications out to
//!   [`WatchSource`] subscribers
//! - **Manifests**: kind-tagged documents for seeding and dumping a store
//!
//! # Example
//!
//! ```ignore
//! use registrar_core::{CancelToken, ObjectKey};
//! use registrar_store::{InMemoryStore, ObjectStore, WatchSource};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::<MyKind>::new();
//!     let mut sub = store.watch().unwrap();
//!
//!     store.create(resource).await.unwrap();
//!     let event = sub.recv().await.unwrap();
//!
//!     let fetched = store.get(event.key().unwrap(), &CancelToken::never()).await;
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod error;
pub mod event;
pub mod manifest;
pub mod store;

// Re-export main types
pub use bus::{WatchBus, WatchSource, WatchSubscription};
pub use error::{Result, StoreError};
pub use event::WatchEvent;
pub use manifest::{Manifest, parse_manifests};
pub use store::{Fetched, InMemoryStore, ObjectStore, TracingStore};
