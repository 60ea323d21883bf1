//! Level-triggered status reconciliation.
//!
//! A [`Reconciler`] brings one object's status in line with its spec:
//!
//! 1. Fetch the object; a missing object is treated as deleted.
//! 2. Derive the status its spec implies ([`Reconcilable::derive_status`]).
//!    A spec with nothing to derive from leaves the status untouched.
//! 3. Compare with the persisted status and write only on a difference,
//!    conditional on the `resource_version` that was read.
//!
//! A [`Controller`] feeds it from a [`WatchSource`](registrar_store::WatchSource)
//! through a [`WorkQueue`] that coalesces events per key, keeps one reconcile
//! in flight per key and retries failures with exponential backoff.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use registrar_core::{ObjectKey, Resource};
//! use registrar_reconciler::{Controller, LoopConfig, Reconciler};
//! use registrar_reconciler::kinds::{Student, StudentSpec};
//! use registrar_store::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = InMemoryStore::<Student>::new_arc();
//!     let alice = StudentSpec::new("Alice", [4, 5]);
//!     store
//!         .create(Resource::new(&ObjectKey::in_default("alice"), alice))
//!         .await?;
//!
//!     let reconciler = Reconciler::<Student>::builder()
//!         .with_store(store.clone())
//!         .build()?;
//!     let reconciler = Arc::new(reconciler);
//!     let controller = Controller::register(reconciler, store, LoopConfig::default()).await?;
//!     let stopper = controller.stopper();
//!
//!     tokio::spawn(controller.run());
//!     // ... later
//!     stopper.stop();
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod backoff;
pub mod config;
pub mod controller;
pub mod derive;
pub mod error;
pub mod kinds;
pub mod queue;
pub mod reconciler;
pub mod types;

// Re-export main types
pub use backoff::{BackoffPolicy, FailureTracker};
pub use config::ControllerConfig;
pub use controller::{Controller, LoopConfig, LoopStats, LoopStopper, MAX_RECONCILE_TIMEOUT};
pub use derive::{Derivation, Reconcilable};
pub use error::{Error, Result};
pub use queue::WorkQueue;
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use types::{Action, Outcome, ReconcileRequest, Reconciled};
