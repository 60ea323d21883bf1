//! Core types for registrar.
//!
//! - **Identity**: [`ObjectKey`] and [`ObjectMeta`]
//! - **Kinds**: the [`Kind`] trait binding a spec schema to a status schema
//! - **Cancellation**: [`CancelToken`] passed into every blocking call
//! - **Config files**: format-aware loading in [`config`]

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod types;

pub use cancel::{CancelHandle, CancelReason, CancelToken};
pub use error::{Error, Result};
pub use types::{DEFAULT_NAMESPACE, Kind, ObjectKey, ObjectMeta, Resource, Uid};
