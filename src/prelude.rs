//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! This brings into scope:
//! - All CRD types (`AssistantConfig`, `Workload`, conditions, etc.)
//! - Reconciler types (`Reconciler`, `ReconcilerError`, `reconcile`)
//! - Config types (`ControllerConfig`, `WatcherConfig`)
//! - The store seam (`Store`, `ObjectStore`, `InMemoryStore`)

pub use crate::crd::*;

pub use crate::controller::reconciler::{reconcile, BackoffState, Reconciler, ReconcilerError};

pub use crate::controller::watch_filter::{Decision, IgnoreReason, WatchFilter};

pub use crate::config::{
    ControllerConfig, SharedWatcherConfig, SystemResources, WatcherConfig,
};

pub use crate::store::{InMemoryStore, ObjectStore, Store, StoreError};
