//! # Reconciler
//!
//! Core reconciliation logic for the `AssistantConfig` singleton.
//!
//! The reconciler:
//! - Manages the operator finalizer and tears down owned resources on deletion
//! - Validates and marks referenced Secrets/ConfigMaps for the watch filter
//! - Drives the component adapters in two phases
//! - Aggregates workload health into one status write per pass
//!
//! ## Module Structure
//!
//! - `reconcile/` - the pass itself, phases and finalizer lifecycle
//! - `infrastructure.rs` - operator NetworkPolicy and ServiceMonitor
//! - `references.rs` - external reference validation and annotation
//! - `status/` - diagnostics, condition merge, status writer
//! - `teardown.rs` - owned resource enumeration and bounded deletion
//! - `types.rs` - error type, backoff state, shared context

pub mod infrastructure;
pub mod reconcile;
pub mod references;
pub mod status;
pub mod teardown;
pub mod types;

pub use reconcile::reconcile;
pub use types::{BackoffState, Reconciler, ReconcilerError};
