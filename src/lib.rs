//! Assistant Operator Library
//!
//! Reconciliation engine for the `AssistantConfig` resource.
//! Unit tests live in the module files; integration tests under `tests/` run
//! against the in-memory store.
//!
//! ## Quick Start
//!
//! ```rust
//! use assistant_operator::prelude::*;
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
pub mod store;
