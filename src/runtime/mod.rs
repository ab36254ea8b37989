//! # Runtime
//!
//! Process wiring for the operator binary.
//!
//! - `initialization.rs` - tracing, metrics, HTTP server, client and watch filter startup
//! - `watch_loop.rs` - the `AssistantConfig` controller loop
//! - `error_policy.rs` - per-resource backoff and watch stream error classification

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
