//! # Configuration
//!
//! - `controller.rs` - process settings from environment variables
//! - `watcher.rs` - routing of external Secret/ConfigMap changes to workloads

mod controller;
mod watcher;

pub use controller::{ControllerConfig, ImageSet};
pub use watcher::{
    ObjectKey, SharedWatcherConfig, SystemResource, SystemResources, WatchedKind, WatcherConfig,
    WatcherConfigError,
};
