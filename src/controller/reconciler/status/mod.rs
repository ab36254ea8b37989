//! # Status Aggregation
//!
//! Turns workload health into the `AssistantConfig` status document.
//!
//! - `diagnostics.rs` - per-workload classification and pod diagnostics
//! - `conditions.rs` - merging a computed status onto the persisted one
//! - `writer.rs` - conflict-safe persistence

mod conditions;
mod diagnostics;
mod writer;

pub use conditions::{merge_conditions, merge_diagnostics, StatusUpdate};
pub use diagnostics::{
    check_workload, classify, pod_selector, WorkloadAssessment, WorkloadHealth,
    REASON_AVAILABLE, REASON_NOT_FOUND, REASON_POD_FAILURE, REASON_PROGRESSING,
};
pub use writer::{write_status, StatusWrite};
