//! # Custom Resource Definitions
//!
//! CRD types for the assistant operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `AssistantConfig` specification and default values
//! - `status.rs` - Conditions and pod diagnostics
//! - `workload.rs` - Managed workload identifiers and the active-backend alias

mod spec;
mod status;
mod workload;

pub use spec::{
    default_log_level, default_max_connections, default_replicas, default_shared_buffers,
    default_true, ApiBackend, ApiSpec, AssistantConfig, AssistantConfigSpec, CacheSpec,
    CacheType, ConsoleSpec, LlmSpec, LocalObjectReference, ModelSpec, PostgresSpec,
    ProviderSpec, ResourceSpec, StorageSpec, TlsConfig,
};
pub use status::{
    AssistantConfigStatus, Condition, ConditionType, DiagnosticType, OverallStatus,
    PodDiagnostic,
};
pub use workload::{UnknownWorkload, Workload, WorkloadRef};
