//! # Assistant Operator
//!
//! A Kubernetes operator that reconciles the assistant service stack from a
//! single cluster-scoped `AssistantConfig` named `cluster`.
//!
//! ## Overview
//!
//! 1. **Validates references** - provider credentials, TLS and CA bundles must exist and be well formed
//! 2. **Marks watched objects** - referenced Secrets/ConfigMaps get the watcher annotation
//! 3. **Reconciles components** - console plugin, conversation cache and the active API backend
//! 4. **Aggregates status** - one condition per workload plus pod diagnostics
//! 5. **Tears down on deletion** - every owned object is removed before the finalizer is released
//!
//! Changes to marked or system Secrets/ConfigMaps restart the affected
//! workloads directly without a full reconcile.

use anyhow::Result;
use assistant_operator::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.client, init.configs, init.reconciler, init.server_state).await
}
