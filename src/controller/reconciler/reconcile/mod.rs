//! # Reconciliation Logic
//!
//! One pass over the `AssistantConfig` singleton:
//!
//! 1. Ignore any other name; a missing object is already finalized
//! 2. Deletion → teardown, then release the finalizer
//! 3. No finalizer yet → add it and stop
//! 4. Shared infrastructure (operator NetworkPolicy, ServiceMonitor)
//! 5. Validate and annotate referenced Secrets/ConfigMaps, rebuild the watch routing
//! 6. Phase 1: every adapter's supporting objects; any failure stops the pass
//! 7. Phase 2: Deployments in order console → cache → API backend, classified
//! 8. One status write, then requeue or surface not-ready workloads as an error

mod finalize;
mod phases;

pub use finalize::{add_finalizer, finalize, has_finalizer};
pub use phases::{
    ensure_deployments, ensure_resources, resources_failed_status, validation_failed_status,
    DeploymentPhase, REASON_DEPLOYMENT_FAILED, REASON_RECONCILED, REASON_RESOURCES_FAILED,
    REASON_STATUS_CHECK_FAILED, REASON_VALIDATION_FAILED,
};

use crate::constants::SINGLETON_NAME;
use crate::controller::adapters::{Adapter, AdapterContext};
use crate::controller::reconciler::infrastructure::ensure_infrastructure;
use crate::controller::reconciler::references::{
    annotate_all, external_references, rebuild_watcher_config, validate_references,
};
use crate::controller::reconciler::status::{write_status, StatusUpdate};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::AssistantConfig;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::{Arc, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Main reconciliation function
/// Errors are turned into backoff-spaced retries by the error policy
pub async fn reconcile(
    config: Arc<AssistantConfig>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = config.name_any();
    if name != SINGLETON_NAME {
        debug!(resource.name = %name, "Ignoring AssistantConfig that is not the singleton");
        return Ok(Action::await_change());
    }
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.reconcile",
        resource.name = %name,
        resource.kind = "AssistantConfig"
    );
    reconcile_singleton(&ctx).instrument(span).await
}

async fn reconcile_singleton(ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    metrics::increment_reconciliations();

    // The triggering copy may be stale; decide on what is stored now
    let Some(config) = ctx
        .store
        .get::<AssistantConfig>(None, SINGLETON_NAME)
        .await?
    else {
        debug!("AssistantConfig not found, nothing to reconcile");
        return Ok(Action::await_change());
    };

    if config.metadata.deletion_timestamp.is_some() {
        return finalize(ctx, &config).await;
    }
    if !has_finalizer(&config) {
        add_finalizer(ctx, &config).await?;
        return Ok(Action::await_change());
    }

    info!(generation = ?config.metadata.generation, "🔄 Reconciling AssistantConfig");
    let generation = config.metadata.generation;
    let adapter_ctx = AdapterContext::new(
        ctx.store.clone(),
        ctx.namespace(),
        &config,
        ctx.config.images.clone(),
    )?;

    ensure_infrastructure(
        &adapter_ctx,
        ctx.config.metrics_port,
        ctx.config.enable_service_monitor,
    )
    .await?;

    // Rebuilt before validation so routing follows the current references
    // even on a pass that stops at validation
    let references = external_references(&config);
    {
        let mut watcher_config = ctx.watcher_config.write().await;
        let rebuilt = rebuild_watcher_config(&watcher_config, &config, ctx.namespace(), &references);
        *watcher_config = rebuilt;
    }
    if let Err(problems) = validate_references(&ctx.store, ctx.namespace(), &references).await? {
        warn!(error = %problems, "Referenced resources failed validation");
        write_status(
            &ctx.store,
            SINGLETON_NAME,
            &validation_failed_status(problems.to_string(), generation),
        )
        .await?;
        return Err(problems.into());
    }
    if let Err(failures) = annotate_all(&ctx.store, ctx.namespace(), &references).await {
        return Err(anyhow::anyhow!(failures.join("; ")).into());
    }

    let adapters = Adapter::for_spec(&config.spec);
    let failures = ensure_resources(&adapter_ctx, &config, &adapters).await;
    if !failures.is_empty() {
        write_status(
            &ctx.store,
            SINGLETON_NAME,
            &resources_failed_status(&failures, generation),
        )
        .await?;
        return Err(ReconcilerError::ComponentResources(
            failures
                .into_iter()
                .map(|(adapter, message)| format!("{}: {message}", adapter.workload()))
                .collect(),
        ));
    }

    let DeploymentPhase {
        status,
        not_ready,
        ready,
    } = ensure_deployments(&adapter_ctx, &config, &adapters).await;
    persist(ctx, &status).await?;
    metrics::set_workloads_ready(i64::try_from(ready).unwrap_or(i64::MAX));
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    let has_diagnostics = status.diagnostics.as_ref().is_some_and(|d| !d.is_empty());
    if !not_ready.is_empty() || has_diagnostics {
        return Err(ReconcilerError::WorkloadsNotReady(not_ready));
    }

    reset_backoff(ctx);
    let requeue = ctx.config.reconcile_interval();
    info!(
        "📅 Next scheduled reconciliation in {}s",
        requeue.as_secs()
    );
    metrics::increment_requeues_total("timer-based");
    Ok(Action::requeue(requeue))
}

async fn persist(ctx: &Reconciler, status: &StatusUpdate) -> Result<(), ReconcilerError> {
    let outcome = write_status(&ctx.store, SINGLETON_NAME, status).await?;
    debug!(?outcome, "Status persisted");
    Ok(())
}

fn reset_backoff(ctx: &Reconciler) {
    let mut states = ctx
        .backoff_states
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(state) = states.get_mut(SINGLETON_NAME) {
        if state.error_count > 0 {
            info!(
                "🔄 Backoff reset after {} consecutive errors",
                state.error_count
            );
        }
        state.reset();
    }
}
