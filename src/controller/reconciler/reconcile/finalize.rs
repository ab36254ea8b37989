//! # Finalizer Lifecycle
//!
//! Adds the operator finalizer before anything is created and removes it
//! once teardown has finished (or given up).

use crate::config::WatcherConfig;
use crate::constants::{FINALIZER, SINGLETON_NAME};
use crate::controller::reconciler::teardown::teardown;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::AssistantConfig;
use crate::store::StoreError;
use kube_runtime::controller::Action;
use tracing::{info, warn};

#[must_use]
pub fn has_finalizer(config: &AssistantConfig) -> bool {
    config
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == FINALIZER))
}

pub async fn add_finalizer(
    ctx: &Reconciler,
    config: &AssistantConfig,
) -> Result<(), StoreError> {
    let mut updated = config.clone();
    updated
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(FINALIZER.to_string());
    ctx.store.replace(&updated).await?;
    info!(finalizer = FINALIZER, "Added finalizer");
    Ok(())
}

/// Tear down owned resources and release the `AssistantConfig`.
pub async fn finalize(
    ctx: &Reconciler,
    config: &AssistantConfig,
) -> Result<Action, ReconcilerError> {
    if !has_finalizer(config) {
        return Ok(Action::await_change());
    }
    info!("🗑️  AssistantConfig marked for deletion, tearing down");

    if let Some(uid) = config.metadata.uid.as_deref() {
        let outcome = teardown(
            &ctx.store,
            ctx.namespace(),
            uid,
            ctx.config.teardown_timeout(),
            ctx.config.teardown_poll_interval(),
        )
        .await;
        if outcome.timed_out || !outcome.unlisted.is_empty() {
            warn!(
                remaining = outcome.remaining,
                unlisted = ?outcome.unlisted,
                "Removing finalizer with owned resources possibly still present"
            );
        }
    }

    // The copy handed to reconcile is stale after a long teardown
    let Some(mut fresh) = ctx.store.get::<AssistantConfig>(None, SINGLETON_NAME).await? else {
        return Ok(Action::await_change());
    };
    if let Some(finalizers) = fresh.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != FINALIZER);
    }
    match ctx.store.replace(&fresh).await {
        Ok(_) => info!(finalizer = FINALIZER, "✅ Finalizer removed"),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    // Nothing is referenced any more; keep only system resources routed
    let mut watcher_config = ctx.watcher_config.write().await;
    *watcher_config = WatcherConfig::new(watcher_config.system.clone());
    Ok(Action::await_change())
}
