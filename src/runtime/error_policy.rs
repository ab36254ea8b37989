//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::AssistantConfig;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource name and reset by the next successful pass.
pub fn handle_reconciliation_error(
    obj: Arc<AssistantConfig>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = %name,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {}", name, error);
    observability::metrics::increment_reconciliation_errors();

    let (backoff, error_count) = next_backoff(&ctx, &name);
    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());

    info!(
        "🔄 Retrying with Fibonacci backoff: {}ms (error count: {}, trigger source: error-backoff)",
        backoff.as_millis(),
        error_count
    );
    info!(
        "📅 Next retry scheduled: {} (trigger source: error-backoff)",
        next_trigger_time.to_rfc3339()
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(backoff)
}

/// Advance the resource's backoff and return the delay with the error count
pub fn next_backoff(ctx: &Reconciler, name: &str) -> (Duration, u32) {
    let mut states = ctx
        .backoff_states
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let state = states
        .entry(name.to_string())
        .or_insert_with(|| BackoffState::new(&ctx.config));
    state.increment_error();
    (state.backoff.next_backoff(), state.error_count)
}

/// Watch stream error classes with distinct handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    NotFound,
    Expired,
    TooManyRequests,
    Other,
}

impl WatchErrorKind {
    /// 404 is checked before 401 because a plain-text 404 body surfaces as a
    /// decode error mentioning "WatchFailed".
    #[must_use]
    pub fn classify(error_string: &str) -> Self {
        let is_not_found = error_string.contains("ObjectNotFound")
            || error_string.contains("404")
            || error_string.contains("not found");
        if is_not_found {
            return Self::NotFound;
        }
        if error_string.contains("401") || error_string.contains("Unauthorized") {
            return Self::Unauthorized;
        }
        if error_string.contains("410")
            || error_string.contains("too old resource version")
            || error_string.contains("Expired")
            || error_string.contains("Gone")
        {
            return Self::Expired;
        }
        if error_string.contains("429")
            || error_string.contains("storage is (re)initializing")
            || error_string.contains("TooManyRequests")
        {
            return Self::TooManyRequests;
        }
        Self::Other
    }
}

/// Handle a controller stream error
///
/// Returns `false` when the watch should be restarted after the delay this
/// function has already waited, `true` to keep consuming the stream.
pub async fn handle_watch_stream_error(error_string: String, restart_delay: Duration) -> bool {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    async move {
        match WatchErrorKind::classify(&error_string) {
            WatchErrorKind::Unauthorized => {
                error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
                error!("🔍 Verify the assistant-operator ClusterRole, ClusterRoleBinding and ServiceAccount still exist");
                warn!(
                    "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                    restart_delay.as_secs()
                );
                tokio::time::sleep(restart_delay).await;
                false
            }
            WatchErrorKind::Expired => {
                warn!("Watch resource version expired (410), watch will restart");
                false
            }
            WatchErrorKind::TooManyRequests => {
                warn!(
                    "API server storage reinitializing (429), backing off for {}s before restart...",
                    restart_delay.as_secs()
                );
                tokio::time::sleep(restart_delay).await;
                false
            }
            WatchErrorKind::NotFound => {
                warn!(
                    "Resource not found (404) - normal if an owned object was deleted, otherwise check the AssistantConfig CRD is installed. Error: {}",
                    error_string
                );
                true
            }
            WatchErrorKind::Other => {
                error!("Controller stream error: {}", error_string);
                tokio::time::sleep(restart_delay).await;
                false
            }
        }
    }
    .instrument(error_span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControllerConfig, SystemResources, WatcherConfig};
    use crate::store::{InMemoryStore, Store};
    use tokio::sync::RwLock;

    fn reconciler() -> Reconciler {
        let config = ControllerConfig {
            backoff_start_ms: 1_000,
            backoff_max_ms: 4_000,
            ..ControllerConfig::default()
        };
        Reconciler::new(
            Store::new(Arc::new(InMemoryStore::new())),
            config,
            Arc::new(RwLock::new(WatcherConfig::new(SystemResources::default()))),
        )
    }

    #[test]
    fn test_backoff_grows_per_resource_and_caps() {
        let ctx = reconciler();
        let delays: Vec<u64> = (0..6)
            .map(|_| next_backoff(&ctx, "cluster").0.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 1, 2, 3, 4, 4]);
        assert_eq!(next_backoff(&ctx, "other"), (Duration::from_secs(1), 1));
    }

    #[test]
    fn test_classify_prefers_not_found_over_unauthorized() {
        assert_eq!(
            WatchErrorKind::classify("WatchFailed: invalid type: integer `404`"),
            WatchErrorKind::NotFound
        );
        assert_eq!(
            WatchErrorKind::classify("ApiError: Unauthorized (401)"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            WatchErrorKind::classify("too old resource version: 12 (34)"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            WatchErrorKind::classify("storage is (re)initializing"),
            WatchErrorKind::TooManyRequests
        );
        assert_eq!(WatchErrorKind::classify("connection reset"), WatchErrorKind::Other);
    }
}
