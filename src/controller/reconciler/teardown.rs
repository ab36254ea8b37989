//! # Teardown
//!
//! Deletes everything owned by the `AssistantConfig` and waits, bounded, for
//! it to disappear. Ownership is decided by owner reference UID only.
//!
//! 1. Run adapter deactivation hooks (failures are logged, not fatal)
//! 2. Enumerate owned objects once, grouped by kind
//! 3. Delete each one; already-gone objects count as deleted
//! 4. Re-enumerate at a fixed interval until nothing is left or the timeout elapses
//!
//! A kind that cannot be listed (RBAC, API outage) is logged and skipped, so
//! teardown always returns and the finalizer can be released.

use crate::controller::adapters::Adapter;
use crate::observability::metrics;
use crate::store::{api_resource, is_owned_by, resources, Store, StoreError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::ApiResource;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};

/// Kinds the operator creates and therefore cleans up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnedKind {
    Deployment,
    Service,
    ServiceAccount,
    ConfigMap,
    Secret,
    PersistentVolumeClaim,
    NetworkPolicy,
    ServiceMonitor,
    ConsolePlugin,
}

impl OwnedKind {
    pub const ALL: [OwnedKind; 9] = [
        OwnedKind::Deployment,
        OwnedKind::Service,
        OwnedKind::ServiceAccount,
        OwnedKind::ConfigMap,
        OwnedKind::Secret,
        OwnedKind::PersistentVolumeClaim,
        OwnedKind::NetworkPolicy,
        OwnedKind::ServiceMonitor,
        OwnedKind::ConsolePlugin,
    ];

    #[must_use]
    pub fn api_resource(self) -> ApiResource {
        match self {
            OwnedKind::Deployment => api_resource::<Deployment>(),
            OwnedKind::Service => api_resource::<Service>(),
            OwnedKind::ServiceAccount => api_resource::<ServiceAccount>(),
            OwnedKind::ConfigMap => api_resource::<ConfigMap>(),
            OwnedKind::Secret => api_resource::<Secret>(),
            OwnedKind::PersistentVolumeClaim => api_resource::<PersistentVolumeClaim>(),
            OwnedKind::NetworkPolicy => api_resource::<NetworkPolicy>(),
            OwnedKind::ServiceMonitor => resources::service_monitor(),
            OwnedKind::ConsolePlugin => resources::console_plugin(),
        }
    }

    #[must_use]
    pub fn is_namespaced(self) -> bool {
        self != OwnedKind::ConsolePlugin
    }
}

/// Names of owned objects, keyed by kind
pub type ResourceGroups = BTreeMap<OwnedKind, Vec<String>>;

#[must_use]
pub fn count(groups: &ResourceGroups) -> usize {
    groups.values().map(Vec::len).sum()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownOutcome {
    pub deleted: usize,
    /// Owned objects still present when teardown gave up
    pub remaining: usize,
    pub timed_out: bool,
    /// Kinds whose listing failed on the last enumeration
    pub unlisted: Vec<OwnedKind>,
}

async fn list_owned(
    store: &Store,
    namespace: &str,
    owner_uid: &str,
    kind: OwnedKind,
) -> Result<Vec<String>, StoreError> {
    let scope = kind.is_namespaced().then_some(namespace);
    Ok(store
        .list_dynamic(&kind.api_resource(), scope)
        .await?
        .into_iter()
        .filter(|o| is_owned_by(&o.metadata, owner_uid))
        .filter_map(|o| o.metadata.name)
        .collect())
}

/// Every object in `namespace` (cluster-wide for cluster-scoped kinds) owned by `owner_uid`.
pub async fn enumerate_owned(
    store: &Store,
    namespace: &str,
    owner_uid: &str,
) -> Result<ResourceGroups, StoreError> {
    let mut groups = ResourceGroups::new();
    for kind in OwnedKind::ALL {
        let names = list_owned(store, namespace, owner_uid, kind).await?;
        if !names.is_empty() {
            groups.insert(kind, names);
        }
    }
    Ok(groups)
}

/// Like [`enumerate_owned`], but a kind that fails to list is logged and
/// returned separately instead of aborting the enumeration.
async fn enumerate_listable(
    store: &Store,
    namespace: &str,
    owner_uid: &str,
) -> (ResourceGroups, Vec<OwnedKind>) {
    let mut groups = ResourceGroups::new();
    let mut unlisted = Vec::new();
    for kind in OwnedKind::ALL {
        match list_owned(store, namespace, owner_uid, kind).await {
            Ok(names) if names.is_empty() => {}
            Ok(names) => {
                groups.insert(kind, names);
            }
            Err(e) => {
                warn!(kind = ?kind, error = %e, "Cannot list owned kind, skipping it");
                unlisted.push(kind);
            }
        }
    }
    (groups, unlisted)
}

async fn run_deactivation_hooks(store: &Store) {
    for adapter in Adapter::with_deactivation_hooks() {
        if let Err(e) = adapter.deactivate(store).await {
            warn!(workload = %adapter.workload(), error = %e, "Deactivation hook failed, continuing teardown");
        }
    }
}

async fn delete_all(store: &Store, namespace: &str, groups: &ResourceGroups) -> usize {
    let mut deleted = 0;
    for (kind, names) in groups {
        let scope = kind.is_namespaced().then_some(namespace);
        for name in names {
            match store.delete_dynamic(&kind.api_resource(), scope, name).await {
                Ok(_) => {
                    debug!(kind = ?kind, name, "Deleted owned object");
                    deleted += 1;
                }
                Err(e) => error!(kind = ?kind, name, error = %e, "Failed to delete owned object"),
            }
        }
    }
    deleted
}

/// Tear down everything owned by `owner_uid`, waiting at most `timeout`.
///
/// Never fails: a timeout or an unlistable kind is logged, counted, and
/// reported in the outcome.
pub async fn teardown(
    store: &Store,
    namespace: &str,
    owner_uid: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> TeardownOutcome {
    let span = tracing::span!(tracing::Level::INFO, "controller.teardown", owner.uid = owner_uid);
    async move {
        let start = Instant::now();
        run_deactivation_hooks(store).await;

        let (groups, mut unlisted) = enumerate_listable(store, namespace, owner_uid).await;
        info!(objects = count(&groups), "🧹 Deleting owned resources");
        let deleted = delete_all(store, namespace, &groups).await;

        let mut remaining = count(&groups);
        let wait = async {
            loop {
                let (current, failed) = enumerate_listable(store, namespace, owner_uid).await;
                remaining = count(&current);
                unlisted = failed;
                if remaining == 0 {
                    return;
                }
                debug!(remaining, "Waiting for owned resources to disappear");
                tokio::time::sleep(poll_interval).await;
            }
        };
        let timed_out = tokio::time::timeout(timeout, wait).await.is_err();

        metrics::observe_teardown_duration(start.elapsed().as_secs_f64());
        if timed_out {
            metrics::increment_teardown_timeouts();
            warn!(
                remaining,
                timeout_secs = timeout.as_secs(),
                "⏱️  Timed out waiting for owned resources to be deleted, proceeding"
            );
        } else if unlisted.is_empty() {
            info!(deleted, "✅ All owned resources deleted");
        } else {
            warn!(deleted, unlisted = ?unlisted, "Owned resources deleted except for kinds that could not be listed");
        }
        TeardownOutcome {
            deleted,
            remaining,
            timed_out,
            unlisted,
        }
    }
    .instrument(span)
    .await
}
