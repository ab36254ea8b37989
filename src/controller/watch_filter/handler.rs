//! Create/update/delete handling for watched Secrets and ConfigMaps.

use super::{classify, has_marker, MatchSource, Relevance};
use crate::config::{SharedWatcherConfig, WatchedKind};
use crate::constants::{SINGLETON_NAME, WATCHER_ANNOTATION};
use crate::controller::adapters;
use crate::controller::reconciler::references::{annotate, referenced_workloads};
use crate::crd::{AssistantConfig, Workload};
use crate::observability::metrics;
use crate::store::{Store, TypedObject};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::Resource;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Secret or ConfigMap as seen by the filter
pub trait WatchedResource: TypedObject + std::fmt::Debug {
    const KIND: WatchedKind;

    /// Hex SHA-256 over the fields whose change should restart workloads
    fn payload_digest(&self) -> String;
}

fn hash_entries<'a, V: AsRef<[u8]> + 'a>(
    hasher: &mut Sha256,
    section: &str,
    entries: Option<&'a BTreeMap<String, V>>,
) {
    hasher.update(section.as_bytes());
    hasher.update([0u8]);
    for (key, value) in entries.into_iter().flatten() {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(AsRef::<[u8]>::as_ref(value));
        hasher.update([0u8]);
    }
}

impl WatchedResource for Secret {
    const KIND: WatchedKind = WatchedKind::Secret;

    fn payload_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.type_.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        let data: Option<BTreeMap<String, &[u8]>> = self
            .data
            .as_ref()
            .map(|d| d.iter().map(|(k, v)| (k.clone(), v.0.as_slice())).collect());
        hash_entries(&mut hasher, "data", data.as_ref());
        format!("{:x}", hasher.finalize())
    }
}

impl WatchedResource for ConfigMap {
    const KIND: WatchedKind = WatchedKind::ConfigMap;

    fn payload_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hash_entries(&mut hasher, "data", self.data.as_ref());
        let binary: Option<BTreeMap<String, &[u8]>> = self
            .binary_data
            .as_ref()
            .map(|d| d.iter().map(|(k, v)| (k.clone(), v.0.as_slice())).collect());
        hash_entries(&mut hasher, "binaryData", binary.as_ref());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotWatched,
    /// Owned by the `AssistantConfig`; reconciled, not restarted
    Owned,
    /// Marker present but the live `AssistantConfig` no longer references it
    Stale,
    /// No `AssistantConfig` to confirm the reference against
    NoDesiredState,
    PayloadUnchanged,
    Deleted,
    /// Marker could not be applied
    AnnotationFailed,
}

impl IgnoreReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::NotWatched => "not_watched",
            IgnoreReason::Owned => "owned",
            IgnoreReason::Stale => "stale_marker",
            IgnoreReason::NoDesiredState => "no_desired_state",
            IgnoreReason::PayloadUnchanged => "payload_unchanged",
            IgnoreReason::Deleted => "deleted",
            IgnoreReason::AnnotationFailed => "annotation_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Ignored(IgnoreReason),
    /// Workloads a restart was attempted for
    Restarted(Vec<Workload>),
}

impl Decision {
    fn outcome(&self) -> &'static str {
        match self {
            Decision::Ignored(reason) => reason.as_str(),
            Decision::Restarted(_) => "restarted",
        }
    }
}

/// Routes Secret/ConfigMap changes to workload restarts
#[derive(Debug, Clone)]
pub struct WatchFilter {
    store: Store,
    namespace: String,
    watcher_config: SharedWatcherConfig,
}

fn owned_by_desired_state<K: Resource>(object: &K) -> bool {
    object
        .meta()
        .owner_references
        .iter()
        .flatten()
        .any(|o| o.kind == AssistantConfig::kind(&()) && o.name == SINGLETON_NAME)
}

impl WatchFilter {
    pub fn new(store: Store, namespace: impl Into<String>, watcher_config: SharedWatcherConfig) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            watcher_config,
        }
    }

    async fn relevance<K: WatchedResource>(&self, object: &K) -> Relevance {
        let config = self.watcher_config.read().await;
        classify(K::KIND, object.meta(), &config)
    }

    /// A new object appeared (or reappeared after deletion).
    pub async fn on_create<K: WatchedResource>(&self, object: &K) -> Decision {
        let decision = self.handle_create(object).await;
        self.record(object, &decision);
        decision
    }

    async fn handle_create<K: WatchedResource>(&self, object: &K) -> Decision {
        if owned_by_desired_state(object) {
            return Decision::Ignored(IgnoreReason::Owned);
        }
        let meta = object.meta();
        let name = meta.name.as_deref().unwrap_or_default();
        let namespace = meta.namespace.as_deref().unwrap_or_default();

        if let Relevance::Relevant {
            workloads,
            source: MatchSource::SystemResource,
        } = self.relevance(object).await
        {
            if !has_marker(meta) {
                return self.restart_all(K::KIND, namespace, name, workloads).await;
            }
        }

        // Referenced objects live beside the workloads
        if namespace != self.namespace {
            return Decision::Ignored(IgnoreReason::NotWatched);
        }
        let desired = match self.store.get::<AssistantConfig>(None, SINGLETON_NAME).await {
            Ok(Some(desired)) => desired,
            Ok(None) => return Decision::Ignored(IgnoreReason::NoDesiredState),
            Err(e) => {
                warn!(kind = K::KIND.as_str(), namespace, name, error = %e, "Failed to read AssistantConfig");
                return Decision::Ignored(IgnoreReason::NoDesiredState);
            }
        };
        if referenced_workloads(&desired, K::KIND, name).is_none() {
            return if has_marker(meta) {
                Decision::Ignored(IgnoreReason::Stale)
            } else {
                Decision::Ignored(IgnoreReason::NotWatched)
            };
        }
        if !has_marker(meta) {
            if let Err(e) = annotate(&self.store, K::KIND, namespace, name).await {
                warn!(kind = K::KIND.as_str(), namespace, name, error = %e, "Failed to apply watcher annotation");
                return Decision::Ignored(IgnoreReason::AnnotationFailed);
            }
        }

        let mut marked = meta.clone();
        marked
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(WATCHER_ANNOTATION.to_string(), SINGLETON_NAME.to_string());
        let relevance = {
            let config = self.watcher_config.read().await;
            classify(K::KIND, &marked, &config)
        };
        match relevance {
            Relevance::Relevant { workloads, .. } => {
                self.restart_all(K::KIND, namespace, name, workloads).await
            }
            Relevance::Irrelevant => Decision::Ignored(IgnoreReason::NotWatched),
        }
    }

    /// An existing object changed; `previous_digest` is its payload before the change.
    pub async fn on_update<K: WatchedResource>(&self, previous_digest: &str, object: &K) -> Decision {
        let decision = self.handle_update(previous_digest, object).await;
        self.record(object, &decision);
        decision
    }

    async fn handle_update<K: WatchedResource>(&self, previous_digest: &str, object: &K) -> Decision {
        let Relevance::Relevant { workloads, .. } = self.relevance(object).await else {
            return Decision::Ignored(IgnoreReason::NotWatched);
        };
        if object.payload_digest() == previous_digest {
            return Decision::Ignored(IgnoreReason::PayloadUnchanged);
        }
        let meta = object.meta();
        self.restart_all(
            K::KIND,
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default(),
            workloads,
        )
        .await
    }

    /// Deletions are left to the next reconcile pass.
    pub fn on_delete<K: WatchedResource>(&self, object: &K) -> Decision {
        let decision = Decision::Ignored(IgnoreReason::Deleted);
        self.record(object, &decision);
        decision
    }

    async fn restart_all(
        &self,
        kind: WatchedKind,
        namespace: &str,
        name: &str,
        workloads: Vec<Workload>,
    ) -> Decision {
        info!(
            kind = kind.as_str(),
            namespace,
            name,
            workloads = ?workloads,
            "🔔 Watched resource changed, restarting affected workloads"
        );
        for workload in &workloads {
            match adapters::restart(&self.store, &self.namespace, *workload).await {
                Ok(true) => metrics::increment_workload_restarts(workload.deployment_name()),
                Ok(false) => debug!(workload = %workload, "Workload not deployed, nothing to restart"),
                Err(e) => warn!(
                    workload = %workload,
                    error = %e,
                    "Failed to restart workload, continuing with the rest"
                ),
            }
        }
        Decision::Restarted(workloads)
    }

    fn record<K: WatchedResource>(&self, object: &K, decision: &Decision) {
        metrics::increment_watch_filter_events(K::KIND.as_str(), decision.outcome());
        if let Decision::Ignored(reason) = decision {
            if *reason != IgnoreReason::NotWatched {
                debug!(
                    kind = K::KIND.as_str(),
                    name = object.meta().name.as_deref().unwrap_or_default(),
                    reason = reason.as_str(),
                    "Ignored watched resource event"
                );
            }
        }
    }
}
