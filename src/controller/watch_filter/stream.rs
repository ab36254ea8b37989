//! # Watch Streams
//!
//! Cluster-wide Secret and ConfigMap watches feeding the [`WatchFilter`].
//!
//! kube's `watcher` reports objects, not transitions, so each stream keeps a
//! payload digest per object: the initial listing only seeds digests, an
//! `Apply` for an unseen object is a create, and an `Apply` for a seen one is
//! an update carrying the previous digest. Later relists (after a watch
//! restart) report what was missed: unseen objects as creates, changed ones
//! as updates.

use super::handler::{Decision, WatchFilter, WatchedResource};
use super::object_key;
use crate::config::ObjectKey;
use futures::{pin_mut, StreamExt};
use kube::{Api, Client, Resource};
use kube_runtime::watcher;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{info, warn, Instrument};

/// Change notification derived from the watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Created(K),
    Updated { previous_digest: String, object: K },
    Deleted(K),
}

/// Last seen payload digest per object
#[derive(Debug, Default)]
pub struct ObjectSnapshots {
    digests: HashMap<ObjectKey, String>,
    relisted: Option<HashSet<ObjectKey>>,
    /// Set once the first listing completed
    primed: bool,
}

impl ObjectSnapshots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// A (re)list started.
    pub fn begin_relist(&mut self) {
        self.relisted = Some(HashSet::new());
    }

    /// Object from a (re)list: seeds its digest on the first listing, or
    /// reports the create or change missed while the watch was down.
    pub fn relist<K: WatchedResource>(&mut self, object: K) -> Option<WatchEvent<K>> {
        let key = object_key(object.meta());
        if let Some(seen) = self.relisted.as_mut() {
            seen.insert(key.clone());
        }
        let digest = object.payload_digest();
        match self.digests.insert(key, digest.clone()) {
            Some(previous) if previous != digest => Some(WatchEvent::Updated {
                previous_digest: previous,
                object,
            }),
            None if self.primed => Some(WatchEvent::Created(object)),
            _ => None,
        }
    }

    /// The (re)list finished; forget objects that vanished meanwhile.
    pub fn end_relist(&mut self) {
        if let Some(seen) = self.relisted.take() {
            self.digests.retain(|key, _| seen.contains(key));
        }
        self.primed = true;
    }

    pub fn apply<K: WatchedResource>(&mut self, object: K) -> WatchEvent<K> {
        let key = object_key(object.meta());
        match self.digests.insert(key, object.payload_digest()) {
            Some(previous_digest) => WatchEvent::Updated {
                previous_digest,
                object,
            },
            None => WatchEvent::Created(object),
        }
    }

    pub fn delete<K: WatchedResource>(&mut self, object: K) -> WatchEvent<K> {
        self.digests.remove(&object_key(object.meta()));
        WatchEvent::Deleted(object)
    }
}

impl WatchFilter {
    /// Route one derived event to its handler.
    pub async fn dispatch<K: WatchedResource>(&self, event: WatchEvent<K>) -> Decision {
        match event {
            WatchEvent::Created(object) => self.on_create(&object).await,
            WatchEvent::Updated {
                previous_digest,
                object,
            } => self.on_update(&previous_digest, &object).await,
            WatchEvent::Deleted(object) => self.on_delete(&object),
        }
    }
}

/// Spawn the Secret and ConfigMap watch tasks.
pub fn start_watch_filter(client: Client, filter: WatchFilter, restart_delay: Duration) {
    tokio::spawn(watch_kind::<k8s_openapi::api::core::v1::Secret>(
        client.clone(),
        filter.clone(),
        restart_delay,
    ));
    tokio::spawn(watch_kind::<k8s_openapi::api::core::v1::ConfigMap>(
        client,
        filter,
        restart_delay,
    ));
}

async fn watch_kind<K: WatchedResource + 'static>(
    client: Client,
    filter: WatchFilter,
    restart_delay: Duration,
) {
    let kind = K::KIND.as_str();
    let mut snapshots = ObjectSnapshots::new();
    loop {
        info!(kind, "Starting watch filter stream across all namespaces");
        let api: Api<K> = Api::all(client.clone());
        let stream = watcher(api, watcher::Config::default());
        pin_mut!(stream);

        while let Some(event_result) = stream.next().await {
            let derived = match event_result {
                Ok(watcher::Event::Init) => {
                    snapshots.begin_relist();
                    None
                }
                Ok(watcher::Event::InitApply(object)) => snapshots.relist(object),
                Ok(watcher::Event::InitDone) => {
                    snapshots.end_relist();
                    None
                }
                Ok(watcher::Event::Apply(object)) => Some(snapshots.apply(object)),
                Ok(watcher::Event::Delete(object)) => Some(snapshots.delete(object)),
                Err(e) => {
                    // The watcher recovers on the next poll
                    warn!(kind, error = %e, "Error watching resources");
                    None
                }
            };
            let Some(event) = derived else {
                continue;
            };
            let span = tracing::span!(
                tracing::Level::INFO,
                "watch_filter.event",
                resource.kind = kind,
                resource.name = %event_name(&event)
            );
            filter.dispatch(event).instrument(span).await;
        }

        warn!(kind, tracked = snapshots.len(), "Watch filter stream ended, restarting");
        tokio::time::sleep(restart_delay).await;
    }
}

fn event_name<K: Resource>(event: &WatchEvent<K>) -> String {
    let object = match event {
        WatchEvent::Created(o) | WatchEvent::Deleted(o) => o,
        WatchEvent::Updated { object, .. } => object,
    };
    let meta = object.meta();
    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
            ..ConfigMap::default()
        }
    }

    #[test]
    fn test_initial_listing_only_seeds() {
        let mut snapshots = ObjectSnapshots::new();
        snapshots.begin_relist();
        assert!(snapshots.relist(config_map("a", "1")).is_none());
        snapshots.end_relist();
        assert_eq!(snapshots.len(), 1);
    }

    #[test]
    fn test_apply_distinguishes_create_and_update() {
        let mut snapshots = ObjectSnapshots::new();
        assert!(matches!(
            snapshots.apply(config_map("a", "1")),
            WatchEvent::Created(_)
        ));
        let first_digest = config_map("a", "1").payload_digest();
        match snapshots.apply(config_map("a", "2")) {
            WatchEvent::Updated { previous_digest, .. } => assert_eq!(previous_digest, first_digest),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_then_apply_is_a_create() {
        let mut snapshots = ObjectSnapshots::new();
        snapshots.apply(config_map("a", "1"));
        snapshots.delete(config_map("a", "1"));
        assert!(matches!(
            snapshots.apply(config_map("a", "1")),
            WatchEvent::Created(_)
        ));
    }

    #[test]
    fn test_relist_reports_missed_change_and_prunes_vanished() {
        let mut snapshots = ObjectSnapshots::new();
        snapshots.apply(config_map("a", "1"));
        snapshots.apply(config_map("gone", "1"));

        snapshots.begin_relist();
        let missed = snapshots.relist(config_map("a", "2"));
        snapshots.end_relist();

        assert!(matches!(missed, Some(WatchEvent::Updated { .. })));
        assert_eq!(snapshots.len(), 1);
    }

    #[test]
    fn test_object_first_seen_on_later_relist_is_a_create() {
        let mut snapshots = ObjectSnapshots::new();
        snapshots.begin_relist();
        snapshots.relist(config_map("a", "1"));
        snapshots.end_relist();

        snapshots.begin_relist();
        assert!(snapshots.relist(config_map("a", "1")).is_none());
        let created = snapshots.relist(config_map("b", "1"));
        snapshots.end_relist();

        assert!(matches!(created, Some(WatchEvent::Created(_))));
        assert_eq!(snapshots.len(), 2);
    }
}
