//! # Watch Filter Tests
//!
//! Secret/ConfigMap create, update and delete handling against the in-memory store.

mod common;

use assistant_operator::config::{SystemResources, WatcherConfig};
use assistant_operator::constants::{
    APP_SERVER_DEPLOYMENT, FORCE_RELOAD_ANNOTATION, PULL_SECRET_NAME, PULL_SECRET_NAMESPACE,
    SINGLETON_NAME, WATCHER_ANNOTATION,
};
use assistant_operator::controller::watch_filter::{
    Decision, IgnoreReason, ObjectSnapshots, WatchEvent, WatchFilter, WatchedResource,
};
use assistant_operator::crd::Workload;
use assistant_operator::store::{InMemoryStore, Store, WriteVerb};
use common::*;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

fn filter(store: Store) -> WatchFilter {
    let watcher_config = Arc::new(RwLock::new(WatcherConfig::new(SystemResources::defaults(
        NAMESPACE,
    ))));
    WatchFilter::new(store, NAMESPACE, watcher_config)
}

fn seed_app_server(memory: &InMemoryStore) {
    memory
        .seed(&Deployment {
            metadata: ObjectMeta {
                name: Some(APP_SERVER_DEPLOYMENT.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec::default()),
            ..Deployment::default()
        })
        .unwrap();
}

fn marked(mut object: Secret) -> Secret {
    object
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(WATCHER_ANNOTATION.to_string(), SINGLETON_NAME.to_string());
    object
}

async fn restart_stamp(store: &Store) -> Option<String> {
    store
        .get::<Deployment>(Some(NAMESPACE), APP_SERVER_DEPLOYMENT)
        .await
        .unwrap()?
        .spec?
        .template
        .metadata?
        .annotations?
        .get(FORCE_RELOAD_ANNOTATION)
        .cloned()
}

#[tokio::test]
async fn test_unrelated_secret_is_ignored_without_writes() {
    let (memory, store) = memory_store();
    seed_default(&memory);
    seed_app_server(&memory);

    let decision = filter(store)
        .on_create(&secret(NAMESPACE, "someone-elses", &[("k", "v")]))
        .await;

    assert_eq!(decision, Decision::Ignored(IgnoreReason::NotWatched));
    assert_eq!(memory.write_count(), 0);
}

#[tokio::test]
async fn test_system_resource_change_restarts_active_backend() {
    let (memory, store) = memory_store();
    seed_app_server(&memory);
    let before = secret(PULL_SECRET_NAMESPACE, PULL_SECRET_NAME, &[(".dockerconfigjson", "{}")]);
    let after = secret(
        PULL_SECRET_NAMESPACE,
        PULL_SECRET_NAME,
        &[(".dockerconfigjson", r#"{"auths":{}}"#)],
    );

    let decision = filter(store.clone())
        .on_update(&before.payload_digest(), &after)
        .await;

    assert_eq!(decision, Decision::Restarted(vec![Workload::AppServer]));
    assert!(restart_stamp(&store).await.is_some());
}

#[tokio::test]
async fn test_metadata_only_update_is_ignored() {
    let (memory, store) = memory_store();
    seed_app_server(&memory);
    let object = marked(secret(NAMESPACE, CREDENTIALS_SECRET, &[("apitoken", "a")]));

    let decision = filter(store.clone())
        .on_update(&object.payload_digest(), &object)
        .await;

    assert_eq!(decision, Decision::Ignored(IgnoreReason::PayloadUnchanged));
    assert!(restart_stamp(&store).await.is_none());
}

#[tokio::test]
async fn test_referenced_secret_created_late_is_marked_and_restarts() {
    let (memory, store) = memory_store();
    memory.seed(&desired_state(SPEC_YAML)).unwrap();
    seed_app_server(&memory);
    let created = memory
        .seed(&secret(NAMESPACE, CREDENTIALS_SECRET, &[("apitoken", "sk")]))
        .unwrap();

    let decision = filter(store.clone()).on_create(&created).await;

    assert_eq!(decision, Decision::Restarted(vec![Workload::AppServer]));
    let stored = store
        .get::<Secret>(Some(NAMESPACE), CREDENTIALS_SECRET)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(WATCHER_ANNOTATION))
            .map(String::as_str),
        Some(SINGLETON_NAME)
    );
    assert!(restart_stamp(&store).await.is_some());
}

#[tokio::test]
async fn test_marker_left_behind_is_stale() {
    let (memory, store) = memory_store();
    memory.seed(&desired_state(SPEC_YAML)).unwrap();
    seed_app_server(&memory);
    let leftover = marked(secret(NAMESPACE, "previous-credentials", &[("apitoken", "x")]));

    let decision = filter(store.clone()).on_create(&leftover).await;

    assert_eq!(decision, Decision::Ignored(IgnoreReason::Stale));
    assert!(restart_stamp(&store).await.is_none());
}

#[tokio::test]
async fn test_referenced_secret_without_desired_state_is_ignored() {
    let (memory, store) = memory_store();
    seed_app_server(&memory);

    let decision = filter(store)
        .on_create(&secret(NAMESPACE, CREDENTIALS_SECRET, &[("apitoken", "sk")]))
        .await;

    assert_eq!(decision, Decision::Ignored(IgnoreReason::NoDesiredState));
    assert_eq!(memory.write_count(), 0);
}

#[tokio::test]
async fn test_owned_config_map_is_left_to_reconcile() {
    let (memory, store) = memory_store();
    seed_default(&memory);
    let owned = ConfigMap {
        metadata: ObjectMeta {
            name: Some("assistant-app-server-config".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            owner_references: Some(vec![OwnerReference {
                api_version: "assistant.octopilot.io/v1alpha1".to_string(),
                kind: "AssistantConfig".to_string(),
                name: SINGLETON_NAME.to_string(),
                uid: "uid".to_string(),
                ..OwnerReference::default()
            }]),
            ..ObjectMeta::default()
        },
        ..ConfigMap::default()
    };

    let decision = filter(store).on_create(&owned).await;

    assert_eq!(decision, Decision::Ignored(IgnoreReason::Owned));
}

#[tokio::test]
async fn test_delete_never_restarts() {
    let (memory, store) = memory_store();
    seed_app_server(&memory);
    let object = secret(PULL_SECRET_NAMESPACE, PULL_SECRET_NAME, &[]);

    let decision = filter(store).on_delete(&object);

    assert_eq!(decision, Decision::Ignored(IgnoreReason::Deleted));
    assert!(memory
        .writes()
        .iter()
        .all(|w| w.verb != WriteVerb::Replace));
}

#[tokio::test]
async fn test_snapshots_turn_applies_into_creates_and_updates() {
    let (memory, store) = memory_store();
    seed_app_server(&memory);
    let filter = filter(store.clone());
    let mut snapshots = ObjectSnapshots::new();
    let v1 = secret(PULL_SECRET_NAMESPACE, PULL_SECRET_NAME, &[("k", "1")]);
    let v2 = secret(PULL_SECRET_NAMESPACE, PULL_SECRET_NAME, &[("k", "2")]);

    snapshots.begin_relist();
    assert!(snapshots.relist(v1.clone()).is_none());
    snapshots.end_relist();

    let event = snapshots.apply(v2);
    assert!(matches!(event, WatchEvent::Updated { .. }));
    let decision = filter.dispatch(event).await;
    assert_eq!(decision, Decision::Restarted(vec![Workload::AppServer]));
    assert_eq!(snapshots.len(), 1);
}

#[tokio::test]
async fn test_relist_reports_missed_change_and_prunes_vanished() {
    let mut snapshots = ObjectSnapshots::new();
    let pull = secret(PULL_SECRET_NAMESPACE, PULL_SECRET_NAME, &[("k", "1")]);
    let gone = secret(NAMESPACE, "gone", &[("k", "1")]);
    snapshots.begin_relist();
    snapshots.relist(pull);
    snapshots.relist(gone);
    snapshots.end_relist();
    assert_eq!(snapshots.len(), 2);

    // Watch restarted; the pull secret changed meanwhile and "gone" was deleted
    snapshots.begin_relist();
    let missed = snapshots.relist(secret(PULL_SECRET_NAMESPACE, PULL_SECRET_NAME, &[("k", "2")]));
    snapshots.end_relist();

    assert!(matches!(missed, Some(WatchEvent::Updated { .. })));
    assert_eq!(snapshots.len(), 1);
}

#[tokio::test]
async fn test_referenced_secret_created_while_watch_was_down_restarts() {
    let (memory, store) = memory_store();
    memory.seed(&desired_state(SPEC_YAML)).unwrap();
    seed_app_server(&memory);
    let filter = filter(store.clone());
    let mut snapshots = ObjectSnapshots::new();
    snapshots.begin_relist();
    snapshots.relist(secret(PULL_SECRET_NAMESPACE, PULL_SECRET_NAME, &[("k", "1")]));
    snapshots.end_relist();
    let created = memory
        .seed(&secret(NAMESPACE, CREDENTIALS_SECRET, &[("apitoken", "sk")]))
        .unwrap();

    // Watch restarted; the credentials Secret appeared meanwhile
    snapshots.begin_relist();
    assert!(snapshots
        .relist(secret(PULL_SECRET_NAMESPACE, PULL_SECRET_NAME, &[("k", "1")]))
        .is_none());
    let missed = snapshots.relist(created).unwrap();
    snapshots.end_relist();

    assert!(matches!(missed, WatchEvent::Created(_)));
    let decision = filter.dispatch(missed).await;
    assert_eq!(decision, Decision::Restarted(vec![Workload::AppServer]));
    assert!(restart_stamp(&store).await.is_some());
}
