//! # Coordinator Tests
//!
//! Full reconcile passes against the in-memory store: finalizer lifecycle,
//! idempotent passes, phase-1 failures and reference validation.

mod common;

use assistant_operator::config::{ObjectKey, WatchedKind};
use assistant_operator::constants::{
    APP_SERVER_DEPLOYMENT, CONSOLE_DEPLOYMENT, CORE_DEPLOYMENT, FINALIZER, POSTGRES_DEPLOYMENT,
    SINGLETON_NAME, WATCHER_ANNOTATION,
};
use assistant_operator::controller::reconciler::reconcile::{
    REASON_DEPLOYMENT_FAILED, REASON_RESOURCES_FAILED, REASON_VALIDATION_FAILED,
};
use assistant_operator::controller::reconciler::{reconcile, ReconcilerError};
use assistant_operator::crd::{AssistantConfig, OverallStatus};
use assistant_operator::runtime::error_policy::handle_reconciliation_error;
use assistant_operator::store::WriteVerb;
use common::*;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;

async fn pass(
    config: &AssistantConfig,
    ctx: &Arc<assistant_operator::controller::reconciler::Reconciler>,
) -> Result<Action, ReconcilerError> {
    reconcile(Arc::new(config.clone()), Arc::clone(ctx)).await
}

fn credentials_key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, CREDENTIALS_SECRET)
}

async fn deployment_exists(store: &assistant_operator::store::Store, name: &str) -> bool {
    store
        .get::<Deployment>(Some(NAMESPACE), name)
        .await
        .unwrap()
        .is_some()
}

#[tokio::test]
async fn test_first_pass_only_adds_finalizer() {
    let (memory, store) = memory_store();
    let config = seed_default(&memory);
    let ctx = reconciler(store.clone());

    let action = pass(&config, &ctx).await.unwrap();

    assert_eq!(action, Action::await_change());
    let stored = stored_config(&store).await.unwrap();
    assert_eq!(stored.metadata.finalizers, Some(vec![FINALIZER.to_string()]));
    assert_eq!(memory.write_count(), 1);
    assert!(!deployment_exists(&store, APP_SERVER_DEPLOYMENT).await);
}

#[tokio::test]
async fn test_other_names_are_ignored() {
    let (memory, store) = memory_store();
    seed_default(&memory);
    let ctx = reconciler(store);
    let mut other = desired_state(SPEC_YAML);
    other.metadata.name = Some("not-the-singleton".to_string());

    let action = pass(&other, &ctx).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(memory.write_count(), 0);
}

#[tokio::test]
async fn test_full_pass_creates_workloads_and_reports_not_ready() {
    let (memory, store) = memory_store();
    let config = seed_default(&memory);
    let ctx = reconciler(store.clone());
    pass(&config, &ctx).await.unwrap();

    let err = pass(&config, &ctx).await.unwrap_err();

    match err {
        ReconcilerError::WorkloadsNotReady(names) => assert_eq!(
            names,
            vec![CONSOLE_DEPLOYMENT, POSTGRES_DEPLOYMENT, APP_SERVER_DEPLOYMENT]
        ),
        other => panic!("expected WorkloadsNotReady, got {other:?}"),
    }
    for name in [CONSOLE_DEPLOYMENT, POSTGRES_DEPLOYMENT, APP_SERVER_DEPLOYMENT] {
        assert!(deployment_exists(&store, name).await, "{name} should exist");
    }

    let credentials = store
        .get::<Secret>(Some(NAMESPACE), CREDENTIALS_SECRET)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        credentials
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(WATCHER_ANNOTATION))
            .map(String::as_str),
        Some(SINGLETON_NAME)
    );

    assert!(ctx
        .watcher_config
        .read()
        .await
        .annotated(WatchedKind::Secret, &credentials_key())
        .is_some());

    let status = stored_config(&store).await.unwrap().status.unwrap();
    assert_eq!(status.overall_status, Some(OverallStatus::NotReady));
    let reconciled = status
        .conditions
        .iter()
        .find(|c| c.r#type == "Reconciled")
        .unwrap();
    assert_eq!(reconciled.status, "True");
    assert!(status
        .conditions
        .iter()
        .filter(|c| c.r#type != "Reconciled")
        .all(|c| c.status == "False"));
}

#[tokio::test]
async fn test_second_quiet_pass_writes_nothing() {
    let (memory, store) = memory_store();
    let config = seed_default(&memory);
    let ctx = reconciler(store.clone());
    pass(&config, &ctx).await.unwrap();
    let _ = pass(&config, &ctx).await;
    memory.clear_writes();

    let _ = pass(&config, &ctx).await;

    assert_eq!(memory.writes(), vec![]);
}

#[tokio::test]
async fn test_ready_workloads_requeue_on_interval() {
    let (memory, store) = memory_store();
    let config = seed_default(&memory);
    let ctx = reconciler(store.clone());
    pass(&config, &ctx).await.unwrap();
    let _ = pass(&config, &ctx).await;
    for name in [CONSOLE_DEPLOYMENT, POSTGRES_DEPLOYMENT, APP_SERVER_DEPLOYMENT] {
        mark_available(&store, name).await;
    }
    memory.clear_writes();

    let action = pass(&config, &ctx).await.unwrap();

    assert_eq!(action, Action::requeue(Duration::from_secs(600)));
    let status = stored_config(&store).await.unwrap().status.unwrap();
    assert_eq!(status.overall_status, Some(OverallStatus::Ready));
    assert!(status.diagnostic_info.is_empty());
    // Only the status changed
    let writes = memory.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].verb, WriteVerb::ReplaceStatus);
}

#[tokio::test]
async fn test_memory_cache_skips_cache_workload() {
    let (memory, store) = memory_store();
    memory
        .seed(&secret(
            NAMESPACE,
            CREDENTIALS_SECRET,
            &[("apitoken", "sk-test")],
        ))
        .unwrap();
    let yaml = format!("{SPEC_YAML}cache:\n  type: memory\nconsole:\n  enabled: false\n");
    let config = memory.seed(&desired_state(&yaml)).unwrap();
    let ctx = reconciler(store.clone());
    pass(&config, &ctx).await.unwrap();

    let err = pass(&config, &ctx).await.unwrap_err();

    assert!(matches!(err, ReconcilerError::WorkloadsNotReady(ref names) if names == &vec![APP_SERVER_DEPLOYMENT]));
    assert!(!deployment_exists(&store, POSTGRES_DEPLOYMENT).await);
    assert!(!deployment_exists(&store, CONSOLE_DEPLOYMENT).await);
}

#[tokio::test]
async fn test_phase_one_failure_blocks_deployments() {
    let (memory, store) = memory_store();
    let config = seed_default(&memory);
    let ctx = reconciler(store.clone());
    pass(&config, &ctx).await.unwrap();
    memory.fail_writes_to("Service", POSTGRES_DEPLOYMENT);

    let err = pass(&config, &ctx).await.unwrap_err();

    assert!(matches!(err, ReconcilerError::ComponentResources(ref failures) if failures.len() == 1));
    for name in [CONSOLE_DEPLOYMENT, POSTGRES_DEPLOYMENT, APP_SERVER_DEPLOYMENT] {
        assert!(!deployment_exists(&store, name).await, "{name} should not exist");
    }
    // Resources of the healthy adapters were still laid down
    assert!(store
        .get::<Service>(Some(NAMESPACE), APP_SERVER_DEPLOYMENT)
        .await
        .unwrap()
        .is_some());
    let status = stored_config(&store).await.unwrap().status.unwrap();
    let cache = status
        .conditions
        .iter()
        .find(|c| c.r#type == "CacheReady")
        .unwrap();
    assert_eq!(cache.status, "False");
    assert_eq!(cache.reason, REASON_RESOURCES_FAILED);
    let reconciled = status
        .conditions
        .iter()
        .find(|c| c.r#type == "Reconciled")
        .unwrap();
    assert_eq!(reconciled.reason, REASON_RESOURCES_FAILED);
}

#[tokio::test]
async fn test_missing_reference_fails_validation_before_any_component() {
    let (memory, store) = memory_store();
    let config = memory.seed(&desired_state(SPEC_YAML)).unwrap();
    let ctx = reconciler(store.clone());
    pass(&config, &ctx).await.unwrap();

    let err = pass(&config, &ctx).await.unwrap_err();

    match err {
        ReconcilerError::Validation(problems) => {
            assert_eq!(problems.0.len(), 1);
            assert!(problems.0[0].contains(CREDENTIALS_SECRET));
        }
        other => panic!("expected Validation, got {other:?}"),
    }
    assert!(!deployment_exists(&store, APP_SERVER_DEPLOYMENT).await);
    assert!(store
        .get::<ConfigMap>(Some(NAMESPACE), "assistant-postgres-conf")
        .await
        .unwrap()
        .is_none());
    let status = stored_config(&store).await.unwrap().status.unwrap();
    assert_eq!(status.conditions.len(), 1);
    assert_eq!(status.conditions[0].reason, REASON_VALIDATION_FAILED);
    assert_eq!(status.overall_status, Some(OverallStatus::NotReady));
    // Routing is rebuilt even though the pass stopped here
    assert!(ctx
        .watcher_config
        .read()
        .await
        .annotated(WatchedKind::Secret, &credentials_key())
        .is_some());
}

#[tokio::test]
async fn test_deletion_tears_down_and_releases_finalizer() {
    let (memory, store) = memory_store();
    let config = seed_default(&memory);
    let ctx = reconciler(store.clone());
    pass(&config, &ctx).await.unwrap();
    let _ = pass(&config, &ctx).await;
    assert!(store.delete::<AssistantConfig>(None, SINGLETON_NAME).await.unwrap());
    let deleting = stored_config(&store).await.unwrap();
    assert!(deleting.metadata.deletion_timestamp.is_some());

    let action = pass(&deleting, &ctx).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert!(stored_config(&store).await.is_none());
    for name in [CONSOLE_DEPLOYMENT, POSTGRES_DEPLOYMENT, APP_SERVER_DEPLOYMENT] {
        assert!(!deployment_exists(&store, name).await, "{name} should be gone");
        assert!(store
            .get::<Service>(Some(NAMESPACE), name)
            .await
            .unwrap()
            .is_none());
    }
    assert!(store
        .get::<Secret>(Some(NAMESPACE), "assistant-postgres-secret")
        .await
        .unwrap()
        .is_none());
    // Referenced, not owned
    assert!(store
        .get::<Secret>(Some(NAMESPACE), CREDENTIALS_SECRET)
        .await
        .unwrap()
        .is_some());
    assert!(ctx
        .watcher_config
        .read()
        .await
        .annotated(WatchedKind::Secret, &credentials_key())
        .is_none());
}

#[tokio::test]
async fn test_deletion_releases_finalizer_when_a_kind_cannot_be_listed() {
    let (memory, store) = memory_store_forbidding_list("ServiceMonitor");
    let config = seed_default(&memory);
    let ctx = reconciler(store.clone());
    pass(&config, &ctx).await.unwrap();
    let _ = pass(&config, &ctx).await;
    assert!(store.delete::<AssistantConfig>(None, SINGLETON_NAME).await.unwrap());
    let deleting = stored_config(&store).await.unwrap();

    let action = pass(&deleting, &ctx).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert!(stored_config(&store).await.is_none());
    for name in [CONSOLE_DEPLOYMENT, POSTGRES_DEPLOYMENT, APP_SERVER_DEPLOYMENT] {
        assert!(!deployment_exists(&store, name).await, "{name} should be gone");
    }
}

#[tokio::test]
async fn test_deployment_failure_does_not_stop_other_workloads() {
    let (memory, store) = memory_store();
    let config = seed_default(&memory);
    let ctx = reconciler(store.clone());
    pass(&config, &ctx).await.unwrap();
    memory.fail_writes_to("Deployment", POSTGRES_DEPLOYMENT);

    let err = pass(&config, &ctx).await.unwrap_err();

    match &err {
        ReconcilerError::WorkloadsNotReady(names) => assert_eq!(
            names,
            &vec![CONSOLE_DEPLOYMENT, POSTGRES_DEPLOYMENT, APP_SERVER_DEPLOYMENT]
        ),
        other => panic!("expected WorkloadsNotReady, got {other:?}"),
    }
    assert!(deployment_exists(&store, CONSOLE_DEPLOYMENT).await);
    assert!(deployment_exists(&store, APP_SERVER_DEPLOYMENT).await);
    assert!(!deployment_exists(&store, POSTGRES_DEPLOYMENT).await);

    let status = stored_config(&store).await.unwrap().status.unwrap();
    let cache = status
        .conditions
        .iter()
        .find(|c| c.r#type == "CacheReady")
        .unwrap();
    assert_eq!(cache.status, "False");
    assert_eq!(cache.reason, REASON_DEPLOYMENT_FAILED);
    let reconciled = status
        .conditions
        .iter()
        .find(|c| c.r#type == "Reconciled")
        .unwrap();
    assert_eq!(reconciled.status, "False");
    assert_eq!(reconciled.reason, REASON_DEPLOYMENT_FAILED);
    assert!(reconciled.message.contains("injected failure"));
    assert_eq!(status.overall_status, Some(OverallStatus::NotReady));

    let action = handle_reconciliation_error(Arc::new(config.clone()), &err, Arc::clone(&ctx));
    assert_eq!(
        action,
        Action::requeue(Duration::from_millis(ctx.config.backoff_start_ms))
    );
}

#[tokio::test]
async fn test_inactive_backend_objects_are_retired_only_when_owned() {
    let (memory, store) = memory_store();
    let config = seed_default(&memory);
    let uid = config.metadata.uid.clone().unwrap();
    let meta = |owned: bool| ObjectMeta {
        name: Some(CORE_DEPLOYMENT.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        owner_references: owned.then(|| {
            vec![OwnerReference {
                api_version: "assistant.octopilot.io/v1alpha1".to_string(),
                kind: "AssistantConfig".to_string(),
                name: SINGLETON_NAME.to_string(),
                uid: uid.clone(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]
        }),
        ..ObjectMeta::default()
    };
    // Someone else's Deployment that happens to share the name
    memory
        .seed(&Deployment {
            metadata: meta(false),
            ..Deployment::default()
        })
        .unwrap();
    // Left over from when the core backend was selected
    memory
        .seed(&Service {
            metadata: meta(true),
            ..Service::default()
        })
        .unwrap();
    let ctx = reconciler(store.clone());
    pass(&config, &ctx).await.unwrap();

    let _ = pass(&config, &ctx).await;

    assert!(deployment_exists(&store, CORE_DEPLOYMENT).await);
    assert!(store
        .get::<Service>(Some(NAMESPACE), CORE_DEPLOYMENT)
        .await
        .unwrap()
        .is_none());
    assert!(deployment_exists(&store, APP_SERVER_DEPLOYMENT).await);
}
