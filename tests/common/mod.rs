//! Common test utilities for the integration tests
//!
//! Every test runs against its own `InMemoryStore`; nothing here talks to a cluster.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use assistant_operator::config::{ControllerConfig, SystemResources, WatcherConfig};
use assistant_operator::constants::{CREDENTIALS_TOKEN_KEY, SINGLETON_NAME};
use assistant_operator::controller::reconciler::Reconciler;
use assistant_operator::crd::AssistantConfig;
use assistant_operator::store::{InMemoryStore, ObjectStore, Store, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{ApiResource, DynamicObject};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const NAMESPACE: &str = "octopilot-assistant";
pub const CREDENTIALS_SECRET: &str = "openai-credentials";

pub const SPEC_YAML: &str = r"
llm:
  providers:
    - name: openai
      type: openai
      credentialsSecretRef:
        name: openai-credentials
      models:
        - name: gpt-4o
api:
  backend: appServer
  defaultProvider: openai
  defaultModel: gpt-4o
";

/// A fresh in-memory store and the `Store` handle the engine uses
pub fn memory_store() -> (Arc<InMemoryStore>, Store) {
    let memory = Arc::new(InMemoryStore::new());
    let store = Store::new(Arc::clone(&memory) as Arc<dyn assistant_operator::store::ObjectStore>);
    (memory, store)
}

pub fn controller_config() -> ControllerConfig {
    ControllerConfig {
        namespace: NAMESPACE.to_string(),
        teardown_timeout_secs: 1,
        teardown_poll_interval_ms: 20,
        ..ControllerConfig::default()
    }
}

pub fn reconciler(store: Store) -> Arc<Reconciler> {
    reconciler_with(store, controller_config())
}

pub fn reconciler_with(store: Store, config: ControllerConfig) -> Arc<Reconciler> {
    let watcher_config = Arc::new(RwLock::new(WatcherConfig::new(SystemResources::defaults(
        &config.namespace,
    ))));
    Arc::new(Reconciler::new(store, config, watcher_config))
}

pub fn desired_state(yaml: &str) -> AssistantConfig {
    let spec = serde_yaml::from_str(yaml).expect("spec YAML should parse");
    AssistantConfig::new(SINGLETON_NAME, spec)
}

pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Secret::default()
    }
}

/// Seed the default spec and its credentials Secret; returns the stored `AssistantConfig`
pub fn seed_default(memory: &InMemoryStore) -> AssistantConfig {
    memory
        .seed(&secret(
            NAMESPACE,
            CREDENTIALS_SECRET,
            &[(CREDENTIALS_TOKEN_KEY, "sk-test")],
        ))
        .expect("seed credentials");
    memory
        .seed(&desired_state(SPEC_YAML))
        .expect("seed AssistantConfig")
}

pub async fn stored_config(store: &Store) -> Option<AssistantConfig> {
    store
        .get::<AssistantConfig>(None, SINGLETON_NAME)
        .await
        .expect("read AssistantConfig")
}

/// Report `name` as Available, as the deployment controller would
pub async fn mark_available(store: &Store, name: &str) {
    let mut deployment = store
        .get::<Deployment>(Some(NAMESPACE), name)
        .await
        .expect("read deployment")
        .expect("deployment exists");
    deployment.status = Some(DeploymentStatus {
        conditions: Some(vec![DeploymentCondition {
            type_: "Available".to_string(),
            status: "True".to_string(),
            ..DeploymentCondition::default()
        }]),
        ..DeploymentStatus::default()
    });
    store
        .replace_status(&deployment)
        .await
        .expect("write deployment status");
}

/// Delegates to an `InMemoryStore` but refuses to list one kind, as an API
/// server does when RBAC for that kind is missing.
pub struct ListForbidden {
    pub inner: Arc<InMemoryStore>,
    pub kind: &'static str,
}

#[async_trait]
impl ObjectStore for ListForbidden {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        self.inner.get(resource, namespace, name).await
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        if resource.kind == self.kind {
            return Err(StoreError::Transient(format!(
                "{} is forbidden (403)",
                resource.plural
            )));
        }
        self.inner.list(resource, namespace, label_selector).await
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        self.inner.create(resource, object).await
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        self.inner.replace(resource, object).await
    }

    async fn replace_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        self.inner.replace_status(resource, object).await
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        self.inner.delete(resource, namespace, name).await
    }
}

/// A fresh in-memory store whose `Store` handle cannot list `kind`
pub fn memory_store_forbidding_list(kind: &'static str) -> (Arc<InMemoryStore>, Store) {
    let memory = Arc::new(InMemoryStore::new());
    let store = Store::new(Arc::new(ListForbidden {
        inner: Arc::clone(&memory),
        kind,
    }) as Arc<dyn ObjectStore>);
    (memory, store)
}
