//! # Component Adapters
//!
//! One adapter per managed workload. Each builds the objects its workload owns
//! and upserts them idempotently:
//!
//! - `ensure_resources` (phase 1): everything the Deployment depends on
//! - `ensure_deployment` (phase 2): the Deployment itself, plus follow-up
//!   activation such as console plugin registration
//!
//! Adapters are a closed set chosen from the `AssistantConfig` spec. They see
//! only an [`AdapterContext`]; watch routing and teardown live elsewhere.
//!
//! ## Module Structure
//!
//! - `api.rs` - API backend (app server or core)
//! - `cache.rs` - Postgres conversation cache
//! - `console.rs` - OpenShift console plugin
//! - `equality.rs` - owned-field drift detection and upsert

mod api;
mod cache;
mod console;
pub mod equality;

use crate::config::ImageSet;
use crate::constants::{FORCE_RELOAD_ANNOTATION, MANAGER_NAME};
use crate::crd::{ApiBackend, AssistantConfig, AssistantConfigSpec, CacheType, ResourceSpec, Workload};
use crate::store::{Store, StoreError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

pub use equality::{upsert, upsert_dynamic, OwnedObject, Upsert};

/// Label shared by every object the operator creates
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const PART_OF_VALUE: &str = "assistant";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Annotation asking the OpenShift service CA to issue a serving certificate
pub const SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to render {what}: {message}")]
    Render { what: String, message: String },
}

/// What an adapter may touch: the store, its namespace, the owner to stamp
/// on created objects and the images to run.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub store: Store,
    pub namespace: String,
    pub owner: OwnerReference,
    pub images: ImageSet,
}

impl AdapterContext {
    /// Fails when `config` has not been persisted yet (no uid to own objects by).
    pub fn new(
        store: Store,
        namespace: impl Into<String>,
        config: &AssistantConfig,
        images: ImageSet,
    ) -> Result<Self, StoreError> {
        let owner = config.controller_owner_ref(&()).ok_or_else(|| {
            StoreError::Invalid("AssistantConfig has no uid to own resources by".to_string())
        })?;
        Ok(Self {
            store,
            namespace: namespace.into(),
            owner,
            images,
        })
    }

    /// Metadata for a namespaced object owned by the `AssistantConfig`
    pub(crate) fn metadata(&self, name: &str, component: &str) -> ObjectMeta {
        ObjectMeta {
            namespace: Some(self.namespace.clone()),
            ..self.cluster_metadata(name, component)
        }
    }

    /// Metadata for a cluster-scoped object owned by the `AssistantConfig`
    pub(crate) fn cluster_metadata(&self, name: &str, component: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(name, component)),
            owner_references: Some(vec![self.owner.clone()]),
            ..ObjectMeta::default()
        }
    }
}

/// Standard labels for an object belonging to `name`'s workload
#[must_use]
pub fn labels(name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), name.to_string()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string()),
        (PART_OF_LABEL.to_string(), PART_OF_VALUE.to_string()),
    ])
}

/// Pod selector for a workload's Deployment and Service
#[must_use]
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), name.to_string()),
        (PART_OF_LABEL.to_string(), PART_OF_VALUE.to_string()),
    ])
}

/// Hex SHA-256 over the given parts, used for config-hash annotations
#[must_use]
pub fn digest<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

pub(crate) fn resource_requirements(spec: Option<&ResourceSpec>) -> Option<ResourceRequirements> {
    let spec = spec?;
    let quantities = |m: &BTreeMap<String, String>| {
        (!m.is_empty()).then(|| {
            m.iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect::<BTreeMap<_, _>>()
        })
    };
    Some(ResourceRequirements {
        limits: quantities(&spec.limits),
        requests: quantities(&spec.requests),
        ..ResourceRequirements::default()
    })
}

/// A managed workload and how to reconcile it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    Console,
    Cache,
    Api(ApiBackend),
}

impl Adapter {
    /// Adapters selected by `spec`, in phase-2 order: console, cache, API backend
    #[must_use]
    pub fn for_spec(spec: &AssistantConfigSpec) -> Vec<Adapter> {
        let mut adapters = Vec::with_capacity(3);
        if spec.console.enabled {
            adapters.push(Adapter::Console);
        }
        if spec.cache.cache_type == CacheType::Postgres {
            adapters.push(Adapter::Cache);
        }
        adapters.push(Adapter::Api(spec.api.backend));
        adapters
    }

    /// Adapters with teardown hooks, regardless of the current spec
    #[must_use]
    pub fn with_deactivation_hooks() -> Vec<Adapter> {
        vec![Adapter::Console]
    }

    #[must_use]
    pub fn workload(&self) -> Workload {
        match self {
            Adapter::Console => Workload::ConsolePlugin,
            Adapter::Cache => Workload::Cache,
            Adapter::Api(backend) => backend.workload(),
        }
    }

    pub async fn ensure_resources(
        &self,
        ctx: &AdapterContext,
        config: &AssistantConfig,
    ) -> Result<(), AdapterError> {
        match self {
            Adapter::Console => console::ensure_resources(ctx, config).await,
            Adapter::Cache => cache::ensure_resources(ctx, config).await,
            Adapter::Api(backend) => api::ensure_resources(ctx, config, *backend).await,
        }
    }

    pub async fn ensure_deployment(
        &self,
        ctx: &AdapterContext,
        config: &AssistantConfig,
    ) -> Result<(), AdapterError> {
        match self {
            Adapter::Console => console::ensure_deployment(ctx, config).await,
            Adapter::Cache => cache::ensure_deployment(ctx, config).await,
            Adapter::Api(backend) => api::ensure_deployment(ctx, config, *backend).await,
        }
    }

    /// Undo effects outside owned objects; owned objects are left to teardown.
    pub async fn deactivate(&self, store: &Store) -> Result<(), AdapterError> {
        match self {
            Adapter::Console => console::deactivate(store).await,
            Adapter::Cache | Adapter::Api(_) => Ok(()),
        }
    }
}

/// Roll `workload`'s pods by bumping the force-reload annotation on its pod template.
///
/// Returns `false` when the Deployment does not exist.
pub async fn restart(store: &Store, namespace: &str, workload: Workload) -> Result<bool, StoreError> {
    let name = workload.deployment_name();
    let Some(mut deployment) = store.get::<Deployment>(Some(namespace), name).await? else {
        debug!(deployment = name, "restart skipped, deployment not found");
        return Ok(false);
    };
    let Some(spec) = deployment.spec.as_mut() else {
        return Ok(false);
    };
    spec.template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            FORCE_RELOAD_ANNOTATION.to_string(),
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        );
    store.replace(&deployment).await?;
    info!(deployment = name, "🔄 Restarted workload");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CacheSpec, ConsoleSpec};

    fn spec() -> AssistantConfigSpec {
        serde_json::from_value(serde_json::json!({"llm": {"providers": []}})).unwrap()
    }

    #[test]
    fn test_default_spec_selects_all_in_phase_order() {
        assert_eq!(
            Adapter::for_spec(&spec()),
            vec![
                Adapter::Console,
                Adapter::Cache,
                Adapter::Api(ApiBackend::AppServer)
            ]
        );
    }

    #[test]
    fn test_memory_cache_and_disabled_console_leave_only_api() {
        let mut spec = spec();
        spec.api.backend = ApiBackend::Core;
        spec.cache = CacheSpec {
            cache_type: CacheType::Memory,
            ..CacheSpec::default()
        };
        spec.console = ConsoleSpec {
            enabled: false,
            ..ConsoleSpec::default()
        };
        assert_eq!(Adapter::for_spec(&spec), vec![Adapter::Api(ApiBackend::Core)]);
        assert_eq!(Adapter::Api(ApiBackend::Core).workload(), Workload::Core);
    }

    #[test]
    fn test_digest_is_stable_and_separates_parts() {
        assert_eq!(digest(["a", "b"]), digest(["a", "b"]));
        assert_ne!(digest(["ab", ""]), digest(["a", "b"]));
        assert_eq!(digest(["x"]).len(), 64);
    }
}
