//! # Object Store
//!
//! The seam between the reconciliation engine and the Kubernetes API.
//!
//! Everything the operator reads or writes goes through [`ObjectStore`], which
//! speaks `DynamicObject` so typed `k8s-openapi` objects and kinds without
//! Rust types (ConsolePlugin, Console, ServiceMonitor) share one path.
//! [`Store`] is the typed facade the rest of the crate uses.
//!
//! Implementations:
//! - [`KubeStore`] - backed by a `kube::Client`
//! - [`InMemoryStore`] - in-process store with write accounting, used by tests

mod kube_store;
mod memory;
pub mod resources;

pub use kube_store::KubeStore;
pub use memory::{InMemoryStore, WriteRecord, WriteVerb};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },
    #[error("conflict writing {kind} '{name}': {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },
    #[error("invalid object: {0}")]
    Invalid(String),
    #[error("object store request failed: {0}")]
    Transient(String),
    #[error("failed to convert object: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Generic object store: get/list/create/replace/delete by kind, namespace and name.
///
/// `namespace: None` addresses cluster-scoped kinds (or all namespaces for `list`).
/// Writes carry `metadata.resourceVersion` when the caller read the object first;
/// a stale version fails with [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError>;

    /// Kinds the API server does not serve list as empty.
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Write only the `status` of `object`.
    async fn replace_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError>;
}

/// Rust types the typed facade can move in and out of the store
pub trait TypedObject:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync
{
}

impl<K> TypedObject for K where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync
{
}

/// Typed handle over an [`ObjectStore`]
///
/// NotFound on reads and deletes is folded into `Option`/`bool`.
#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    pub async fn get<K: TypedObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        self.get_dynamic(&api_resource::<K>(), namespace, name)
            .await?
            .map(from_dynamic)
            .transpose()
    }

    pub async fn list<K: TypedObject>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        self.inner
            .list(&api_resource::<K>(), namespace, label_selector)
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    pub async fn create<K: TypedObject>(&self, object: &K) -> Result<K, StoreError> {
        let created = self
            .inner
            .create(&api_resource::<K>(), &to_dynamic(object)?)
            .await?;
        from_dynamic(created)
    }

    pub async fn replace<K: TypedObject>(&self, object: &K) -> Result<K, StoreError> {
        let replaced = self
            .inner
            .replace(&api_resource::<K>(), &to_dynamic(object)?)
            .await?;
        from_dynamic(replaced)
    }

    pub async fn replace_status<K: TypedObject>(&self, object: &K) -> Result<K, StoreError> {
        let replaced = self
            .inner
            .replace_status(&api_resource::<K>(), &to_dynamic(object)?)
            .await?;
        from_dynamic(replaced)
    }

    /// Returns `false` when the object was already gone.
    pub async fn delete<K: TypedObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, StoreError> {
        self.delete_dynamic(&api_resource::<K>(), namespace, name)
            .await
    }

    pub async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        match self.inner.get(resource, namespace, name).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        self.inner.list(resource, namespace, None).await
    }

    pub async fn create_dynamic(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        self.inner.create(resource, object).await
    }

    pub async fn replace_dynamic(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        self.inner.replace(resource, object).await
    }

    pub async fn delete_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, StoreError> {
        match self.inner.delete(resource, namespace, name).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Descriptor for a statically typed kind
#[must_use]
pub fn api_resource<K: Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

pub fn to_dynamic<K: Serialize>(object: &K) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

pub fn from_dynamic<K: DeserializeOwned>(object: DynamicObject) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Whether `meta` carries an owner reference to the object with `owner_uid`
#[must_use]
pub fn is_owned_by(meta: &ObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == owner_uid))
}

pub(crate) fn object_name(object: &DynamicObject) -> Result<&str, StoreError> {
    object
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| StoreError::Invalid("object has no metadata.name".to_string()))
}
