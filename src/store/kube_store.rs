//! # Kubernetes-backed store
//!
//! [`ObjectStore`] over `Api<DynamicObject>`.

use super::{object_name, ObjectStore, StoreError};
use crate::constants::MANAGER_NAME;
use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::Client;
use serde_json::json;
use tracing::debug;

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

/// Which call failed; decides how a 409 is reported
#[derive(Debug, Clone, Copy)]
enum Verb {
    Read,
    Create,
    Write,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(MANAGER_NAME.to_string()),
        ..PostParams::default()
    }
}

fn map_error(err: kube::Error, resource: &ApiResource, name: &str, verb: Verb) -> StoreError {
    let kind = resource.kind.clone();
    let name = name.to_string();
    match err {
        kube::Error::Api(ref api_err) if api_err.code == 404 => StoreError::NotFound { kind, name },
        kube::Error::Api(ref api_err) if api_err.code == 409 => match verb {
            Verb::Create => StoreError::AlreadyExists { kind, name },
            Verb::Read | Verb::Write => StoreError::Conflict {
                kind,
                name,
                message: err.to_string(),
            },
        },
        other => StoreError::Transient(other.to_string()),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        self.api(resource, namespace)
            .get(name)
            .await
            .map_err(|e| map_error(e, resource, name, Verb::Read))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let params = match label_selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        match self.api(resource, namespace).list(&params).await {
            Ok(list) => Ok(list.items),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                debug!("{} is not served by the API server, treating as empty", resource.kind);
                Ok(Vec::new())
            }
            Err(e) => Err(map_error(e, resource, "*", Verb::Read)),
        }
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object_name(object)?;
        self.api(resource, object.metadata.namespace.as_deref())
            .create(&post_params(), object)
            .await
            .map_err(|e| map_error(e, resource, name, Verb::Create))
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object_name(object)?;
        self.api(resource, object.metadata.namespace.as_deref())
            .replace(name, &post_params(), object)
            .await
            .map_err(|e| map_error(e, resource, name, Verb::Write))
    }

    async fn replace_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object_name(object)?;
        // resourceVersion in a merge patch is a precondition, so stale writes still conflict
        let patch = json!({
            "metadata": { "resourceVersion": object.metadata.resource_version },
            "status": object.data.get("status"),
        });
        let params = PatchParams {
            field_manager: Some(MANAGER_NAME.to_string()),
            ..PatchParams::default()
        };
        self.api(resource, object.metadata.namespace.as_deref())
            .patch_status(name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| map_error(e, resource, name, Verb::Write))
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        self.api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, resource, name, Verb::Write))
    }
}
