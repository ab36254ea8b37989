//! # In-memory store
//!
//! Process-local [`ObjectStore`] with the API server semantics the engine
//! depends on:
//!
//! - `resourceVersion` preconditions on every write
//! - `status` as a subresource (plain replaces keep the stored status)
//! - deleting an object with finalizers only sets `deletionTimestamp`;
//!   the object disappears when its last finalizer is removed
//! - `metadata.generation` bumps when non-status content changes
//!
//! Every successful write is recorded so callers can assert how many writes a
//! reconcile pass performed. Writes to chosen objects can be made to fail, and
//! status writes can be made to conflict.

use super::{api_resource, from_dynamic, object_name, to_dynamic, ObjectStore, StoreError, TypedObject};
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteVerb {
    Create,
    Replace,
    ReplaceStatus,
    Delete,
}

/// One successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub verb: WriteVerb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    group: String,
    kind: String,
    namespace: Option<String>,
    name: String,
}

impl Key {
    fn new(resource: &ApiResource, namespace: Option<&str>, name: &str) -> Self {
        Self {
            group: resource.group.clone(),
            kind: resource.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    fn matches(&self, resource: &ApiResource, namespace: Option<&str>) -> bool {
        self.group == resource.group
            && self.kind == resource.kind
            && namespace.is_none_or(|ns| self.namespace.as_deref() == Some(ns))
    }
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    last_resource_version: u64,
    writes: Vec<WriteRecord>,
    failing: Vec<(String, String)>,
    status_conflicts: u32,
}

impl State {
    fn next_version(&mut self) -> String {
        self.last_resource_version += 1;
        self.last_resource_version.to_string()
    }

    fn check_failure(&self, resource: &ApiResource, name: &str) -> Result<(), StoreError> {
        if self
            .failing
            .iter()
            .any(|(kind, failing)| *kind == resource.kind && failing == name)
        {
            return Err(StoreError::Transient(format!(
                "injected failure writing {} '{}'",
                resource.kind, name
            )));
        }
        Ok(())
    }

    fn record(&mut self, verb: WriteVerb, key: &Key) {
        self.writes.push(WriteRecord {
            verb,
            kind: key.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        });
    }

    /// Assign server-owned metadata to a newly stored object
    fn admit(&mut self, object: &mut DynamicObject) {
        if object.metadata.uid.is_none() {
            object.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        object.metadata.generation = Some(1);
        object.metadata.resource_version = Some(self.next_version());
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an object without recording a write, as if it pre-existed.
    ///
    /// A `deletionTimestamp` on the seeded object is kept.
    pub fn seed<K: TypedObject>(&self, object: &K) -> Result<K, StoreError> {
        let seeded = self.seed_dynamic(&api_resource::<K>(), to_dynamic(object)?)?;
        from_dynamic(seeded)
    }

    pub fn seed_dynamic(
        &self,
        resource: &ApiResource,
        mut object: DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = Key::new(
            resource,
            object.metadata.namespace.as_deref(),
            object_name(&object)?,
        );
        let mut state = self.state();
        state.admit(&mut object);
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state().writes.len()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    /// Make every write to `kind`/`name` fail with a transient error
    pub fn fail_writes_to(&self, kind: &str, name: &str) {
        self.state()
            .failing
            .push((kind.to_string(), name.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    /// Make the next `count` status writes fail with a conflict
    pub fn inject_status_conflicts(&self, count: u32) {
        self.state().status_conflicts = count;
    }

    #[must_use]
    pub fn contains(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> bool {
        self.state()
            .objects
            .contains_key(&Key::new(resource, namespace, name))
    }
}

fn conflict(resource: &ApiResource, name: &str, message: &str) -> StoreError {
    StoreError::Conflict {
        kind: resource.kind.clone(),
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn not_found(resource: &ApiResource, name: &str) -> StoreError {
    StoreError::NotFound {
        kind: resource.kind.clone(),
        name: name.to_string(),
    }
}

fn check_version(
    resource: &ApiResource,
    name: &str,
    stored: &DynamicObject,
    incoming: &DynamicObject,
) -> Result<(), StoreError> {
    match &incoming.metadata.resource_version {
        Some(version) if stored.metadata.resource_version.as_ref() != Some(version) => Err(
            conflict(resource, name, "the object has been modified; please apply your changes to the latest version"),
        ),
        _ => Ok(()),
    }
}

/// Object content excluding status, for generation tracking
fn content(object: &DynamicObject) -> Value {
    let mut data = object.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

fn set_status(object: &mut DynamicObject, status: Option<&Value>) {
    if !object.data.is_object() {
        object.data = json!({});
    }
    if let Some(map) = object.data.as_object_mut() {
        match status {
            Some(status) => {
                map.insert("status".to_string(), status.clone());
            }
            None => {
                map.remove("status");
            }
        }
    }
}

fn has_finalizers(object: &DynamicObject) -> bool {
    object
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| !f.is_empty())
}

fn mark_deleted(object: &mut DynamicObject) -> Result<(), StoreError> {
    let mut value = serde_json::to_value(&*object)?;
    value["metadata"]["deletionTimestamp"] = json!(chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    *object = serde_json::from_value(value)?;
    Ok(())
}

fn matches_selector(object: &DynamicObject, selector: Option<&str>) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    let labels = object.metadata.labels.as_ref();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels
                .and_then(|l| l.get(key.trim()))
                .is_some_and(|actual| actual == value.trim()),
            None => labels.is_some_and(|l| l.contains_key(term)),
        })
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        self.state()
            .objects
            .get(&Key::new(resource, namespace, name))
            .cloned()
            .ok_or_else(|| not_found(resource, name))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        Ok(self
            .state()
            .objects
            .iter()
            .filter(|(key, object)| {
                key.matches(resource, namespace) && matches_selector(object, label_selector)
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object_name(object)?;
        let key = Key::new(resource, object.metadata.namespace.as_deref(), name);
        let mut state = self.state();
        state.check_failure(resource, name)?;
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: resource.kind.clone(),
                name: name.to_string(),
            });
        }
        let mut created = object.clone();
        created.metadata.uid = None;
        created.metadata.deletion_timestamp = None;
        state.admit(&mut created);
        state.record(WriteVerb::Create, &key);
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object_name(object)?;
        let key = Key::new(resource, object.metadata.namespace.as_deref(), name);
        let mut state = self.state();
        state.check_failure(resource, name)?;
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(resource, name))?;
        check_version(resource, name, &stored, object)?;

        let mut updated = object.clone();
        set_status(&mut updated, stored.data.get("status"));
        updated.metadata.uid.clone_from(&stored.metadata.uid);
        updated
            .metadata
            .deletion_timestamp
            .clone_from(&stored.metadata.deletion_timestamp);
        updated.metadata.generation = if content(&stored) == content(&updated) {
            stored.metadata.generation
        } else {
            stored.metadata.generation.map(|g| g + 1)
        };
        updated.metadata.resource_version = Some(state.next_version());
        state.record(WriteVerb::Replace, &key);

        if updated.metadata.deletion_timestamp.is_some() && !has_finalizers(&updated) {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn replace_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object_name(object)?;
        let key = Key::new(resource, object.metadata.namespace.as_deref(), name);
        let mut state = self.state();
        state.check_failure(resource, name)?;
        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            return Err(conflict(resource, name, "injected status conflict"));
        }
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(resource, name))?;
        check_version(resource, name, &stored, object)?;

        set_status(&mut stored, object.data.get("status"));
        stored.metadata.resource_version = Some(state.next_version());
        state.record(WriteVerb::ReplaceStatus, &key);
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        let key = Key::new(resource, namespace, name);
        let mut state = self.state();
        state.check_failure(resource, name)?;
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(resource, name))?;

        if has_finalizers(&stored) {
            if stored.metadata.deletion_timestamp.is_none() {
                mark_deleted(&mut stored)?;
                stored.metadata.resource_version = Some(state.next_version());
                state.objects.insert(key.clone(), stored);
            }
        } else {
            state.objects.remove(&key);
        }
        state.record(WriteVerb::Delete, &key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn config_map(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
            ..ConfigMap::default()
        }
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let memory = Arc::new(InMemoryStore::new());
        let store = Store::new(memory.clone());
        let created = store.create(&config_map("a", &[])).await.unwrap();

        let mut first = created.clone();
        first.data = Some(BTreeMap::from([("k".to_string(), "v2".to_string())]));
        store.replace(&first).await.unwrap();

        let mut stale = created;
        stale.data = Some(BTreeMap::from([("k".to_string(), "v3".to_string())]));
        let err = store.replace(&stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(memory.write_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_marks_then_removes() {
        let memory = Arc::new(InMemoryStore::new());
        let store = Store::new(memory.clone());
        let mut cm = config_map("a", &[]);
        cm.metadata.finalizers = Some(vec!["example.io/hold".to_string()]);
        store.create(&cm).await.unwrap();

        assert!(store.delete::<ConfigMap>(Some("ns"), "a").await.unwrap());
        let marked: ConfigMap = store.get(Some("ns"), "a").await.unwrap().unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        let mut released = marked;
        released.metadata.finalizers = None;
        store.replace(&released).await.unwrap();
        assert!(store.get::<ConfigMap>(Some("ns"), "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_label_selector() {
        let memory = Arc::new(InMemoryStore::new());
        let store = Store::new(memory.clone());
        memory.seed(&config_map("a", &[("app", "x")])).unwrap();
        memory.seed(&config_map("b", &[("app", "y")])).unwrap();

        let matched: Vec<ConfigMap> = store.list(Some("ns"), Some("app=x")).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].metadata.name.as_deref(), Some("a"));
        assert_eq!(memory.write_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure_blocks_writes() {
        let memory = Arc::new(InMemoryStore::new());
        let store = Store::new(memory.clone());
        memory.fail_writes_to("ConfigMap", "a");
        let err = store.create(&config_map("a", &[])).await.unwrap_err();
        assert!(matches!(err, StoreError::Transient(_)));
        assert_eq!(memory.write_count(), 0);
    }
}
