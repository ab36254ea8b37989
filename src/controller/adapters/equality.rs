//! # Owned-field comparison
//!
//! Observed objects carry server-populated fields (cluster IPs, defaulted
//! probes, timestamps) the operator never sets. Drift is judged only on the
//! fields an adapter owns, and an update copies only those fields back.

use crate::store::{Store, StoreError, TypedObject};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PersistentVolumeClaim, PodSpec, Secret, Service, ServiceAccount, Volume,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of an idempotent upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    Unchanged,
}

/// A kind whose operator-owned fields can be compared and adopted
pub trait OwnedObject: TypedObject + std::fmt::Debug {
    /// Whether `self` (observed) differs from `desired` in any owned field
    fn drifted(&self, desired: &Self) -> bool;

    /// Copy owned fields from `desired`, keeping everything else as observed
    fn adopt(&mut self, desired: &Self);
}

/// Create `desired` if absent, update it if an owned field drifted, otherwise do nothing.
pub async fn upsert<K: OwnedObject>(store: &Store, desired: &K) -> Result<Upsert, StoreError> {
    let namespace = desired.meta().namespace.clone();
    let name = desired.name_any();
    match store.get::<K>(namespace.as_deref(), &name).await? {
        None => {
            store.create(desired).await?;
            debug!(kind = %K::kind(&()), name = %name, "created");
            Ok(Upsert::Created)
        }
        Some(mut observed) => {
            if !observed.drifted(desired) {
                return Ok(Upsert::Unchanged);
            }
            observed.adopt(desired);
            store.replace(&observed).await?;
            debug!(kind = %K::kind(&()), name = %name, "updated");
            Ok(Upsert::Updated)
        }
    }
}

/// [`upsert`] for kinds without Rust types; `spec` is the owned payload.
pub async fn upsert_dynamic(
    store: &Store,
    resource: &ApiResource,
    desired: &DynamicObject,
) -> Result<Upsert, StoreError> {
    let namespace = desired.metadata.namespace.clone();
    let name = desired.name_any();
    let desired_spec = desired.data.get("spec").cloned().unwrap_or(Value::Null);
    match store
        .get_dynamic(resource, namespace.as_deref(), &name)
        .await?
    {
        None => {
            store.create_dynamic(resource, desired).await?;
            Ok(Upsert::Created)
        }
        Some(mut observed) => {
            let spec_matches = observed
                .data
                .get("spec")
                .is_some_and(|spec| json_contains(spec, &desired_spec));
            if spec_matches && !metadata_drifted(&observed.metadata, &desired.metadata) {
                return Ok(Upsert::Unchanged);
            }
            adopt_metadata(&mut observed.metadata, &desired.metadata);
            if let Some(data) = observed.data.as_object_mut() {
                data.insert("spec".to_string(), desired_spec);
            }
            store.replace_dynamic(resource, &observed).await?;
            Ok(Upsert::Updated)
        }
    }
}

/// Whether every field set in `desired` has the same value in `observed`
///
/// Arrays must match element-wise; extra object keys on the observed side are
/// server defaults and ignored.
#[must_use]
pub fn json_contains(observed: &Value, desired: &Value) -> bool {
    match (observed, desired) {
        (Value::Object(o), Value::Object(d)) => d
            .iter()
            .all(|(k, dv)| o.get(k).is_some_and(|ov| json_contains(ov, dv))),
        (Value::Array(o), Value::Array(d)) => {
            o.len() == d.len() && o.iter().zip(d).all(|(ov, dv)| json_contains(ov, dv))
        }
        _ => observed == desired,
    }
}

fn is_subset(want: Option<&BTreeMap<String, String>>, have: Option<&BTreeMap<String, String>>) -> bool {
    want.is_none_or(|want| {
        want.iter()
            .all(|(k, v)| have.and_then(|h| h.get(k)) == Some(v))
    })
}

fn owners_present(observed: &ObjectMeta, desired: &ObjectMeta) -> bool {
    let observed_uids: Vec<&str> = observed
        .owner_references
        .iter()
        .flatten()
        .map(|r| r.uid.as_str())
        .collect();
    desired
        .owner_references
        .iter()
        .flatten()
        .all(|r| observed_uids.contains(&r.uid.as_str()))
}

/// Owned labels, owned annotations and owner references
#[must_use]
pub fn metadata_drifted(observed: &ObjectMeta, desired: &ObjectMeta) -> bool {
    !is_subset(desired.labels.as_ref(), observed.labels.as_ref())
        || !is_subset(desired.annotations.as_ref(), observed.annotations.as_ref())
        || !owners_present(observed, desired)
}

fn merge_map(target: &mut Option<BTreeMap<String, String>>, source: Option<&BTreeMap<String, String>>) {
    if let Some(source) = source {
        let target = target.get_or_insert_with(BTreeMap::new);
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
}

pub fn adopt_metadata(observed: &mut ObjectMeta, desired: &ObjectMeta) {
    merge_map(&mut observed.labels, desired.labels.as_ref());
    merge_map(&mut observed.annotations, desired.annotations.as_ref());
    for owner in desired.owner_references.iter().flatten() {
        let refs = observed.owner_references.get_or_insert_with(Vec::new);
        if !refs.iter().any(|r| r.uid == owner.uid) {
            refs.push(owner.clone());
        }
    }
}

impl OwnedObject for ConfigMap {
    fn drifted(&self, desired: &Self) -> bool {
        metadata_drifted(&self.metadata, &desired.metadata)
            || self.data != desired.data
            || self.binary_data != desired.binary_data
    }

    fn adopt(&mut self, desired: &Self) {
        adopt_metadata(&mut self.metadata, &desired.metadata);
        self.data.clone_from(&desired.data);
        self.binary_data.clone_from(&desired.binary_data);
    }
}

impl OwnedObject for Secret {
    fn drifted(&self, desired: &Self) -> bool {
        metadata_drifted(&self.metadata, &desired.metadata)
            || self.data != desired.data
            || (desired.type_.is_some() && self.type_ != desired.type_)
    }

    fn adopt(&mut self, desired: &Self) {
        adopt_metadata(&mut self.metadata, &desired.metadata);
        self.data.clone_from(&desired.data);
        if desired.type_.is_some() {
            self.type_.clone_from(&desired.type_);
        }
    }
}

impl OwnedObject for ServiceAccount {
    fn drifted(&self, desired: &Self) -> bool {
        metadata_drifted(&self.metadata, &desired.metadata)
    }

    fn adopt(&mut self, desired: &Self) {
        adopt_metadata(&mut self.metadata, &desired.metadata);
    }
}

impl OwnedObject for NetworkPolicy {
    fn drifted(&self, desired: &Self) -> bool {
        metadata_drifted(&self.metadata, &desired.metadata) || self.spec != desired.spec
    }

    fn adopt(&mut self, desired: &Self) {
        adopt_metadata(&mut self.metadata, &desired.metadata);
        self.spec.clone_from(&desired.spec);
    }
}

/// Storage requests are immutable once bound; claims are never updated.
impl OwnedObject for PersistentVolumeClaim {
    fn drifted(&self, _desired: &Self) -> bool {
        false
    }

    fn adopt(&mut self, _desired: &Self) {}
}

type PortKey = (Option<String>, i32, String, String);

fn service_ports(service: &Service) -> Vec<PortKey> {
    let mut ports: Vec<PortKey> = service
        .spec
        .iter()
        .flat_map(|s| s.ports.iter().flatten())
        .map(|p| {
            (
                p.name.clone(),
                p.port,
                p.target_port
                    .as_ref()
                    .map(|t| serde_json::to_string(t).unwrap_or_default())
                    .unwrap_or_default(),
                p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
            )
        })
        .collect();
    ports.sort();
    ports
}

impl OwnedObject for Service {
    fn drifted(&self, desired: &Self) -> bool {
        let selector = |s: &Service| s.spec.as_ref().and_then(|spec| spec.selector.clone());
        metadata_drifted(&self.metadata, &desired.metadata)
            || selector(self) != selector(desired)
            || service_ports(self) != service_ports(desired)
    }

    fn adopt(&mut self, desired: &Self) {
        adopt_metadata(&mut self.metadata, &desired.metadata);
        let Some(desired_spec) = desired.spec.as_ref() else {
            return;
        };
        let spec = self.spec.get_or_insert_with(Default::default);
        spec.selector.clone_from(&desired_spec.selector);
        spec.ports.clone_from(&desired_spec.ports);
    }
}

fn env_map(container: &Container) -> BTreeMap<String, (Option<String>, Option<String>)> {
    container
        .env
        .iter()
        .flatten()
        .map(|e| {
            (
                e.name.clone(),
                (
                    e.value.clone(),
                    e.value_from
                        .as_ref()
                        .map(|v| serde_json::to_string(v).unwrap_or_default()),
                ),
            )
        })
        .collect()
}

fn container_ports(container: &Container) -> Vec<(i32, Option<String>, String)> {
    let mut ports: Vec<_> = container
        .ports
        .iter()
        .flatten()
        .map(|p| {
            (
                p.container_port,
                p.name.clone(),
                p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
            )
        })
        .collect();
    ports.sort();
    ports
}

fn volume_mounts(container: &Container) -> Vec<(String, String, Option<String>, bool)> {
    let mut mounts: Vec<_> = container
        .volume_mounts
        .iter()
        .flatten()
        .map(|m| {
            (
                m.name.clone(),
                m.mount_path.clone(),
                m.sub_path.clone(),
                m.read_only.unwrap_or(false),
            )
        })
        .collect();
    mounts.sort();
    mounts
}

fn container_drifted(observed: &Container, desired: &Container) -> bool {
    observed.image != desired.image
        || observed.args != desired.args
        || observed.command != desired.command
        || env_map(observed) != env_map(desired)
        || container_ports(observed) != container_ports(desired)
        || observed.resources.clone().unwrap_or_default()
            != desired.resources.clone().unwrap_or_default()
        || volume_mounts(observed) != volume_mounts(desired)
        || (desired.image_pull_policy.is_some()
            && observed.image_pull_policy != desired.image_pull_policy)
}

fn containers_drifted(observed: Option<&Vec<Container>>, desired: Option<&Vec<Container>>) -> bool {
    let observed = observed.map(Vec::as_slice).unwrap_or_default();
    let desired = desired.map(Vec::as_slice).unwrap_or_default();
    observed.len() != desired.len()
        || desired.iter().any(|d| {
            observed
                .iter()
                .find(|o| o.name == d.name)
                .is_none_or(|o| container_drifted(o, d))
        })
}

/// Volume name plus the object it draws from
fn volume_sources(volumes: Option<&Vec<Volume>>) -> Vec<(String, String)> {
    let mut sources: Vec<_> = volumes
        .into_iter()
        .flatten()
        .map(|v| {
            let source = if let Some(secret) = &v.secret {
                format!("secret:{}", secret.secret_name.clone().unwrap_or_default())
            } else if let Some(cm) = &v.config_map {
                format!("configMap:{}", cm.name)
            } else if let Some(pvc) = &v.persistent_volume_claim {
                format!("pvc:{}", pvc.claim_name)
            } else if v.empty_dir.is_some() {
                "emptyDir".to_string()
            } else {
                "other".to_string()
            };
            (v.name.clone(), source)
        })
        .collect();
    sources.sort();
    sources
}

fn pod_spec_drifted(observed: Option<&PodSpec>, desired: Option<&PodSpec>) -> bool {
    let (Some(observed), Some(desired)) = (observed, desired) else {
        return observed.is_none() && desired.is_some();
    };
    (desired.service_account_name.is_some()
        && observed.service_account_name != desired.service_account_name)
        || containers_drifted(Some(&observed.containers), Some(&desired.containers))
        || containers_drifted(
            observed.init_containers.as_ref(),
            desired.init_containers.as_ref(),
        )
        || volume_sources(observed.volumes.as_ref()) != volume_sources(desired.volumes.as_ref())
}

fn deployment_spec_drifted(observed: &DeploymentSpec, desired: &DeploymentSpec) -> bool {
    let template_meta_drifted = match (&observed.template.metadata, &desired.template.metadata) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(o), Some(d)) => {
            !is_subset(d.labels.as_ref(), o.labels.as_ref())
                || !is_subset(d.annotations.as_ref(), o.annotations.as_ref())
        }
    };
    (desired.replicas.is_some() && observed.replicas != desired.replicas)
        || observed.selector != desired.selector
        || template_meta_drifted
        || pod_spec_drifted(observed.template.spec.as_ref(), desired.template.spec.as_ref())
}

impl OwnedObject for Deployment {
    fn drifted(&self, desired: &Self) -> bool {
        if metadata_drifted(&self.metadata, &desired.metadata) {
            return true;
        }
        match (&self.spec, &desired.spec) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(o), Some(d)) => deployment_spec_drifted(o, d),
        }
    }

    fn adopt(&mut self, desired: &Self) {
        adopt_metadata(&mut self.metadata, &desired.metadata);
        let Some(desired_spec) = desired.spec.as_ref() else {
            return;
        };
        let Some(spec) = self.spec.as_mut() else {
            self.spec = Some(desired_spec.clone());
            return;
        };
        spec.replicas = desired_spec.replicas;
        spec.selector.clone_from(&desired_spec.selector);
        if let Some(desired_meta) = &desired_spec.template.metadata {
            let meta = spec.template.metadata.get_or_insert_with(ObjectMeta::default);
            merge_map(&mut meta.labels, desired_meta.labels.as_ref());
            merge_map(&mut meta.annotations, desired_meta.annotations.as_ref());
        }
        match (&mut spec.template.spec, &desired_spec.template.spec) {
            (Some(pod), Some(desired_pod)) => {
                pod.containers.clone_from(&desired_pod.containers);
                pod.init_containers.clone_from(&desired_pod.init_containers);
                pod.volumes.clone_from(&desired_pod.volumes);
                if desired_pod.service_account_name.is_some() {
                    pod.service_account_name
                        .clone_from(&desired_pod.service_account_name);
                }
            }
            (pod, desired_pod) => pod.clone_from(desired_pod),
        }
    }
}
