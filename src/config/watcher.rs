//! # Watcher Configuration
//!
//! Which external Secrets and ConfigMaps should restart which workloads.
//!
//! Two sources feed it:
//! - **system resources**: fixed namespace+name entries the stack depends on but
//!   does not own (the cluster pull secret, the namespace CA bundle). Loaded once
//!   at startup, optionally from a YAML file.
//! - **annotated resources**: objects referenced by the `AssistantConfig`, found
//!   again on every reconcile pass and swapped in wholesale.

use crate::constants::{PULL_SECRET_NAME, PULL_SECRET_NAMESPACE, ROOT_CA_CONFIGMAP};
use crate::crd::{ApiBackend, Workload, WorkloadRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Shared handle: the reconciler replaces the value, watch tasks read it
pub type SharedWatcherConfig = Arc<RwLock<WatcherConfig>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedKind {
    Secret,
    ConfigMap,
}

impl WatchedKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchedKind::Secret => "Secret",
            WatchedKind::ConfigMap => "ConfigMap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A watch target identified by namespace and name
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemResource {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub affected_workloads: Vec<WorkloadRef>,
}

impl SystemResource {
    fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// On-disk shape of the system resource list
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemResources {
    #[serde(default)]
    pub secrets: Vec<SystemResource>,
    #[serde(default)]
    pub config_maps: Vec<SystemResource>,
}

#[derive(Debug, Error)]
pub enum WatcherConfigError {
    #[error("failed to read watcher configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse watcher configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid system resource {kind} {key}: {reason}")]
    Invalid {
        kind: &'static str,
        key: ObjectKey,
        reason: String,
    },
}

impl SystemResources {
    /// Resources every installation depends on
    #[must_use]
    pub fn defaults(namespace: &str) -> Self {
        Self {
            secrets: vec![SystemResource {
                namespace: PULL_SECRET_NAMESPACE.to_string(),
                name: PULL_SECRET_NAME.to_string(),
                description: "cluster pull secret used for telemetry".to_string(),
                affected_workloads: vec![WorkloadRef::ActiveBackend],
            }],
            config_maps: vec![SystemResource {
                namespace: namespace.to_string(),
                name: ROOT_CA_CONFIGMAP.to_string(),
                description: "cluster CA bundle trusted by the API backend".to_string(),
                affected_workloads: vec![WorkloadRef::ActiveBackend],
            }],
        }
    }

    /// Load from a YAML file when a path is given, otherwise use the defaults.
    pub fn load(path: Option<&str>, namespace: &str) -> Result<Self, WatcherConfigError> {
        let Some(path) = path else {
            return Ok(Self::defaults(namespace));
        };
        let raw = std::fs::read_to_string(path).map_err(|source| WatcherConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let resources = Self::from_yaml(&raw)?;
        Ok(resources)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, WatcherConfigError> {
        let resources: Self = serde_yaml::from_str(raw)?;
        resources.validate()?;
        Ok(resources)
    }

    /// Reject entries that cannot be resolved to a restart unambiguously.
    pub fn validate(&self) -> Result<(), WatcherConfigError> {
        for (kind, entries) in [
            (WatchedKind::Secret, &self.secrets),
            (WatchedKind::ConfigMap, &self.config_maps),
        ] {
            let mut seen = BTreeSet::new();
            for entry in entries {
                let invalid = |reason: &str| WatcherConfigError::Invalid {
                    kind: kind.as_str(),
                    key: entry.key(),
                    reason: reason.to_string(),
                };
                if entry.namespace.is_empty() || entry.name.is_empty() {
                    return Err(invalid("namespace and name are required"));
                }
                if entry.affected_workloads.is_empty() {
                    return Err(invalid("at least one affected workload is required"));
                }
                let names_app_server = entry
                    .affected_workloads
                    .contains(&WorkloadRef::Workload(Workload::AppServer));
                let names_core = entry
                    .affected_workloads
                    .contains(&WorkloadRef::Workload(Workload::Core));
                if names_app_server && names_core {
                    return Err(invalid(
                        "only one API backend is active at a time; use ACTIVE_BACKEND",
                    ));
                }
                if !seen.insert(entry.key()) {
                    return Err(invalid("listed more than once"));
                }
            }
        }
        Ok(())
    }
}

/// Routing table consulted by the watch filter
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherConfig {
    pub system: SystemResources,
    pub active_backend: ApiBackend,
    annotated_secrets: HashMap<ObjectKey, Vec<WorkloadRef>>,
    annotated_config_maps: HashMap<ObjectKey, Vec<WorkloadRef>>,
}

impl WatcherConfig {
    #[must_use]
    pub fn new(system: SystemResources) -> Self {
        Self {
            system,
            active_backend: ApiBackend::default(),
            annotated_secrets: HashMap::new(),
            annotated_config_maps: HashMap::new(),
        }
    }

    /// Fresh config for one pass: same system resources, new annotated entries.
    #[must_use]
    pub fn rebuilt(
        &self,
        active_backend: ApiBackend,
        annotated: impl IntoIterator<Item = (WatchedKind, ObjectKey, Vec<WorkloadRef>)>,
    ) -> Self {
        let mut next = Self::new(self.system.clone());
        next.active_backend = active_backend;
        for (kind, key, workloads) in annotated {
            next.annotated_mut(kind)
                .entry(key)
                .or_default()
                .extend(workloads);
        }
        next
    }

    fn annotated_mut(&mut self, kind: WatchedKind) -> &mut HashMap<ObjectKey, Vec<WorkloadRef>> {
        match kind {
            WatchedKind::Secret => &mut self.annotated_secrets,
            WatchedKind::ConfigMap => &mut self.annotated_config_maps,
        }
    }

    /// Workloads recorded for an annotated object, if the last pass mapped it explicitly
    #[must_use]
    pub fn annotated(&self, kind: WatchedKind, key: &ObjectKey) -> Option<&[WorkloadRef]> {
        let map = match kind {
            WatchedKind::Secret => &self.annotated_secrets,
            WatchedKind::ConfigMap => &self.annotated_config_maps,
        };
        map.get(key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn system_resource(&self, kind: WatchedKind, key: &ObjectKey) -> Option<&SystemResource> {
        let entries = match kind {
            WatchedKind::Secret => &self.system.secrets,
            WatchedKind::ConfigMap => &self.system.config_maps,
        };
        entries
            .iter()
            .find(|e| e.namespace == key.namespace && e.name == key.name)
    }

    /// Resolve aliases against the active backend; order kept, duplicates dropped.
    #[must_use]
    pub fn resolve(&self, refs: &[WorkloadRef]) -> Vec<Workload> {
        let mut resolved = Vec::with_capacity(refs.len());
        for workload in refs.iter().map(|r| r.resolve(self.active_backend)) {
            if !resolved.contains(&workload) {
                resolved.push(workload);
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let defaults = SystemResources::defaults("octopilot-assistant");
        defaults.validate().unwrap();
        assert_eq!(defaults.config_maps[0].namespace, "octopilot-assistant");
        assert_eq!(defaults.secrets[0].name, "pull-secret");
    }

    #[test]
    fn test_yaml_round_trips_aliases() {
        let raw = r#"
secrets:
  - namespace: openshift-config
    name: pull-secret
    affectedWorkloads: [ACTIVE_BACKEND, assistant-console-plugin]
configMaps:
  - namespace: octopilot-assistant
    name: trusted-ca
    description: proxy CA
    affectedWorkloads: [assistant-postgres-server]
"#;
        let resources = SystemResources::from_yaml(raw).unwrap();
        assert_eq!(
            resources.secrets[0].affected_workloads,
            vec![
                WorkloadRef::ActiveBackend,
                WorkloadRef::Workload(Workload::ConsolePlugin)
            ]
        );
        assert_eq!(resources.config_maps[0].description, "proxy CA");
    }

    #[test]
    fn test_rejects_both_concrete_backends() {
        let raw = r#"
secrets:
  - namespace: ns
    name: creds
    affectedWorkloads: [assistant-app-server, assistant-core]
"#;
        let err = SystemResources::from_yaml(raw).unwrap_err();
        assert!(err.to_string().contains("ACTIVE_BACKEND"), "{err}");
    }

    #[test]
    fn test_rejects_unknown_workload() {
        let raw = r#"
configMaps:
  - namespace: ns
    name: cm
    affectedWorkloads: [some-other-deployment]
"#;
        assert!(matches!(
            SystemResources::from_yaml(raw),
            Err(WatcherConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_empty_affected_list() {
        let raw = r#"
configMaps:
  - namespace: ns
    name: cm
    affectedWorkloads: []
"#;
        assert!(matches!(
            SystemResources::from_yaml(raw),
            Err(WatcherConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rebuild_replaces_annotated_entries() {
        let base = WatcherConfig::new(SystemResources::default());
        let key = ObjectKey::new("ns", "tls");
        let first = base.rebuilt(
            ApiBackend::AppServer,
            [(
                WatchedKind::Secret,
                key.clone(),
                vec![WorkloadRef::Workload(Workload::ConsolePlugin)],
            )],
        );
        assert!(first.annotated(WatchedKind::Secret, &key).is_some());

        let second = first.rebuilt(ApiBackend::Core, []);
        assert!(second.annotated(WatchedKind::Secret, &key).is_none());
        assert_eq!(second.active_backend, ApiBackend::Core);
    }

    #[test]
    fn test_resolve_dedups_alias_and_concrete() {
        let mut config = WatcherConfig::new(SystemResources::default());
        config.active_backend = ApiBackend::Core;
        let resolved = config.resolve(&[
            WorkloadRef::ActiveBackend,
            WorkloadRef::Workload(Workload::Core),
            WorkloadRef::Workload(Workload::ConsolePlugin),
        ]);
        assert_eq!(resolved, vec![Workload::Core, Workload::ConsolePlugin]);
    }
}
