//! # External References
//!
//! Secrets and ConfigMaps the `AssistantConfig` points at but does not own:
//! provider credentials, the custom TLS secret and the additional CA bundle.
//!
//! Each pass they are validated, marked with the watcher annotation, and
//! recorded in a freshly rebuilt [`WatcherConfig`] so the watch filter can
//! route their changes to the right workloads.

use crate::config::{ObjectKey, WatchedKind, WatcherConfig};
use crate::constants::{
    CREDENTIALS_TOKEN_KEY, SINGLETON_NAME, TLS_CERT_KEY, TLS_KEY_KEY, WATCHER_ANNOTATION,
};
use crate::crd::{AssistantConfig, Workload, WorkloadRef};
use crate::store::{Store, StoreError, TypedObject};
use base64::Engine;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Every problem found with the referenced objects in one pass
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .0.join("; "))]
pub struct ValidationErrors(pub Vec<String>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePurpose {
    ProviderCredentials,
    Tls,
    AdditionalCa,
}

/// One object referenced by the `AssistantConfig`
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalReference {
    pub kind: WatchedKind,
    pub name: String,
    pub purpose: ReferencePurpose,
    /// Workloads restarted when the object's payload changes
    pub workloads: Vec<WorkloadRef>,
}

/// All external references of `config`, credentials first.
#[must_use]
pub fn external_references(config: &AssistantConfig) -> Vec<ExternalReference> {
    let spec = &config.spec;
    let mut refs: Vec<ExternalReference> = spec
        .llm
        .providers
        .iter()
        .map(|p| ExternalReference {
            kind: WatchedKind::Secret,
            name: p.credentials_secret_ref.name.clone(),
            purpose: ReferencePurpose::ProviderCredentials,
            workloads: vec![WorkloadRef::ActiveBackend],
        })
        .collect();
    if let Some(tls) = &spec.api.tls_config {
        refs.push(ExternalReference {
            kind: WatchedKind::Secret,
            name: tls.key_cert_secret_ref.name.clone(),
            purpose: ReferencePurpose::Tls,
            // The console proxies to the backend and trusts this certificate
            workloads: vec![
                WorkloadRef::Workload(Workload::ConsolePlugin),
                WorkloadRef::ActiveBackend,
            ],
        });
    }
    if let Some(ca) = &spec.api.additional_ca_config_map_ref {
        refs.push(ExternalReference {
            kind: WatchedKind::ConfigMap,
            name: ca.name.clone(),
            purpose: ReferencePurpose::AdditionalCa,
            workloads: vec![WorkloadRef::ActiveBackend],
        });
    }
    refs
}

/// Workloads for `kind`/`name` if the live `config` still references it
#[must_use]
pub fn referenced_workloads(
    config: &AssistantConfig,
    kind: WatchedKind,
    name: &str,
) -> Option<Vec<WorkloadRef>> {
    let mut found: Option<Vec<WorkloadRef>> = None;
    for reference in external_references(config) {
        if reference.kind == kind && reference.name == name {
            let workloads = found.get_or_insert_with(Vec::new);
            for w in reference.workloads {
                if !workloads.contains(&w) {
                    workloads.push(w);
                }
            }
        }
    }
    found
}

fn secret_value<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| b.0.as_slice())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(String::as_bytes)
        })
        .filter(|v| !v.is_empty())
}

/// Number of well-formed PEM certificate blocks in `text`
#[must_use]
pub fn count_pem_certificates(text: &str) -> usize {
    let mut count = 0;
    let mut rest = text;
    while let Some(start) = rest.find(PEM_BEGIN) {
        let after_begin = &rest[start + PEM_BEGIN.len()..];
        let Some(end) = after_begin.find(PEM_END) else {
            break;
        };
        let body: String = after_begin[..end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if !body.is_empty()
            && base64::engine::general_purpose::STANDARD
                .decode(body.as_bytes())
                .is_ok()
        {
            count += 1;
        }
        rest = &after_begin[end + PEM_END.len()..];
    }
    count
}

fn check_credentials(name: &str, secret: &Secret, problems: &mut Vec<String>) {
    if secret_value(secret, CREDENTIALS_TOKEN_KEY).is_none() {
        problems.push(format!(
            "credentials secret {name} is missing key {CREDENTIALS_TOKEN_KEY}"
        ));
    }
}

fn check_tls(name: &str, secret: &Secret, problems: &mut Vec<String>) {
    for key in [TLS_CERT_KEY, TLS_KEY_KEY] {
        if secret_value(secret, key).is_none() {
            problems.push(format!("TLS secret {name} is missing key {key}"));
        }
    }
}

fn check_ca_bundle(name: &str, config_map: &ConfigMap, problems: &mut Vec<String>) {
    let entries: BTreeMap<&str, &str> = config_map
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    if entries.is_empty() {
        problems.push(format!("CA ConfigMap {name} contains no certificates"));
    }
    for (key, value) in entries {
        if count_pem_certificates(value) == 0 {
            problems.push(format!(
                "CA ConfigMap {name} key {key} contains no PEM certificate"
            ));
        }
    }
}

/// Check that every referenced object exists and carries the required data.
///
/// Store failures other than NotFound abort; content problems are collected.
pub async fn validate_references(
    store: &Store,
    namespace: &str,
    references: &[ExternalReference],
) -> Result<Result<(), ValidationErrors>, StoreError> {
    let mut problems = Vec::new();
    for reference in references {
        let name = reference.name.as_str();
        match reference.kind {
            WatchedKind::Secret => {
                let Some(secret) = store.get::<Secret>(Some(namespace), name).await? else {
                    problems.push(format!("secret {namespace}/{name} not found"));
                    continue;
                };
                match reference.purpose {
                    ReferencePurpose::Tls => check_tls(name, &secret, &mut problems),
                    _ => check_credentials(name, &secret, &mut problems),
                }
            }
            WatchedKind::ConfigMap => {
                let Some(config_map) = store.get::<ConfigMap>(Some(namespace), name).await? else {
                    problems.push(format!("ConfigMap {namespace}/{name} not found"));
                    continue;
                };
                check_ca_bundle(name, &config_map, &mut problems);
            }
        }
    }
    if problems.is_empty() {
        Ok(Ok(()))
    } else {
        Ok(Err(ValidationErrors(problems)))
    }
}

async fn mark<K: TypedObject>(store: &Store, namespace: &str, name: &str) -> Result<bool, StoreError> {
    let Some(mut object) = store.get::<K>(Some(namespace), name).await? else {
        return Ok(false);
    };
    let annotations = object
        .meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new);
    if annotations.get(WATCHER_ANNOTATION).map(String::as_str) == Some(SINGLETON_NAME) {
        return Ok(false);
    }
    annotations.insert(WATCHER_ANNOTATION.to_string(), SINGLETON_NAME.to_string());
    store.replace(&object).await?;
    info!(
        kind = %K::kind(&()),
        namespace,
        name,
        "🏷️  Applied watcher annotation"
    );
    Ok(true)
}

/// Apply the watcher marker to one referenced object.
///
/// Returns whether a write was made; an already-marked or missing object is left alone.
pub async fn annotate(
    store: &Store,
    kind: WatchedKind,
    namespace: &str,
    name: &str,
) -> Result<bool, StoreError> {
    match kind {
        WatchedKind::Secret => mark::<Secret>(store, namespace, name).await,
        WatchedKind::ConfigMap => mark::<ConfigMap>(store, namespace, name).await,
    }
}

/// Routing table for the current references of `config`.
#[must_use]
pub fn rebuild_watcher_config(
    previous: &WatcherConfig,
    config: &AssistantConfig,
    namespace: &str,
    references: &[ExternalReference],
) -> WatcherConfig {
    previous.rebuilt(
        config.spec.api.backend,
        references.iter().map(|r| {
            (
                r.kind,
                ObjectKey::new(namespace, &r.name),
                r.workloads.clone(),
            )
        }),
    )
}

/// Mark every reference, continuing past failures.
pub async fn annotate_all(
    store: &Store,
    namespace: &str,
    references: &[ExternalReference],
) -> Result<usize, Vec<String>> {
    let mut written = 0;
    let mut failures = Vec::new();
    for reference in references {
        match annotate(store, reference.kind, namespace, &reference.name).await {
            Ok(true) => written += 1,
            Ok(false) => {}
            Err(e) => failures.push(format!(
                "failed to annotate {} {namespace}/{}: {e}",
                reference.kind.as_str(),
                reference.name
            )),
        }
    }
    debug!(written, failed = failures.len(), "Annotated external references");
    if failures.is_empty() {
        Ok(written)
    } else {
        Err(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ApiBackend;

    const CERT: &str = "-----BEGIN CERTIFICATE-----\nTUlJQmZqQ0NBU1NnQXdJQkFnSVVUZXN0\n-----END CERTIFICATE-----\n";

    fn config(yaml: &str) -> AssistantConfig {
        let spec = serde_yaml::from_str(yaml).unwrap();
        AssistantConfig::new(SINGLETON_NAME, spec)
    }

    fn full_config() -> AssistantConfig {
        config(
            r"
llm:
  providers:
    - name: openai
      type: openai
      credentialsSecretRef: {name: openai-creds}
      models: [{name: gpt-4o}]
api:
  tlsConfig:
    keyCertSecretRef: {name: custom-tls}
  additionalCaConfigMapRef: {name: extra-ca}
",
        )
    }

    #[test]
    fn test_references_cover_credentials_tls_and_ca() {
        let refs = external_references(&full_config());
        let names: Vec<&str> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["openai-creds", "custom-tls", "extra-ca"]);
        assert_eq!(refs[2].kind, WatchedKind::ConfigMap);
        assert_eq!(
            refs[1].workloads,
            vec![
                WorkloadRef::Workload(Workload::ConsolePlugin),
                WorkloadRef::ActiveBackend
            ]
        );
    }

    #[test]
    fn test_referenced_workloads_only_for_live_references() {
        let config = full_config();
        assert!(referenced_workloads(&config, WatchedKind::Secret, "openai-creds").is_some());
        assert!(referenced_workloads(&config, WatchedKind::ConfigMap, "openai-creds").is_none());
        assert!(referenced_workloads(&config, WatchedKind::Secret, "old-creds").is_none());
    }

    #[test]
    fn test_pem_counting() {
        assert_eq!(count_pem_certificates(CERT), 1);
        assert_eq!(count_pem_certificates(&format!("{CERT}{CERT}")), 2);
        assert_eq!(count_pem_certificates("not a cert"), 0);
        assert_eq!(
            count_pem_certificates("-----BEGIN CERTIFICATE-----\n!!!\n-----END CERTIFICATE-----"),
            0
        );
    }

    #[test]
    fn test_watcher_config_rebuilt_from_references() {
        let mut config = full_config();
        config.spec.api.backend = ApiBackend::Core;
        let refs = external_references(&config);
        let previous = WatcherConfig::new(crate::config::SystemResources::default());
        let rebuilt = rebuild_watcher_config(&previous, &config, "ns", &refs);
        assert_eq!(rebuilt.active_backend, ApiBackend::Core);
        let key = ObjectKey::new("ns", "custom-tls");
        let workloads = rebuilt
            .annotated(WatchedKind::Secret, &key)
            .map(|w| rebuilt.resolve(w));
        assert_eq!(
            workloads,
            Some(vec![Workload::ConsolePlugin, Workload::Core])
        );
    }
}
