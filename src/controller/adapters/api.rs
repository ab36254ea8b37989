//! API backend (app server or core).
//!
//! Both backends read the same rendered configuration file; they differ in
//! image and workload name. Switching `api.backend` retires the objects the
//! other backend left behind.

use super::{
    digest, labels, resource_requirements, selector_labels, upsert, AdapterContext, AdapterError,
    SERVING_CERT_ANNOTATION,
};
use crate::constants::{
    API_SERVICE_PORT, CONFIG_HASH_ANNOTATION, CREDENTIALS_TOKEN_KEY, POSTGRES_DATABASE,
    POSTGRES_DEPLOYMENT, POSTGRES_PASSWORD_KEY, POSTGRES_PORT, POSTGRES_USER, TLS_CERT_KEY,
    TLS_KEY_KEY,
};
use crate::crd::{ApiBackend, AssistantConfig, CacheType};
use crate::store::{is_owned_by, StoreError, TypedObject};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Service, ServiceAccount, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;
use kube::Resource;
use std::collections::BTreeMap;
use tracing::{debug, info};

const COMPONENT: &str = "api";
const CONFIG_KEY: &str = "config.yaml";
const CONFIG_DIR: &str = "/etc/assistant";
const CREDENTIALS_DIR: &str = "/etc/credentials";
const TLS_DIR: &str = "/etc/certs/tls";
const EXTRA_CA_DIR: &str = "/etc/certs/extra-ca";
const POSTGRES_SECRET_DIR: &str = "/etc/credentials/postgres";

fn config_map_name(backend: ApiBackend) -> String {
    format!("{}-config", backend.workload().deployment_name())
}

/// Secret holding the serving certificate: the user's, or the service-CA issued one
fn tls_secret_name(config: &AssistantConfig, backend: ApiBackend) -> String {
    config
        .spec
        .api
        .tls_config
        .as_ref()
        .map_or_else(
            || format!("{}-tls", backend.workload().deployment_name()),
            |tls| tls.key_cert_secret_ref.name.clone(),
        )
}

#[derive(Debug, Serialize)]
struct RenderedConfig {
    llm_providers: Vec<RenderedProvider>,
    service: RenderedService,
    #[serde(skip_serializing_if = "Option::is_none")]
    defaults: Option<RenderedDefaults>,
    conversation_cache: RenderedCache,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    extra_ca: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RenderedProvider {
    name: String,
    #[serde(rename = "type")]
    provider_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    credentials_path: String,
    models: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RenderedService {
    port: i32,
    log_level: String,
    tls_cert_path: String,
    tls_key_path: String,
}

#[derive(Debug, Serialize)]
struct RenderedDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RenderedCache {
    Memory,
    Postgres {
        host: String,
        port: i32,
        dbname: String,
        user: String,
        password_path: String,
    },
}

/// Backend configuration file contents
pub(crate) fn render_config(config: &AssistantConfig, namespace: &str) -> Result<String, AdapterError> {
    let spec = &config.spec;
    let rendered = RenderedConfig {
        llm_providers: spec
            .llm
            .providers
            .iter()
            .map(|p| RenderedProvider {
                name: p.name.clone(),
                provider_type: p.provider_type.clone(),
                url: p.url.clone(),
                credentials_path: format!(
                    "{CREDENTIALS_DIR}/{}/{CREDENTIALS_TOKEN_KEY}",
                    p.credentials_secret_ref.name
                ),
                models: p.models.iter().map(|m| m.name.clone()).collect(),
            })
            .collect(),
        service: RenderedService {
            port: API_SERVICE_PORT,
            log_level: spec.api.log_level.clone(),
            tls_cert_path: format!("{TLS_DIR}/{TLS_CERT_KEY}"),
            tls_key_path: format!("{TLS_DIR}/{TLS_KEY_KEY}"),
        },
        defaults: (spec.api.default_provider.is_some() || spec.api.default_model.is_some()).then(
            || RenderedDefaults {
                provider: spec.api.default_provider.clone(),
                model: spec.api.default_model.clone(),
            },
        ),
        conversation_cache: match spec.cache.cache_type {
            CacheType::Memory => RenderedCache::Memory,
            CacheType::Postgres => RenderedCache::Postgres {
                host: format!("{POSTGRES_DEPLOYMENT}.{namespace}.svc"),
                port: POSTGRES_PORT,
                dbname: POSTGRES_DATABASE.to_string(),
                user: POSTGRES_USER.to_string(),
                password_path: format!("{POSTGRES_SECRET_DIR}/{POSTGRES_PASSWORD_KEY}"),
            },
        },
        extra_ca: spec
            .api
            .additional_ca_config_map_ref
            .iter()
            .map(|_| EXTRA_CA_DIR.to_string())
            .collect(),
    };
    serde_yaml::to_string(&rendered).map_err(|e| AdapterError::Render {
        what: config_map_name(spec.api.backend),
        message: e.to_string(),
    })
}

fn service_account(ctx: &AdapterContext, backend: ApiBackend) -> ServiceAccount {
    ServiceAccount {
        metadata: ctx.metadata(backend.workload().deployment_name(), COMPONENT),
        ..ServiceAccount::default()
    }
}

fn config_map(ctx: &AdapterContext, backend: ApiBackend, rendered: &str) -> ConfigMap {
    ConfigMap {
        metadata: ctx.metadata(&config_map_name(backend), COMPONENT),
        data: Some(BTreeMap::from([(CONFIG_KEY.to_string(), rendered.to_string())])),
        ..ConfigMap::default()
    }
}

fn service(ctx: &AdapterContext, config: &AssistantConfig, backend: ApiBackend) -> Service {
    let name = backend.workload().deployment_name();
    let mut metadata = ctx.metadata(name, COMPONENT);
    if config.spec.api.tls_config.is_none() {
        metadata.annotations = Some(BTreeMap::from([(
            SERVING_CERT_ANNOTATION.to_string(),
            tls_secret_name(config, backend),
        )]));
    }
    Service {
        metadata,
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(name)),
            ports: Some(vec![ServicePort {
                name: Some("https".to_string()),
                port: API_SERVICE_PORT,
                target_port: Some(IntOrString::Int(API_SERVICE_PORT)),
                protocol: Some("TCP".to_string()),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

fn network_policy(ctx: &AdapterContext, backend: ApiBackend) -> NetworkPolicy {
    let name = backend.workload().deployment_name();
    NetworkPolicy {
        metadata: ctx.metadata(name, COMPONENT),
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..LabelSelector::default()
            }),
            ingress: Some(vec![NetworkPolicyIngressRule {
                ports: Some(vec![NetworkPolicyPort {
                    port: Some(IntOrString::Int(API_SERVICE_PORT)),
                    protocol: Some("TCP".to_string()),
                    ..NetworkPolicyPort::default()
                }]),
                ..NetworkPolicyIngressRule::default()
            }]),
            policy_types: Some(vec!["Ingress".to_string()]),
            ..NetworkPolicySpec::default()
        }),
        ..NetworkPolicy::default()
    }
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            default_mode: Some(420),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            default_mode: Some(420),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..VolumeMount::default()
    }
}

fn deployment(
    ctx: &AdapterContext,
    config: &AssistantConfig,
    backend: ApiBackend,
    rendered: &str,
) -> Deployment {
    let spec = &config.spec;
    let name = backend.workload().deployment_name();
    let image = match backend {
        ApiBackend::AppServer => ctx.images.app_server.clone(),
        ApiBackend::Core => ctx.images.core.clone(),
    };

    let mut volumes = vec![
        config_map_volume("config", &config_map_name(backend)),
        secret_volume("tls", &tls_secret_name(config, backend)),
    ];
    let mut mounts = vec![mount("config", CONFIG_DIR), mount("tls", TLS_DIR)];
    for provider in &spec.llm.providers {
        let volume = format!("credentials-{}", provider.name);
        mounts.push(mount(
            &volume,
            &format!("{CREDENTIALS_DIR}/{}", provider.credentials_secret_ref.name),
        ));
        volumes.push(secret_volume(&volume, &provider.credentials_secret_ref.name));
    }
    if spec.cache.cache_type == CacheType::Postgres {
        volumes.push(secret_volume("postgres-credentials", super::cache::CREDENTIALS_SECRET));
        mounts.push(mount("postgres-credentials", POSTGRES_SECRET_DIR));
    }
    if let Some(ca) = &spec.api.additional_ca_config_map_ref {
        volumes.push(config_map_volume("extra-ca", &ca.name));
        mounts.push(mount("extra-ca", EXTRA_CA_DIR));
    }

    Deployment {
        metadata: ctx.metadata(name, COMPONENT),
        spec: Some(DeploymentSpec {
            replicas: Some(spec.api.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(name, COMPONENT)),
                    annotations: Some(BTreeMap::from([(
                        CONFIG_HASH_ANNOTATION.to_string(),
                        digest([rendered]),
                    )])),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(name.to_string()),
                    containers: vec![Container {
                        name: "api".to_string(),
                        image: Some(image),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        env: Some(vec![
                            EnvVar {
                                name: "ASSISTANT_CONFIG".to_string(),
                                value: Some(format!("{CONFIG_DIR}/{CONFIG_KEY}")),
                                ..EnvVar::default()
                            },
                            EnvVar {
                                name: "LOG_LEVEL".to_string(),
                                value: Some(spec.api.log_level.clone()),
                                ..EnvVar::default()
                            },
                        ]),
                        ports: Some(vec![ContainerPort {
                            name: Some("https".to_string()),
                            container_port: API_SERVICE_PORT,
                            protocol: Some("TCP".to_string()),
                            ..ContainerPort::default()
                        }]),
                        resources: resource_requirements(spec.api.resources.as_ref()),
                        volume_mounts: Some(mounts),
                        ..Container::default()
                    }],
                    volumes: Some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

pub(super) async fn ensure_resources(
    ctx: &AdapterContext,
    config: &AssistantConfig,
    backend: ApiBackend,
) -> Result<(), AdapterError> {
    let rendered = render_config(config, &ctx.namespace)?;
    upsert(&ctx.store, &service_account(ctx, backend)).await?;
    upsert(&ctx.store, &config_map(ctx, backend, &rendered)).await?;
    upsert(&ctx.store, &service(ctx, config, backend)).await?;
    upsert(&ctx.store, &network_policy(ctx, backend)).await?;
    Ok(())
}

pub(super) async fn ensure_deployment(
    ctx: &AdapterContext,
    config: &AssistantConfig,
    backend: ApiBackend,
) -> Result<(), AdapterError> {
    let rendered = render_config(config, &ctx.namespace)?;
    upsert(&ctx.store, &deployment(ctx, config, backend, &rendered)).await?;
    retire(ctx, inactive(backend)).await?;
    Ok(())
}

fn inactive(backend: ApiBackend) -> ApiBackend {
    match backend {
        ApiBackend::AppServer => ApiBackend::Core,
        ApiBackend::Core => ApiBackend::AppServer,
    }
}

/// Remove the workload objects of a backend that is no longer selected.
///
/// Objects with that name but no owner reference to this `AssistantConfig`
/// are left alone.
async fn retire(ctx: &AdapterContext, backend: ApiBackend) -> Result<(), AdapterError> {
    let name = backend.workload().deployment_name();
    let removed = delete_if_owned::<Deployment>(ctx, name).await?
        | delete_if_owned::<Service>(ctx, name).await?
        | delete_if_owned::<NetworkPolicy>(ctx, name).await?
        | delete_if_owned::<ServiceAccount>(ctx, name).await?
        | delete_if_owned::<ConfigMap>(ctx, &config_map_name(backend)).await?;
    if removed {
        info!(backend = name, "Retired inactive API backend");
    }
    Ok(())
}

async fn delete_if_owned<K: TypedObject>(ctx: &AdapterContext, name: &str) -> Result<bool, StoreError> {
    let ns = Some(ctx.namespace.as_str());
    let Some(existing) = ctx.store.get::<K>(ns, name).await? else {
        return Ok(false);
    };
    if !is_owned_by(existing.meta(), &ctx.owner.uid) {
        debug!(kind = %K::kind(&()), name, "Not owned by AssistantConfig, leaving in place");
        return Ok(false);
    }
    ctx.store.delete::<K>(ns, name).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> AssistantConfig {
        let spec = serde_yaml::from_str(yaml).unwrap();
        AssistantConfig::new("cluster", spec)
    }

    #[test]
    fn test_render_postgres_cache_and_providers() {
        let config = config(
            r"
llm:
  providers:
    - name: openai
      type: openai
      credentialsSecretRef: {name: openai-creds}
      models: [{name: gpt-4o}]
api:
  defaultProvider: openai
",
        );
        let rendered = render_config(&config, "ns").unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(
            value["llm_providers"][0]["credentials_path"].as_str(),
            Some("/etc/credentials/openai-creds/apitoken")
        );
        assert_eq!(value["conversation_cache"]["type"].as_str(), Some("postgres"));
        assert_eq!(
            value["conversation_cache"]["host"].as_str(),
            Some("assistant-postgres-server.ns.svc")
        );
        assert_eq!(value["defaults"]["provider"].as_str(), Some("openai"));
    }

    #[test]
    fn test_render_memory_cache_omits_postgres() {
        let config = config("llm: {providers: []}\ncache: {type: memory}\n");
        let rendered = render_config(&config, "ns").unwrap();
        assert!(rendered.contains("type: memory"));
        assert!(!rendered.contains("assistant-postgres-server"));
        assert!(!rendered.contains("defaults"));
    }

    #[test]
    fn test_custom_tls_secret_is_mounted_without_serving_cert() {
        let config = config(
            "llm: {providers: []}\napi: {tlsConfig: {keyCertSecretRef: {name: my-tls}}}\n",
        );
        assert_eq!(tls_secret_name(&config, ApiBackend::AppServer), "my-tls");
        let default = self::config("llm: {providers: []}\n");
        assert_eq!(
            tls_secret_name(&default, ApiBackend::Core),
            "assistant-core-tls"
        );
    }
}
