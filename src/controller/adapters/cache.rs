//! Postgres conversation cache.

use super::{
    digest, labels, resource_requirements, selector_labels, upsert, AdapterContext, AdapterError,
    COMPONENT_LABEL, PART_OF_LABEL, PART_OF_VALUE,
};
use crate::constants::{
    CONFIG_HASH_ANNOTATION, POSTGRES_DATABASE, POSTGRES_DEPLOYMENT, POSTGRES_PASSWORD_KEY,
    POSTGRES_PORT, POSTGRES_USER,
};
use crate::crd::{AssistantConfig, PostgresSpec};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Secret, SecretKeySelector,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort,
    NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

const COMPONENT: &str = "cache";
pub(crate) const CREDENTIALS_SECRET: &str = "assistant-postgres-secret";
const CONF_CONFIG_MAP: &str = "assistant-postgres-conf";
const CONF_KEY: &str = "postgresql.conf.sample";
const DATA_CLAIM: &str = "assistant-postgres-data";
const DATA_PATH: &str = "/var/lib/pgsql";

fn postgres_conf(spec: &PostgresSpec) -> String {
    format!(
        "huge_pages = off\n\
         ssl = off\n\
         shared_buffers = {}\n\
         max_connections = {}\n\
         log_connections = off\n",
        spec.shared_buffers, spec.max_connections
    )
}

/// Existing password if the Secret is already there; a fresh one otherwise.
async fn credentials_secret(ctx: &AdapterContext) -> Result<Secret, AdapterError> {
    let existing = ctx
        .store
        .get::<Secret>(Some(&ctx.namespace), CREDENTIALS_SECRET)
        .await?
        .and_then(|s| s.data)
        .and_then(|mut data| data.remove(POSTGRES_PASSWORD_KEY));
    let password = existing.unwrap_or_else(|| {
        ByteString(uuid::Uuid::new_v4().simple().to_string().into_bytes())
    });
    Ok(Secret {
        metadata: ctx.metadata(CREDENTIALS_SECRET, COMPONENT),
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(POSTGRES_PASSWORD_KEY.to_string(), password)])),
        ..Secret::default()
    })
}

fn config_map(ctx: &AdapterContext, spec: &PostgresSpec) -> ConfigMap {
    ConfigMap {
        metadata: ctx.metadata(CONF_CONFIG_MAP, COMPONENT),
        data: Some(BTreeMap::from([(CONF_KEY.to_string(), postgres_conf(spec))])),
        ..ConfigMap::default()
    }
}

fn service(ctx: &AdapterContext) -> Service {
    Service {
        metadata: ctx.metadata(POSTGRES_DEPLOYMENT, COMPONENT),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(POSTGRES_DEPLOYMENT)),
            ports: Some(vec![ServicePort {
                name: Some("postgres".to_string()),
                port: POSTGRES_PORT,
                target_port: Some(IntOrString::Int(POSTGRES_PORT)),
                protocol: Some("TCP".to_string()),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// Only API backend pods may reach postgres.
fn network_policy(ctx: &AdapterContext) -> NetworkPolicy {
    NetworkPolicy {
        metadata: ctx.metadata(POSTGRES_DEPLOYMENT, COMPONENT),
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(LabelSelector {
                match_labels: Some(selector_labels(POSTGRES_DEPLOYMENT)),
                ..LabelSelector::default()
            }),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer {
                    pod_selector: Some(LabelSelector {
                        match_labels: Some(BTreeMap::from([
                            (COMPONENT_LABEL.to_string(), "api".to_string()),
                            (PART_OF_LABEL.to_string(), PART_OF_VALUE.to_string()),
                        ])),
                        ..LabelSelector::default()
                    }),
                    ..NetworkPolicyPeer::default()
                }]),
                ports: Some(vec![NetworkPolicyPort {
                    port: Some(IntOrString::Int(POSTGRES_PORT)),
                    protocol: Some("TCP".to_string()),
                    ..NetworkPolicyPort::default()
                }]),
            }]),
            policy_types: Some(vec!["Ingress".to_string()]),
            ..NetworkPolicySpec::default()
        }),
        ..NetworkPolicy::default()
    }
}

fn persistent_volume_claim(ctx: &AdapterContext, spec: &PostgresSpec) -> Option<PersistentVolumeClaim> {
    let storage = spec.storage.as_ref()?;
    Some(PersistentVolumeClaim {
        metadata: ctx.metadata(DATA_CLAIM, COMPONENT),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage.size.clone()),
                )])),
                ..VolumeResourceRequirements::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        }),
        ..PersistentVolumeClaim::default()
    })
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..EnvVar::default()
    }
}

fn deployment(ctx: &AdapterContext, spec: &PostgresSpec) -> Deployment {
    let data_volume = match spec.storage {
        Some(_) => Volume {
            name: "data".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: DATA_CLAIM.to_string(),
                ..PersistentVolumeClaimVolumeSource::default()
            }),
            ..Volume::default()
        },
        None => Volume {
            name: "data".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Volume::default()
        },
    };

    Deployment {
        metadata: ctx.metadata(POSTGRES_DEPLOYMENT, COMPONENT),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            // Single writer on the data volume
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..DeploymentStrategy::default()
            }),
            selector: LabelSelector {
                match_labels: Some(selector_labels(POSTGRES_DEPLOYMENT)),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(POSTGRES_DEPLOYMENT, COMPONENT)),
                    annotations: Some(BTreeMap::from([(
                        CONFIG_HASH_ANNOTATION.to_string(),
                        digest([postgres_conf(spec).as_str()]),
                    )])),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "postgres".to_string(),
                        image: Some(ctx.images.postgres.clone()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        env: Some(vec![
                            env("POSTGRESQL_USER", POSTGRES_USER),
                            env("POSTGRESQL_DATABASE", POSTGRES_DATABASE),
                            EnvVar {
                                name: "POSTGRESQL_ADMIN_PASSWORD".to_string(),
                                value_from: Some(EnvVarSource {
                                    secret_key_ref: Some(SecretKeySelector {
                                        name: CREDENTIALS_SECRET.to_string(),
                                        key: POSTGRES_PASSWORD_KEY.to_string(),
                                        ..SecretKeySelector::default()
                                    }),
                                    ..EnvVarSource::default()
                                }),
                                ..EnvVar::default()
                            },
                        ]),
                        ports: Some(vec![ContainerPort {
                            name: Some("postgres".to_string()),
                            container_port: POSTGRES_PORT,
                            protocol: Some("TCP".to_string()),
                            ..ContainerPort::default()
                        }]),
                        resources: resource_requirements(spec.resources.as_ref()),
                        volume_mounts: Some(vec![
                            VolumeMount {
                                name: "data".to_string(),
                                mount_path: DATA_PATH.to_string(),
                                ..VolumeMount::default()
                            },
                            VolumeMount {
                                name: "conf".to_string(),
                                mount_path: "/usr/share/pgsql/postgresql.conf.sample".to_string(),
                                sub_path: Some(CONF_KEY.to_string()),
                                read_only: Some(true),
                                ..VolumeMount::default()
                            },
                        ]),
                        ..Container::default()
                    }],
                    volumes: Some(vec![
                        data_volume,
                        Volume {
                            name: "conf".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: CONF_CONFIG_MAP.to_string(),
                                default_mode: Some(420),
                                ..ConfigMapVolumeSource::default()
                            }),
                            ..Volume::default()
                        },
                    ]),
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
) -> Result<(), AdapterError> {
    let spec = &config.spec.cache.postgres;
    upsert(&ctx.store, &credentials_secret(ctx).await?).await?;
    upsert(&ctx.store, &config_map(ctx, spec)).await?;
    upsert(&ctx.store, &service(ctx)).await?;
    upsert(&ctx.store, &network_policy(ctx)).await?;
    if let Some(claim) = persistent_volume_claim(ctx, spec) {
        upsert(&ctx.store, &claim).await?;
    }
    Ok(())
}

pub(super) async fn ensure_deployment(
    ctx: &AdapterContext,
    config: &AssistantConfig,
) -> Result<(), AdapterError> {
    upsert(&ctx.store, &deployment(ctx, &config.spec.cache.postgres)).await?;
    Ok(())
}
