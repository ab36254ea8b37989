//! Console plugin: nginx serving the plugin bundle, registered with the
//! OpenShift console through a `ConsolePlugin` and the cluster `Console`
//! operator configuration.

use super::{
    digest, labels, resource_requirements, selector_labels, upsert, upsert_dynamic,
    AdapterContext, AdapterError, SERVING_CERT_ANNOTATION,
};
use crate::constants::{
    API_SERVICE_PORT, CONFIG_HASH_ANNOTATION, CONSOLE_CONFIG_NAME, CONSOLE_DEPLOYMENT,
    CONSOLE_PLUGIN_NAME, CONSOLE_SERVICE_PORT,
};
use crate::crd::AssistantConfig;
use crate::store::{resources, Store, StoreError};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const COMPONENT: &str = "console-plugin";
const NGINX_CONFIG_MAP: &str = "assistant-console-plugin-nginx";
const NGINX_CONF_KEY: &str = "nginx.conf";
const CERT_SECRET: &str = "assistant-console-plugin-cert";
const ACTIVATION_ATTEMPTS: usize = 3;

fn nginx_conf() -> String {
    format!(
        r"error_log /dev/stdout info;
events {{}}
http {{
  access_log /dev/stdout;
  include /etc/nginx/mime.types;
  default_type application/octet-stream;
  keepalive_timeout 65;
  server {{
    listen {CONSOLE_SERVICE_PORT} ssl;
    listen [::]:{CONSOLE_SERVICE_PORT} ssl;
    ssl_certificate /var/cert/tls.crt;
    ssl_certificate_key /var/cert/tls.key;
    root /usr/share/nginx/html;
  }}
}}
"
    )
}

fn config_map(ctx: &AdapterContext) -> ConfigMap {
    ConfigMap {
        metadata: ctx.metadata(NGINX_CONFIG_MAP, COMPONENT),
        data: Some(BTreeMap::from([(NGINX_CONF_KEY.to_string(), nginx_conf())])),
        ..ConfigMap::default()
    }
}

fn service(ctx: &AdapterContext) -> Service {
    let mut metadata = ctx.metadata(CONSOLE_DEPLOYMENT, COMPONENT);
    metadata.annotations = Some(BTreeMap::from([(
        SERVING_CERT_ANNOTATION.to_string(),
        CERT_SECRET.to_string(),
    )]));
    Service {
        metadata,
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(CONSOLE_DEPLOYMENT)),
            ports: Some(vec![ServicePort {
                name: Some("https".to_string()),
                port: CONSOLE_SERVICE_PORT,
                target_port: Some(IntOrString::Int(CONSOLE_SERVICE_PORT)),
                protocol: Some("TCP".to_string()),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

fn console_plugin(ctx: &AdapterContext, config: &AssistantConfig) -> DynamicObject {
    let resource = resources::console_plugin();
    let api_service = config.spec.api.backend.workload().deployment_name();
    let mut plugin = DynamicObject::new(CONSOLE_PLUGIN_NAME, &resource).data(json!({
        "spec": {
            "displayName": "Assistant Console Plugin",
            "backend": {
                "type": "Service",
                "service": {
                    "name": CONSOLE_DEPLOYMENT,
                    "namespace": ctx.namespace,
                    "port": CONSOLE_SERVICE_PORT,
                    "basePath": "/",
                },
            },
            "proxy": [{
                "alias": "api",
                "authorization": "UserToken",
                "endpoint": {
                    "type": "Service",
                    "service": {
                        "name": api_service,
                        "namespace": ctx.namespace,
                        "port": API_SERVICE_PORT,
                    },
                },
            }],
        }
    }));
    plugin.metadata = ctx.cluster_metadata(CONSOLE_PLUGIN_NAME, COMPONENT);
    plugin
}

fn deployment(ctx: &AdapterContext, config: &AssistantConfig) -> Deployment {
    let spec = &config.spec.console;
    let mut template_annotations = BTreeMap::new();
    template_annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), digest([nginx_conf().as_str()]));

    Deployment {
        metadata: ctx.metadata(CONSOLE_DEPLOYMENT, COMPONENT),
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(CONSOLE_DEPLOYMENT)),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(CONSOLE_DEPLOYMENT, COMPONENT)),
                    annotations: Some(template_annotations),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "console-plugin".to_string(),
                        image: Some(ctx.images.console.clone()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        ports: Some(vec![ContainerPort {
                            name: Some("https".to_string()),
                            container_port: CONSOLE_SERVICE_PORT,
                            protocol: Some("TCP".to_string()),
                            ..ContainerPort::default()
                        }]),
                        resources: resource_requirements(spec.resources.as_ref()),
                        volume_mounts: Some(vec![
                            VolumeMount {
                                name: "cert".to_string(),
                                mount_path: "/var/cert".to_string(),
                                read_only: Some(true),
                                ..VolumeMount::default()
                            },
                            VolumeMount {
                                name: "nginx-conf".to_string(),
                                mount_path: "/etc/nginx/nginx.conf".to_string(),
                                sub_path: Some(NGINX_CONF_KEY.to_string()),
                                read_only: Some(true),
                                ..VolumeMount::default()
                            },
                        ]),
                        ..Container::default()
                    }],
                    volumes: Some(vec![
                        Volume {
                            name: "cert".to_string(),
                            secret: Some(SecretVolumeSource {
                                secret_name: Some(CERT_SECRET.to_string()),
                                default_mode: Some(420),
                                ..SecretVolumeSource::default()
                            }),
                            ..Volume::default()
                        },
                        Volume {
                            name: "nginx-conf".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: NGINX_CONFIG_MAP.to_string(),
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
    upsert(&ctx.store, &config_map(ctx)).await?;
    upsert(&ctx.store, &service(ctx)).await?;
    upsert_dynamic(
        &ctx.store,
        &resources::console_plugin(),
        &console_plugin(ctx, config),
    )
    .await?;
    Ok(())
}

pub(super) async fn ensure_deployment(
    ctx: &AdapterContext,
    config: &AssistantConfig,
) -> Result<(), AdapterError> {
    upsert(&ctx.store, &deployment(ctx, config)).await?;
    set_plugin_enabled(&ctx.store, true).await?;
    Ok(())
}

/// Unregister from the Console; the owned `ConsolePlugin` itself goes with teardown.
pub(super) async fn deactivate(store: &Store) -> Result<(), AdapterError> {
    set_plugin_enabled(store, false).await?;
    Ok(())
}

/// Add or remove the plugin in the cluster Console's `spec.plugins`.
///
/// A missing Console object (console operator not installed) is not an error.
async fn set_plugin_enabled(store: &Store, enabled: bool) -> Result<(), StoreError> {
    let resource = resources::console_operator_config();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(mut console) = store
            .get_dynamic(&resource, None, CONSOLE_CONFIG_NAME)
            .await?
        else {
            debug!("Console operator configuration not found, skipping plugin registration");
            return Ok(());
        };
        if !toggle_plugin(&mut console.data, enabled) {
            return Ok(());
        }
        match store.replace_dynamic(&resource, &console).await {
            Ok(_) => {
                info!(
                    plugin = CONSOLE_PLUGIN_NAME,
                    enabled, "Updated console plugin registration"
                );
                return Ok(());
            }
            Err(e) if e.is_conflict() && attempt < ACTIVATION_ATTEMPTS => {
                warn!(attempt, "Conflict updating Console plugins, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Returns whether `data` changed.
fn toggle_plugin(data: &mut Value, enabled: bool) -> bool {
    if !data.is_object() {
        *data = json!({});
    }
    let spec = &mut data["spec"];
    if !spec.is_object() {
        *spec = json!({});
    }
    let plugins = &mut spec["plugins"];
    if !plugins.is_array() {
        *plugins = json!([]);
    }
    let Some(list) = plugins.as_array_mut() else {
        return false;
    };
    let present = list.iter().any(|p| p == CONSOLE_PLUGIN_NAME);
    match (enabled, present) {
        (true, false) => {
            list.push(json!(CONSOLE_PLUGIN_NAME));
            true
        }
        (false, true) => {
            list.retain(|p| p != CONSOLE_PLUGIN_NAME);
            true
        }
        _ => false,
    }
}
