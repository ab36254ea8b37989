//! Shared infrastructure that belongs to no single workload: the operator's
//! own NetworkPolicy and, when enabled, a ServiceMonitor for its metrics.

use crate::controller::adapters::{upsert, upsert_dynamic, AdapterContext, AdapterError, Upsert};
use crate::constants::MANAGER_NAME;
use crate::store::resources;
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort,
    NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

const COMPONENT: &str = "operator";
const SERVICE_MONITOR_NAME: &str = "assistant-operator-metrics";
const MONITORING_NAMESPACE: &str = "openshift-monitoring";
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

fn operator_selector() -> BTreeMap<String, String> {
    BTreeMap::from([(
        crate::controller::adapters::NAME_LABEL.to_string(),
        MANAGER_NAME.to_string(),
    )])
}

/// Only the cluster monitoring stack may scrape the operator.
fn network_policy(ctx: &AdapterContext, metrics_port: u16) -> NetworkPolicy {
    NetworkPolicy {
        metadata: ctx.metadata(MANAGER_NAME, COMPONENT),
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(LabelSelector {
                match_labels: Some(operator_selector()),
                ..LabelSelector::default()
            }),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer {
                    namespace_selector: Some(LabelSelector {
                        match_labels: Some(BTreeMap::from([(
                            NAMESPACE_NAME_LABEL.to_string(),
                            MONITORING_NAMESPACE.to_string(),
                        )])),
                        ..LabelSelector::default()
                    }),
                    ..NetworkPolicyPeer::default()
                }]),
                ports: Some(vec![NetworkPolicyPort {
                    port: Some(IntOrString::Int(i32::from(metrics_port))),
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

fn service_monitor(ctx: &AdapterContext) -> DynamicObject {
    let mut monitor = DynamicObject::new(SERVICE_MONITOR_NAME, &resources::service_monitor())
        .data(json!({
            "spec": {
                "endpoints": [{
                    "port": "metrics",
                    "path": "/metrics",
                    "interval": "30s",
                    "scheme": "http",
                }],
                "selector": {
                    "matchLabels": operator_selector(),
                },
            }
        }));
    monitor.metadata = ctx.metadata(SERVICE_MONITOR_NAME, COMPONENT);
    monitor
}

/// Upsert the operator's shared objects.
pub async fn ensure_infrastructure(
    ctx: &AdapterContext,
    metrics_port: u16,
    enable_service_monitor: bool,
) -> Result<(), AdapterError> {
    let policy = upsert(&ctx.store, &network_policy(ctx, metrics_port)).await?;
    if enable_service_monitor {
        let monitor =
            upsert_dynamic(&ctx.store, &resources::service_monitor(), &service_monitor(ctx)).await?;
        debug!(?monitor, "Reconciled operator ServiceMonitor");
    }
    if policy != Upsert::Unchanged {
        debug!(?policy, "Reconciled operator NetworkPolicy");
    }
    Ok(())
}
