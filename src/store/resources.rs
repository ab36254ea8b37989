//! Descriptors for kinds the operator manages without Rust types.

use kube::api::ApiResource;
use kube::core::GroupVersionKind;

/// `console.openshift.io/v1 ConsolePlugin` (cluster-scoped)
#[must_use]
pub fn console_plugin() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("console.openshift.io", "v1", "ConsolePlugin"),
        "consoleplugins",
    )
}

/// `operator.openshift.io/v1 Console` (cluster-scoped); lists enabled plugins
#[must_use]
pub fn console_operator_config() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("operator.openshift.io", "v1", "Console"),
        "consoles",
    )
}

/// `monitoring.coreos.com/v1 ServiceMonitor`
#[must_use]
pub fn service_monitor() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("monitoring.coreos.com", "v1", "ServiceMonitor"),
        "servicemonitors",
    )
}
