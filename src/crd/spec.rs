//! # AssistantConfig Spec
//!
//! Main CRD specification types and default values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// AssistantConfig Custom Resource Definition
///
/// Cluster-scoped singleton (named `cluster`) declaring the whole assistant
/// stack: LLM providers, the API backend, the conversation cache and the
/// console plugin.
///
/// # Example
///
/// ```yaml
/// apiVersion: assistant.octopilot.io/v1alpha1
/// kind: AssistantConfig
/// metadata:
///   name: cluster
/// spec:
///   llm:
///     providers:
///       - name: openai
///         type: openai
///         credentialsSecretRef:
///           name: openai-credentials
///         models:
///           - name: gpt-4o
///   api:
///     backend: appServer
///     defaultProvider: openai
///     defaultModel: gpt-4o
///   cache:
///     type: postgres
/// ```
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "AssistantConfig",
    group = "assistant.octopilot.io",
    version = "v1alpha1",
    status = "crate::crd::AssistantConfigStatus",
    shortname = "ac",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.overallStatus"}, {"name":"Reconciled", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Reconciled\")].status"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfigSpec {
    /// LLM provider configuration
    pub llm: LlmSpec,
    /// API backend configuration
    #[serde(default)]
    pub api: ApiSpec,
    /// Conversation cache configuration
    #[serde(default)]
    pub cache: CacheSpec,
    /// Console plugin configuration
    #[serde(default)]
    pub console: ConsoleSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LlmSpec {
    /// Providers the API backend may route requests to
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Provider name, unique within the list
    pub name: String,
    /// Provider type (openai, azure_openai, watsonx, ...)
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Provider API endpoint
    #[serde(default)]
    pub url: Option<String>,
    /// Secret in the operator namespace holding the `apitoken` key
    pub credentials_secret_ref: LocalObjectReference,
    /// Models served by this provider
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub name: String,
}

/// Reference to an object in the operator namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

/// Which API backend implementation serves requests
///
/// Exactly one is active at a time; the `ACTIVE_BACKEND` watch alias resolves to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ApiBackend {
    #[default]
    AppServer,
    Core,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    #[serde(default)]
    pub backend: ApiBackend,
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Log level passed to the backend (DEBUG, INFO, WARNING, ERROR)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Serving certificate; when unset the service-serving certificate is used
    #[serde(default)]
    pub tls_config: Option<TlsConfig>,
    /// ConfigMap of additional CA certificates trusted when calling providers
    #[serde(default)]
    pub additional_ca_config_map_ref: Option<LocalObjectReference>,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
}

impl Default for ApiSpec {
    fn default() -> Self {
        Self {
            backend: ApiBackend::default(),
            default_provider: None,
            default_model: None,
            log_level: default_log_level(),
            tls_config: None,
            additional_ca_config_map_ref: None,
            replicas: default_replicas(),
            resources: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Secret holding `tls.crt` and `tls.key`
    pub key_cert_secret_ref: LocalObjectReference,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum CacheType {
    /// Dedicated postgres Deployment
    #[default]
    Postgres,
    /// In-process cache inside the API backend; no cache workload
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    #[serde(default, rename = "type")]
    pub cache_type: CacheType,
    #[serde(default)]
    pub postgres: PostgresSpec,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresSpec {
    #[serde(default = "default_shared_buffers")]
    pub shared_buffers: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: i32,
    /// Persistent storage; an emptyDir is used when unset
    #[serde(default)]
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
}

impl Default for PostgresSpec {
    fn default() -> Self {
        Self {
            shared_buffers: default_shared_buffers(),
            max_connections: default_max_connections(),
            storage: None,
            resources: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    pub size: String,
    #[serde(default)]
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
}

impl Default for ConsoleSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            replicas: default_replicas(),
            resources: None,
        }
    }
}

/// Container resource limits and requests as Kubernetes quantity strings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

pub fn default_log_level() -> String {
    "INFO".to_string()
}

pub fn default_replicas() -> i32 {
    1
}

pub fn default_shared_buffers() -> String {
    "256MB".to_string()
}

pub fn default_max_connections() -> i32 {
    2000
}

pub fn default_true() -> bool {
    true
}
