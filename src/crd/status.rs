//! # AssistantConfig Status
//!
//! Status types: the condition set and the bounded pod diagnostics list.
//!
//! Optional fields serialize as `null` rather than being skipped so a merge
//! patch of the whole status clears values that are no longer set.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of the AssistantConfig resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfigStatus {
    /// Conditions ordered by type
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Ready when every workload is available, NotReady otherwise
    #[serde(default)]
    pub overall_status: Option<OverallStatus>,
    /// Why unhealthy workloads are unhealthy, at pod/container granularity
    #[serde(default)]
    pub diagnostic_info: Vec<PodDiagnostic>,
    /// Generation the conditions were computed for
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum OverallStatus {
    Ready,
    NotReady,
}

/// Condition for status
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub r#type: String,
    /// "True" or "False"
    pub status: String,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// RFC 3339; changes only when (type, status, reason) changes
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Build a condition without a transition time; the status writer stamps it.
    pub fn new(
        condition_type: ConditionType,
        ready: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.as_str().to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            reason: reason.into(),
            message: message.into(),
            observed_generation,
            last_transition_time: None,
        }
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }

    /// Whether `other` describes the same transition (type, status and reason)
    #[must_use]
    pub fn same_transition(&self, other: &Condition) -> bool {
        self.r#type == other.r#type && self.status == other.status && self.reason == other.reason
    }
}

/// Condition types written by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    ApiReady,
    CacheReady,
    ConsolePluginReady,
    Reconciled,
}

impl ConditionType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::ApiReady => "ApiReady",
            ConditionType::CacheReady => "CacheReady",
            ConditionType::ConsolePluginReady => "ConsolePluginReady",
            ConditionType::Reconciled => "Reconciled",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of why a pod or container is unhealthy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodDiagnostic {
    /// Deployment name of the owning workload
    pub workload: String,
    pub pod_name: String,
    /// Container name; init containers are reported as `init/<name>`
    #[serde(default)]
    pub container_name: Option<String>,
    pub reason: String,
    pub message: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(rename = "type")]
    pub diagnostic_type: DiagnosticType,
    /// RFC 3339 time the diagnostic was first observed in its current form
    pub last_updated: String,
}

impl PodDiagnostic {
    /// Identity used to carry timestamps across passes
    #[must_use]
    pub fn same_observation(&self, other: &PodDiagnostic) -> bool {
        self.workload == other.workload
            && self.pod_name == other.pod_name
            && self.container_name == other.container_name
            && self.reason == other.reason
            && self.message == other.message
            && self.exit_code == other.exit_code
            && self.diagnostic_type == other.diagnostic_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum DiagnosticType {
    ContainerWaiting,
    ContainerTerminated,
    PodScheduling,
    PodCondition,
}
