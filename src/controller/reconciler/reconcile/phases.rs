//! # Component Phases
//!
//! Phase 1 lays down every adapter's supporting objects; phase 2 applies the
//! Deployments in fixed order and classifies the result.

use crate::constants::SINGLETON_NAME;
use crate::controller::adapters::{Adapter, AdapterContext};
use crate::controller::reconciler::status::{check_workload, StatusUpdate};
use crate::crd::{AssistantConfig, Condition, ConditionType, PodDiagnostic};
use tracing::{debug, error, warn};

pub const REASON_RECONCILED: &str = "ReconcileSucceeded";
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";
pub const REASON_RESOURCES_FAILED: &str = "ComponentResourcesFailed";
pub const REASON_DEPLOYMENT_FAILED: &str = "DeploymentFailed";
pub const REASON_STATUS_CHECK_FAILED: &str = "StatusCheckFailed";

/// Run `ensure_resources` on every adapter; failures are collected, not fatal.
pub async fn ensure_resources(
    ctx: &AdapterContext,
    config: &AssistantConfig,
    adapters: &[Adapter],
) -> Vec<(Adapter, String)> {
    let mut failures = Vec::new();
    for adapter in adapters {
        match adapter.ensure_resources(ctx, config).await {
            Ok(()) => debug!(workload = %adapter.workload(), "Component resources reconciled"),
            Err(e) => {
                error!(workload = %adapter.workload(), error = %e, "Failed to reconcile component resources");
                failures.push((*adapter, e.to_string()));
            }
        }
    }
    failures
}

/// Status recorded when phase 1 fails: existing workload conditions are kept.
#[must_use]
pub fn resources_failed_status(
    failures: &[(Adapter, String)],
    generation: Option<i64>,
) -> StatusUpdate {
    let summary = failures
        .iter()
        .map(|(adapter, message)| format!("{}: {message}", adapter.workload()))
        .collect::<Vec<_>>()
        .join("; ");
    let mut conditions: Vec<Condition> = failures
        .iter()
        .map(|(adapter, message)| {
            Condition::new(
                adapter.workload().condition_type(),
                false,
                REASON_RESOURCES_FAILED,
                message.clone(),
                generation,
            )
        })
        .collect();
    conditions.push(Condition::new(
        ConditionType::Reconciled,
        false,
        REASON_RESOURCES_FAILED,
        summary,
        generation,
    ));
    StatusUpdate {
        conditions,
        replace_conditions: false,
        diagnostics: None,
        observed_generation: generation,
    }
}

/// Status recorded when referenced objects fail validation.
#[must_use]
pub fn validation_failed_status(message: String, generation: Option<i64>) -> StatusUpdate {
    StatusUpdate {
        conditions: vec![Condition::new(
            ConditionType::Reconciled,
            false,
            REASON_VALIDATION_FAILED,
            message,
            generation,
        )],
        replace_conditions: false,
        diagnostics: None,
        observed_generation: generation,
    }
}

/// Result of phase 2
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPhase {
    pub status: StatusUpdate,
    /// Deployment names of workloads that are not Ready
    pub not_ready: Vec<String>,
    pub ready: usize,
}

/// Apply every adapter's Deployment in order and classify each workload.
pub async fn ensure_deployments(
    ctx: &AdapterContext,
    config: &AssistantConfig,
    adapters: &[Adapter],
) -> DeploymentPhase {
    let generation = config.metadata.generation;
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let mut conditions = Vec::with_capacity(adapters.len() + 1);
    let mut diagnostics: Vec<PodDiagnostic> = Vec::new();
    let mut not_ready = Vec::new();
    let mut failed = Vec::new();
    let mut ready = 0;

    for adapter in adapters {
        let workload = adapter.workload();
        if let Err(e) = adapter.ensure_deployment(ctx, config).await {
            error!(workload = %workload, error = %e, "Failed to reconcile deployment");
            conditions.push(Condition::new(
                workload.condition_type(),
                false,
                REASON_DEPLOYMENT_FAILED,
                e.to_string(),
                generation,
            ));
            failed.push(format!("{workload}: {e}"));
            not_ready.push(workload.deployment_name().to_string());
            continue;
        }
        match check_workload(&ctx.store, &ctx.namespace, workload, &now).await {
            Ok(assessment) => {
                conditions.push(assessment.condition(generation));
                if assessment.is_ready() {
                    ready += 1;
                } else {
                    not_ready.push(workload.deployment_name().to_string());
                }
                diagnostics.extend(assessment.diagnostics);
            }
            Err(e) => {
                warn!(workload = %workload, error = %e, "Failed to check workload status");
                conditions.push(Condition::new(
                    workload.condition_type(),
                    false,
                    REASON_STATUS_CHECK_FAILED,
                    e.to_string(),
                    generation,
                ));
                not_ready.push(workload.deployment_name().to_string());
            }
        }
    }

    conditions.push(if failed.is_empty() {
        Condition::new(
            ConditionType::Reconciled,
            true,
            REASON_RECONCILED,
            format!("{SINGLETON_NAME} reconciled"),
            generation,
        )
    } else {
        Condition::new(
            ConditionType::Reconciled,
            false,
            REASON_DEPLOYMENT_FAILED,
            failed.join("; "),
            generation,
        )
    });

    DeploymentPhase {
        status: StatusUpdate {
            conditions,
            replace_conditions: true,
            diagnostics: Some(diagnostics),
            observed_generation: generation,
        },
        not_ready,
        ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ApiBackend;

    #[test]
    fn test_resources_failed_status_summarizes_all_failures() {
        let status = resources_failed_status(
            &[
                (Adapter::Cache, "boom".to_string()),
                (Adapter::Api(ApiBackend::AppServer), "bang".to_string()),
            ],
            Some(4),
        );
        assert!(!status.replace_conditions);
        assert!(status.diagnostics.is_none());
        let reconciled = status
            .conditions
            .iter()
            .find(|c| c.r#type == "Reconciled")
            .unwrap();
        assert_eq!(reconciled.reason, REASON_RESOURCES_FAILED);
        assert!(reconciled.message.contains("boom"));
        assert!(reconciled.message.contains("bang"));
        assert_eq!(status.conditions.len(), 3);
    }

    #[test]
    fn test_validation_failed_status_keeps_other_conditions() {
        let status = validation_failed_status("secret x not found".to_string(), Some(1));
        assert!(!status.replace_conditions);
        assert_eq!(status.conditions[0].reason, REASON_VALIDATION_FAILED);
    }
}
