//! # Workload Diagnostics
//!
//! Classifies a workload as Ready, Progressing or Failed from its Deployment
//! and the pods behind it, and explains unhealthy pods as [`PodDiagnostic`]s.
//!
//! Priority:
//! 1. Deployment `Available=True` → Ready, nothing else is inspected
//! 2. Container and init container states of pods matching the selector
//! 3. Pod-level scheduling/phase/readiness, only for pods without a container diagnostic
//!
//! A diagnostic whose reason is a crash or image pull failure (or a previous
//! crash) makes the workload Failed; anything else is still Progressing.

use crate::crd::{Condition, DiagnosticType, PodDiagnostic, Workload};
use crate::store::{Store, StoreError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use tracing::debug;

const TERMINAL_REASONS: [&str; 4] = [
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "OOMKilled",
];
const PREVIOUS_CRASH_PREFIX: &str = "PreviousCrash:";

pub const REASON_AVAILABLE: &str = "DeploymentAvailable";
pub const REASON_PROGRESSING: &str = "DeploymentProgressing";
pub const REASON_POD_FAILURE: &str = "PodFailure";
pub const REASON_NOT_FOUND: &str = "DeploymentNotFound";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadHealth {
    Ready,
    /// Not available yet, nothing terminal observed
    Progressing,
    /// Not available and at least one pod is failing; carries the first terminal reason
    Failed(String),
    /// The Deployment does not exist
    Missing,
}

/// Health of one workload plus the evidence behind it
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadAssessment {
    pub workload: Workload,
    pub health: WorkloadHealth,
    pub diagnostics: Vec<PodDiagnostic>,
}

impl WorkloadAssessment {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.health == WorkloadHealth::Ready
    }

    /// Condition summarizing this workload
    #[must_use]
    pub fn condition(&self, observed_generation: Option<i64>) -> Condition {
        let condition_type = self.workload.condition_type();
        let name = self.workload.deployment_name();
        match &self.health {
            WorkloadHealth::Ready => Condition::new(
                condition_type,
                true,
                REASON_AVAILABLE,
                format!("deployment {name} is available"),
                observed_generation,
            ),
            WorkloadHealth::Progressing => Condition::new(
                condition_type,
                false,
                REASON_PROGRESSING,
                format!("waiting for deployment {name} to become available"),
                observed_generation,
            ),
            WorkloadHealth::Failed(reason) => Condition::new(
                condition_type,
                false,
                REASON_POD_FAILURE,
                format!("deployment has failing pods: {reason}"),
                observed_generation,
            ),
            WorkloadHealth::Missing => Condition::new(
                condition_type,
                false,
                REASON_NOT_FOUND,
                format!("deployment {name} not found"),
                observed_generation,
            ),
        }
    }
}

fn is_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}

fn is_terminal(reason: &str) -> bool {
    TERMINAL_REASONS.contains(&reason) || reason.starts_with(PREVIOUS_CRASH_PREFIX)
}

fn message_or(message: Option<&String>, default: &str) -> String {
    match message {
        Some(m) if !m.is_empty() => m.clone(),
        _ => default.to_string(),
    }
}

fn reason_or(reason: Option<&String>, default: &str) -> String {
    match reason {
        Some(r) if !r.is_empty() => r.clone(),
        _ => default.to_string(),
    }
}

struct PodContext<'a> {
    workload: Workload,
    pod_name: &'a str,
    now: &'a str,
}

impl PodContext<'_> {
    fn diagnostic(
        &self,
        container_name: Option<String>,
        diagnostic_type: DiagnosticType,
        reason: String,
        message: String,
        exit_code: Option<i32>,
    ) -> PodDiagnostic {
        PodDiagnostic {
            workload: self.workload.deployment_name().to_string(),
            pod_name: self.pod_name.to_string(),
            container_name,
            reason,
            message,
            exit_code,
            diagnostic_type,
            last_updated: self.now.to_string(),
        }
    }

    fn container_diagnostics(
        &self,
        status: &ContainerStatus,
        display_name: &str,
        out: &mut Vec<PodDiagnostic>,
    ) {
        let state = status.state.as_ref();
        if state.and_then(|s| s.running.as_ref()).is_some() && status.ready {
            return;
        }
        let waiting = state.and_then(|s| s.waiting.as_ref());
        if let Some(waiting) = waiting {
            out.push(self.diagnostic(
                Some(display_name.to_string()),
                DiagnosticType::ContainerWaiting,
                reason_or(waiting.reason.as_ref(), "Waiting"),
                message_or(
                    waiting.message.as_ref(),
                    "Container waiting - check pod status for details",
                ),
                None,
            ));
        }
        if let Some(terminated) = state.and_then(|s| s.terminated.as_ref()) {
            if terminated.exit_code != 0 {
                out.push(self.diagnostic(
                    Some(display_name.to_string()),
                    DiagnosticType::ContainerTerminated,
                    reason_or(terminated.reason.as_ref(), "Error"),
                    message_or(
                        terminated.message.as_ref(),
                        "Container terminated - check pod logs for details",
                    ),
                    Some(terminated.exit_code),
                ));
            }
        }
        // Crash context behind a CrashLoopBackOff
        if waiting.is_some() {
            if let Some(previous) = status.last_state.as_ref().and_then(|s| s.terminated.as_ref()) {
                out.push(self.diagnostic(
                    Some(display_name.to_string()),
                    DiagnosticType::ContainerTerminated,
                    format!(
                        "{PREVIOUS_CRASH_PREFIX} {}",
                        reason_or(previous.reason.as_ref(), "Error")
                    ),
                    message_or(
                        previous.message.as_ref(),
                        "Previous container crash - check pod logs for details",
                    ),
                    Some(previous.exit_code),
                ));
            }
        }
    }

    fn pod_diagnostics(&self, pod: &Pod, out: &mut Vec<PodDiagnostic>) {
        let Some(status) = pod.status.as_ref() else {
            return;
        };
        let conditions = status.conditions.as_deref().unwrap_or_default();
        let condition = |type_: &str| {
            conditions
                .iter()
                .find(|c| c.type_ == type_ && c.status == "False")
        };
        let phase = status.phase.as_deref().unwrap_or_default();

        if let Some(scheduled) = condition("PodScheduled") {
            out.push(self.diagnostic(
                None,
                DiagnosticType::PodScheduling,
                reason_or(scheduled.reason.as_ref(), "Unschedulable"),
                message_or(scheduled.message.as_ref(), "Pod cannot be scheduled"),
                None,
            ));
        } else if phase == "Failed" || phase == "Unknown" {
            out.push(self.diagnostic(
                None,
                DiagnosticType::PodCondition,
                phase.to_string(),
                message_or(status.message.as_ref(), "Pod is not running"),
                None,
            ));
        } else if let Some(ready) = condition("Ready").filter(|_| phase == "Running") {
            out.push(self.diagnostic(
                None,
                DiagnosticType::PodCondition,
                reason_or(ready.reason.as_ref(), "ContainersNotReady"),
                message_or(ready.message.as_ref(), "Pod is running but not ready"),
                None,
            ));
        }
    }
}

/// Classify `workload` from its Deployment and the pods its selector matches.
#[must_use]
pub fn classify(
    workload: Workload,
    deployment: &Deployment,
    pods: &[Pod],
    now: &str,
) -> WorkloadAssessment {
    if is_available(deployment) {
        return WorkloadAssessment {
            workload,
            health: WorkloadHealth::Ready,
            diagnostics: Vec::new(),
        };
    }

    let mut diagnostics = Vec::new();
    for pod in pods {
        let ctx = PodContext {
            workload,
            pod_name: pod.metadata.name.as_deref().unwrap_or_default(),
            now,
        };
        let before = diagnostics.len();
        if let Some(status) = pod.status.as_ref() {
            for init in status.init_container_statuses.iter().flatten() {
                ctx.container_diagnostics(init, &format!("init/{}", init.name), &mut diagnostics);
            }
            for container in status.container_statuses.iter().flatten() {
                ctx.container_diagnostics(container, &container.name, &mut diagnostics);
            }
        }
        if diagnostics.len() == before {
            ctx.pod_diagnostics(pod, &mut diagnostics);
        }
    }

    let health = diagnostics
        .iter()
        .find(|d| is_terminal(&d.reason))
        .map_or(WorkloadHealth::Progressing, |d| {
            WorkloadHealth::Failed(d.reason.clone())
        });
    WorkloadAssessment {
        workload,
        health,
        diagnostics,
    }
}

/// `k=v,...` selector from the Deployment's `matchLabels`; `None` when empty
#[must_use]
pub fn pod_selector(deployment: &Deployment) -> Option<String> {
    let labels = deployment
        .spec
        .as_ref()?
        .selector
        .match_labels
        .as_ref()
        .filter(|l| !l.is_empty())?;
    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Fetch `workload`'s Deployment and pods and classify them.
pub async fn check_workload(
    store: &Store,
    namespace: &str,
    workload: Workload,
    now: &str,
) -> Result<WorkloadAssessment, StoreError> {
    let Some(deployment) = store
        .get::<Deployment>(Some(namespace), workload.deployment_name())
        .await?
    else {
        return Ok(WorkloadAssessment {
            workload,
            health: WorkloadHealth::Missing,
            diagnostics: Vec::new(),
        });
    };
    if is_available(&deployment) {
        return Ok(classify(workload, &deployment, &[], now));
    }
    let pods = match pod_selector(&deployment) {
        Some(selector) => store.list::<Pod>(Some(namespace), Some(&selector)).await?,
        None => Vec::new(),
    };
    let assessment = classify(workload, &deployment, &pods, now);
    debug!(
        workload = %workload,
        health = ?assessment.health,
        diagnostics = assessment.diagnostics.len(),
        "Checked workload"
    );
    Ok(assessment)
}
