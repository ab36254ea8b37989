//! # Status Merge
//!
//! Folds a freshly computed status onto the persisted one so that
//! unchanged observations keep their timestamps.

use crate::constants::MAX_DIAGNOSTICS;
use crate::crd::{AssistantConfigStatus, Condition, OverallStatus, PodDiagnostic};

/// Status computed by one reconcile pass
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub conditions: Vec<Condition>,
    /// Drop persisted conditions whose type is absent from `conditions`
    pub replace_conditions: bool,
    /// `None` keeps the persisted diagnostics
    pub diagnostics: Option<Vec<PodDiagnostic>>,
    pub observed_generation: Option<i64>,
}

impl StatusUpdate {
    /// Status to persist given the currently persisted `previous`
    #[must_use]
    pub fn apply(&self, previous: &AssistantConfigStatus, now: &str) -> AssistantConfigStatus {
        let conditions = merge_conditions(
            &previous.conditions,
            self.conditions.clone(),
            self.replace_conditions,
            now,
        );
        let diagnostic_info = match &self.diagnostics {
            Some(computed) => merge_diagnostics(&previous.diagnostic_info, computed.clone()),
            None => previous.diagnostic_info.clone(),
        };
        let overall_status = if conditions.iter().all(Condition::is_true) {
            OverallStatus::Ready
        } else {
            OverallStatus::NotReady
        };
        AssistantConfigStatus {
            conditions,
            overall_status: Some(overall_status),
            diagnostic_info,
            observed_generation: self.observed_generation,
        }
    }
}

/// Merge computed conditions onto persisted ones.
///
/// A condition keeps its persisted `lastTransitionTime` when its
/// (type, status, reason) is unchanged; otherwise it is stamped with `now`.
/// The result is sorted by type.
#[must_use]
pub fn merge_conditions(
    previous: &[Condition],
    computed: Vec<Condition>,
    replace: bool,
    now: &str,
) -> Vec<Condition> {
    let mut merged: Vec<Condition> = computed
        .into_iter()
        .map(|mut condition| {
            condition.last_transition_time = previous
                .iter()
                .find(|p| p.same_transition(&condition))
                .and_then(|p| p.last_transition_time.clone())
                .or_else(|| Some(now.to_string()));
            condition
        })
        .collect();
    if !replace {
        for kept in previous {
            if !merged.iter().any(|c| c.r#type == kept.r#type) {
                merged.push(kept.clone());
            }
        }
    }
    merged.sort_by(|a, b| a.r#type.cmp(&b.r#type));
    merged.dedup_by(|a, b| a.r#type == b.r#type);
    merged
}

/// Carry `lastUpdated` over for repeated observations and cap the list.
#[must_use]
pub fn merge_diagnostics(
    previous: &[PodDiagnostic],
    computed: Vec<PodDiagnostic>,
) -> Vec<PodDiagnostic> {
    computed
        .into_iter()
        .take(MAX_DIAGNOSTICS)
        .map(|mut diagnostic| {
            if let Some(seen) = previous.iter().find(|p| p.same_observation(&diagnostic)) {
                diagnostic.last_updated.clone_from(&seen.last_updated);
            }
            diagnostic
        })
        .collect()
}
