//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `assistant_operator_reconciliations_total` - Total number of reconcile passes
//! - `assistant_operator_reconciliation_errors_total` - Total number of failed passes
//! - `assistant_operator_reconciliation_duration_seconds` - Duration of reconcile passes
//! - `assistant_operator_requeues_total{reason}` - Requeues by trigger reason
//! - `assistant_operator_watch_filter_events_total{kind,outcome}` - Watch filter decisions
//! - `assistant_operator_workload_restarts_total{workload}` - Deployments rolled by the watch filter
//! - `assistant_operator_teardown_duration_seconds` - Duration of finalizer teardown
//! - `assistant_operator_teardown_timeouts_total` - Teardowns that gave up waiting
//! - `assistant_operator_status_conflicts_total` - Status writes retried after a conflict
//! - `assistant_operator_workloads_ready` - Workloads reporting Ready in the last pass

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "assistant_operator_reconciliations_total",
        "Total number of reconcile passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "assistant_operator_reconciliation_errors_total",
        "Total number of reconcile passes that returned an error",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "assistant_operator_reconciliation_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "assistant_operator_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static WATCH_FILTER_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "assistant_operator_watch_filter_events_total",
            "Secret and ConfigMap events seen by the watch filter, by outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create WATCH_FILTER_EVENTS_TOTAL metric - this should never happen")
});

static WORKLOAD_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "assistant_operator_workload_restarts_total",
            "Deployments restarted after an external resource changed",
        ),
        &["workload"],
    )
    .expect("Failed to create WORKLOAD_RESTARTS_TOTAL metric - this should never happen")
});

static TEARDOWN_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "assistant_operator_teardown_duration_seconds",
            "Duration of finalizer teardown in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0]),
    )
    .expect("Failed to create TEARDOWN_DURATION metric - this should never happen")
});

static TEARDOWN_TIMEOUTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "assistant_operator_teardown_timeouts_total",
        "Teardowns that timed out waiting for owned resources to disappear",
    )
    .expect("Failed to create TEARDOWN_TIMEOUTS_TOTAL metric - this should never happen")
});

static STATUS_CONFLICTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "assistant_operator_status_conflicts_total",
        "Status writes retried after an optimistic concurrency conflict",
    )
    .expect("Failed to create STATUS_CONFLICTS_TOTAL metric - this should never happen")
});

static WORKLOADS_READY: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "assistant_operator_workloads_ready",
        "Workloads reporting Ready in the last reconcile pass",
    )
    .expect("Failed to create WORKLOADS_READY metric - this should never happen")
});

/// Register all metrics with the registry
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_FILTER_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKLOAD_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TEARDOWN_DURATION.clone()))?;
    REGISTRY.register(Box::new(TEARDOWN_TIMEOUTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKLOADS_READY.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_watch_filter_events(kind: &str, outcome: &str) {
    WATCH_FILTER_EVENTS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

pub fn increment_workload_restarts(workload: &str) {
    WORKLOAD_RESTARTS_TOTAL.with_label_values(&[workload]).inc();
}

pub fn observe_teardown_duration(duration: f64) {
    TEARDOWN_DURATION.observe(duration);
}

pub fn increment_teardown_timeouts() {
    TEARDOWN_TIMEOUTS_TOTAL.inc();
}

pub fn increment_status_conflicts() {
    STATUS_CONFLICTS_TOTAL.inc();
}

pub fn set_workloads_ready(count: i64) {
    WORKLOADS_READY.set(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        assert!(register_metrics().is_ok());
        increment_watch_filter_events("Secret", "relevant");
        let text = prometheus::TextEncoder::new()
            .encode_to_string(&REGISTRY.gather())
            .unwrap();
        assert!(text.contains("assistant_operator_watch_filter_events_total"));
    }
}
