//! # Controller
//!
//! Core controller modules for the assistant operator.
//!
//! - `adapters`: per-workload object builders and idempotent upserts
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `reconciler`: reconciliation, teardown and status aggregation
//! - `watch_filter`: Secret/ConfigMap change routing to workload restarts

pub mod adapters;
pub mod backoff;
pub mod reconciler;
pub mod watch_filter;
