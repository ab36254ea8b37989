//! # External Resource Watch Filter
//!
//! Decides which Secret/ConfigMap changes matter and restarts the affected
//! workloads directly, without a full reconcile pass.
//!
//! Precedence, cheapest first:
//! 1. Watcher marker naming the singleton → the per-object entry recorded by
//!    the last reconcile pass, defaulting to the active backend
//! 2. Namespace+name matches a system resource → that entry's workloads
//! 3. Anything else is ignored silently
//!
//! ## Module Structure
//!
//! - `handler.rs` - create/update/delete handling and restarts
//! - `stream.rs` - cluster-wide watch streams and payload snapshots

mod handler;
mod stream;

pub use handler::{Decision, IgnoreReason, WatchFilter, WatchedResource};
pub use stream::{start_watch_filter, ObjectSnapshots, WatchEvent};

use crate::config::{ObjectKey, WatchedKind, WatcherConfig};
use crate::constants::{SINGLETON_NAME, WATCHER_ANNOTATION};
use crate::crd::{Workload, WorkloadRef};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

const DEFAULT_TARGETS: &[WorkloadRef] = &[WorkloadRef::ActiveBackend];

/// How a relevant object was recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Marker,
    SystemResource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relevance {
    Irrelevant,
    Relevant {
        workloads: Vec<Workload>,
        source: MatchSource,
    },
}

impl Relevance {
    #[must_use]
    pub fn is_relevant(&self) -> bool {
        matches!(self, Relevance::Relevant { .. })
    }
}

/// Whether `meta` carries the watcher marker for the singleton
#[must_use]
pub fn has_marker(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(WATCHER_ANNOTATION))
        .is_some_and(|v| v == SINGLETON_NAME)
}

#[must_use]
pub fn object_key(meta: &ObjectMeta) -> ObjectKey {
    ObjectKey::new(
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default(),
    )
}

/// Classify an object against the current routing table.
#[must_use]
pub fn classify(kind: WatchedKind, meta: &ObjectMeta, config: &WatcherConfig) -> Relevance {
    let key = object_key(meta);
    if has_marker(meta) {
        let refs = config.annotated(kind, &key).unwrap_or(DEFAULT_TARGETS);
        return Relevance::Relevant {
            workloads: config.resolve(refs),
            source: MatchSource::Marker,
        };
    }
    if let Some(entry) = config.system_resource(kind, &key) {
        return Relevance::Relevant {
            workloads: config.resolve(&entry.affected_workloads),
            source: MatchSource::SystemResource,
        };
    }
    Relevance::Irrelevant
}
