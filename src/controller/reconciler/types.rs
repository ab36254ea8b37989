//! # Types
//!
//! Core types for the reconciler.

use crate::config::{ControllerConfig, SharedWatcherConfig};
use crate::controller::adapters::AdapterError;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::references::ValidationErrors;
use crate::store::{Store, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("referenced resources are invalid: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("failed to ensure component resources: {}", .0.join("; "))]
    ComponentResources(Vec<String>),
    #[error("workloads not ready: {}", .0.join(", "))]
    WorkloadsNotReady(Vec<String>),
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),
}

impl From<AdapterError> for ReconcilerError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Store(e) => ReconcilerError::Store(e),
            other => ReconcilerError::ReconciliationFailed(other.into()),
        }
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            backoff: FibonacciBackoff::new(
                config.backoff_start_duration(),
                config.backoff_max_duration(),
            ),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context handed to every reconcile and error-policy call
#[derive(Clone)]
pub struct Reconciler {
    pub store: Store,
    pub config: Arc<ControllerConfig>,
    // Replaced wholesale by the annotation step, read by the watch filter
    pub watcher_config: SharedWatcherConfig,
    // Backoff state per resource name, owned by the error policy layer
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("namespace", &self.config.namespace)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        store: Store,
        config: ControllerConfig,
        watcher_config: SharedWatcherConfig,
    ) -> Self {
        Self {
            store,
            config: Arc::new(config),
            watcher_config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }
}
