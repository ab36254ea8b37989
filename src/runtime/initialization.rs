//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, server startup,
//! Kubernetes client, reconciler context and the Secret/ConfigMap watch filter.

use crate::config::{ControllerConfig, SystemResources, WatcherConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::watch_filter::{start_watch_filter, WatchFilter};
use crate::crd::AssistantConfig;
use crate::observability;
use crate::server::{start_server, ServerState};
use crate::store::{KubeStore, Store};
use anyhow::{Context, Result};
use kube::{api::Api, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    /// API for the cluster-scoped `AssistantConfig` CRD
    pub configs: Api<AssistantConfig>,
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .field("namespace", &self.reconciler.namespace())
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Configuration and system resource loading
/// - Kubernetes client and reconciler setup
/// - Secret/ConfigMap watch filter startup
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any rustls client is built
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assistant_operator=info".into()),
        )
        .init();

    info!("Starting Assistant Operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let config = ControllerConfig::from_env();
    let system = SystemResources::load(config.watcher_config_path.as_deref(), &config.namespace)
        .context("Failed to load watched system resources")?;
    info!(
        namespace = %config.namespace,
        secrets = system.secrets.len(),
        config_maps = system.config_maps.len(),
        "Loaded configuration"
    );

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });
    let server_port = config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let configs: Api<AssistantConfig> = Api::all(client.clone());

    let store = Store::new(Arc::new(KubeStore::new(client.clone())));
    let watcher_config = Arc::new(RwLock::new(WatcherConfig::new(system)));
    let restart_delay = config.watch_restart_delay();
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        config,
        Arc::clone(&watcher_config),
    ));

    // Routes Secret/ConfigMap changes straight to workload restarts
    let filter = WatchFilter::new(store, reconciler.namespace(), watcher_config);
    start_watch_filter(client.clone(), filter, restart_delay);

    info!("Operator initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        configs,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    use crate::constants::{DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS};
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
