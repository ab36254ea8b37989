//! # Watch Loop
//!
//! Controller watch loop that monitors the `AssistantConfig` and the workload
//! objects it owns, triggering reconciliation when changes are detected.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::crd::AssistantConfig;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::future::{self, Either};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::Api;
use kube::Client;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Run the controller watch loop
///
/// Owned Deployments, Services, Secrets and ConfigMaps map back to the
/// singleton through their owner reference, so drift on any of them requeues
/// a pass. Stream errors are classified and the controller restarted after
/// the configured delay until a shutdown signal arrives.
pub async fn run_watch_loop(
    client: Client,
    configs: Api<AssistantConfig>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let namespace = reconciler.namespace().to_string();
    let restart_delay = reconciler.config.watch_restart_delay();

    // Mark not ready on SIGINT/SIGTERM so probes fail while in-flight passes finish
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
    });

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );
        info!("Starting controller watch loop...");

        Controller::new(configs.clone(), watcher::Config::default().any_semantic())
            .owns(
                Api::<Deployment>::namespaced(client.clone(), &namespace),
                watcher::Config::default(),
            )
            .owns(
                Api::<Service>::namespaced(client.clone(), &namespace),
                watcher::Config::default(),
            )
            .owns(
                Api::<Secret>::namespaced(client.clone(), &namespace),
                watcher::Config::default(),
            )
            .owns(
                Api::<ConfigMap>::namespaced(client.clone(), &namespace),
                watcher::Config::default(),
            )
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .take_while(|result| match result {
                Ok((object, _action)) => {
                    debug!(resource.name = %object.name, "watch.event.success");
                    Either::Left(future::ready(true))
                }
                // Already handled by the error policy
                Err(controller::Error::ReconcilerFailed(e, object)) => {
                    debug!(resource.name = %object.name, error = %e, "watch.event.reconcile_failed");
                    Either::Left(future::ready(true))
                }
                Err(e) => Either::Right(handle_watch_stream_error(e.to_string(), restart_delay)),
            })
            .for_each(|_| future::ready(()))
            .instrument(watch_span)
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            restart_delay.as_secs()
        );
        tokio::time::sleep(restart_delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}
