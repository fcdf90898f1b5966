//! Wiring the engine together and running it.

use std::sync::Arc;

use image_syncer_core::error::Result;
use image_syncer_engine::{
    default_socket_candidates, resolve_runtime_socket, CommandExporter, ImageSyncer,
    KubernetesInventory, OciRegistryClient, PrometheusMetrics, Reconciler, RegistryAuth,
    StaticInventory, TransferExecutor, WorkloadInventory,
};
use tokio_util::sync::CancellationToken;

use crate::args::Args;
use crate::server;

/// Run until `cancel` fires (or after one cycle with `--once`).
///
/// Startup errors are returned; cancellation is a clean exit.
pub async fn run(args: Args, cancel: CancellationToken) -> Result<()> {
    let config = args.to_config();
    config.validate()?;
    let target_host = config.target_host().to_string();

    let endpoint = resolve_runtime_socket(
        config.runtime_socket.as_deref(),
        &default_socket_candidates(),
    )?;

    let metrics = Arc::new(PrometheusMetrics::new(target_host.as_str())?);
    let registry = Arc::new(OciRegistryClient::new(
        target_host.as_str(),
        RegistryAuth::basic(&config.registry_username, &config.registry_password),
        config.insecure_registries.clone(),
        metrics.clone(),
    ));
    let transfer = Arc::new(TransferExecutor::new(
        registry.clone(),
        Arc::new(CommandExporter::new(endpoint)),
    ));
    let syncer = Arc::new(ImageSyncer::new(
        target_host.as_str(),
        registry,
        transfer,
        metrics.clone(),
    ));

    let inventory: Arc<dyn WorkloadInventory> = if args.images.is_empty() {
        Arc::new(KubernetesInventory::connect().await?)
    } else {
        tracing::info!(count = args.images.len(), "Using static image list");
        Arc::new(StaticInventory::new(args.images.clone()))
    };

    let reconciler = Reconciler::new(inventory, syncer, metrics.clone()).with_config(&config);

    if args.once {
        let report = reconciler.run_cycle(&cancel).await?;
        tracing::info!(
            synced = report.synced(),
            skipped = report.skipped,
            failed = report.failed,
            "Single sync cycle finished"
        );
        return Ok(());
    }

    let metrics_addr = server::listen_addr(&config.metrics_addr)?;
    let health_addr = server::listen_addr(&config.health_addr)?;
    let servers = [
        tokio::spawn(server::serve(
            "metrics",
            metrics_addr,
            server::metrics_router(metrics),
            cancel.clone(),
        )),
        tokio::spawn(server::serve(
            "health",
            health_addr,
            server::health_router(),
            cancel.clone(),
        )),
    ];

    let result = reconciler.run(cancel.clone()).await;
    cancel.cancel();

    for server in servers {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
            Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
        }
    }

    match result {
        Err(e) if e.is_cancelled() => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        other => other,
    }
}
