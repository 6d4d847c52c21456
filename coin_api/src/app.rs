use crate::config::Config;
use crate::server::HttpServer;
use crate::telemetry::Metrics;

use coin_detection::{ModelService, OrtModelService};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_service: Arc<dyn ModelService> =
        match OrtModelService::new(&config.model, &config.labels) {
            Ok(service) => Arc::new(service),
            Err(e) => {
                tracing::error!("Failed to load model: {}", e);
                return Err(Box::new(e));
            }
        };

    let class_names: Vec<&str> = model_service
        .labels()
        .iter()
        .map(|label| label.label.as_str())
        .collect();
    tracing::info!("Model loaded with classes: {:?}", class_names);

    let metrics = Arc::new(Metrics::new()?);
    let server = HttpServer::new(model_service, metrics, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Server stopped with error: {}", e),
        Err(e) => tracing::error!("Server task failed: {}", e),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
