use std::sync::Arc;
use sync_server::config::AppConfig;
use sync_server::console::run_console;
use sync_server::db;
use sync_server::net::serve;
use sync_server::state::AppState;
use sync_server::store::ManifestStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    tracing::info!("Starting sync server on port {}", config.port);
    if config.sync_dirs.is_empty() {
        tracing::warn!("No SYNC_DIRS configured, commits will be empty");
    }
    for spec in &config.sync_dirs {
        tracing::info!(
            "Sync dir {} ({}) <- {}",
            spec.target_path,
            spec.mode,
            spec.source_paths.join(", ")
        );
    }

    // Initialize database
    std::fs::create_dir_all(&config.data_dir)?;
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = ManifestStore::open(&config.db_path)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let state = Arc::new(AppState::new(store, config));
    let cancel = CancellationToken::new();

    tokio::spawn(shutdown_signal(cancel.clone()));
    tokio::spawn(run_console(state.clone(), cancel.clone()));

    serve(listener, state.clone(), cancel.clone()).await;

    // Cleanup
    tracing::info!("Shutting down...");
    db::connection::close_pool(state.store.pool());
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl+c: {}", e);
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
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = cancel.cancelled() => return,
    }

    cancel.cancel();
}
