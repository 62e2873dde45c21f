use crate::net::connection::handle_connection;
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Accept clients until `shutdown` fires, one task per connection.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
        }

        let state = state.clone();
        let shutdown = shutdown.child_token();
        tokio::spawn(async move {
            tracing::info!(%peer, "Client connected");
            match handle_connection(stream, state, shutdown).await {
                Ok(()) => tracing::info!(%peer, "Client disconnected"),
                Err(e) => tracing::warn!(%peer, "Connection closed: {}", e),
            }
        });
    }

    tracing::info!("Stopped accepting connections");
}
