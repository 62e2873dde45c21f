//! One client connection.
//!
//! Requests are decoded and answered strictly in order. Replies go through a
//! bounded queue drained by a writer task, so streaming a file from disk
//! stalls when the peer stops reading instead of buffering the whole file.

use crate::error::ServeError;
use crate::state::AppState;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use sync_proto::protocol::{
    self, FILE_CHUNK_SIZE, FILE_NOT_IN_LIST, FILE_NOT_ON_SERVER, MANIFEST_UNAVAILABLE,
};
use sync_proto::{ManifestRecord, Request, ServerCodec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// Frames buffered between request handling and the socket.
const WRITE_QUEUE_DEPTH: usize = 16;

pub async fn handle_connection<S>(
    stream: S,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<(), ServeError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut requests = FramedRead::new(reader, ServerCodec::new());
    let mut frames = FramedWrite::new(writer, ServerCodec::new());

    let (tx, mut rx) = mpsc::channel::<Bytes>(WRITE_QUEUE_DEPTH);
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            frames.send(frame).await?;
        }
        Ok::<_, sync_proto::ProtocolError>(())
    });

    let result = loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            next = requests.next() => next,
        };

        match next {
            None => break Ok(()),
            Some(Err(e)) => break Err(e.into()),
            Some(Ok(request)) => {
                if let Err(e) = dispatch(&state, request, &tx).await {
                    break Err(e);
                }
            }
        }
    };

    drop(tx);
    if result.is_err() {
        writer_task.abort();
        return result;
    }
    match writer_task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        // Aborted or panicked; nothing left to flush
        Err(_) => Err(ServeError::WriterClosed),
    }
}

async fn dispatch(
    state: &AppState,
    request: Request,
    tx: &mpsc::Sender<Bytes>,
) -> Result<(), ServeError> {
    match request {
        Request::Manifest { version } => {
            tracing::debug!(version = ?version, "Manifest requested");
            let body = manifest_body(state, version.as_deref()).await;
            send(tx, protocol::manifest_reply(&body)).await
        }
        Request::File { source_path } => serve_file(state, &source_path, tx).await,
    }
}

/// Reply body for a manifest request; storage failures read as "none".
async fn manifest_body(state: &AppState, version: Option<&str>) -> String {
    let found = match version {
        Some(version) => state.store.get_by_version(version).await,
        None => state.store.get_latest().await,
    };
    let record = found.unwrap_or_else(|e| {
        tracing::error!("Failed to read manifest: {e:#}");
        None
    });

    ManifestRecord::to_reply(record.as_ref()).unwrap_or_else(|e| {
        tracing::error!("Failed to encode manifest: {}", e);
        "{}".to_string()
    })
}

async fn serve_file(
    state: &AppState,
    source_path: &str,
    tx: &mpsc::Sender<Bytes>,
) -> Result<(), ServeError> {
    let listed = match state.store.get_latest().await {
        Ok(latest) => latest.is_some_and(|record| record.lists_source(source_path)),
        Err(e) => {
            tracing::error!("Failed to read manifest: {e:#}");
            return send(tx, protocol::file_error(source_path, MANIFEST_UNAVAILABLE)?).await;
        }
    };
    if !listed {
        tracing::debug!(source_path, "Requested file is not in the latest manifest");
        return send(tx, protocol::file_error(source_path, FILE_NOT_IN_LIST)?).await;
    }

    let path = state.config.source_root.join(source_path);
    let (file, length) = match open_listed(&path).await {
        Ok(opened) => opened,
        Err(e) => {
            tracing::warn!(
                source_path,
                "Listed file cannot be read from {}: {}. Re-commit the manifest",
                path.display(),
                e
            );
            return send(tx, protocol::file_error(source_path, FILE_NOT_ON_SERVER)?).await;
        }
    };

    send(tx, protocol::file_header(source_path, length)?).await?;

    let mut body = ReaderStream::with_capacity(file.take(length), FILE_CHUNK_SIZE);
    let mut sent = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        sent += chunk.len() as u64;
        send(tx, chunk).await?;
    }

    if sent < length {
        return Err(ServeError::ShortFile {
            path: source_path.to_string(),
            sent,
            expected: length,
        });
    }

    tracing::debug!(source_path, bytes = sent, "File sent");
    Ok(())
}

async fn open_listed(path: &Path) -> std::io::Result<(tokio::fs::File, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let length = file.metadata().await?.len();
    Ok((file, length))
}

async fn send(tx: &mpsc::Sender<Bytes>, frame: Bytes) -> Result<(), ServeError> {
    tx.send(frame).await.map_err(|_| ServeError::WriterClosed)
}
