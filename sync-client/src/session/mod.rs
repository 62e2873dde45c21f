//! Client session: one persistent connection to the sync server.
//!
//! A [`Session`] is cheap to clone; every clone drives the same connection.
//! Requests of the same kind are not queued: while one is pending a second
//! fails with [`ClientError::Busy`]. A timed-out request is not cancelled on
//! the wire; its late reply is recognized and discarded.

mod link;
pub(crate) mod mailbox;
mod receiver;

use crate::config::Config;
use crate::transfer::progress::Progress;
use crate::utils::{ClientError, Result};
use link::Link;
use mailbox::Waiter;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sync_proto::{ManifestRecord, Request};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Appended to a destination while its download is in progress.
pub(crate) const PART_SUFFIX: &str = ".part";

const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// `host:port` of the server
    pub addr: String,
    pub auto_reconnect: bool,
    pub connect_timeout: Duration,
    pub manifest_timeout: Duration,
    pub file_timeout: Duration,
}

impl SessionOptions {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            auto_reconnect: true,
            connect_timeout: Duration::from_secs(10),
            manifest_timeout: Duration::from_secs(10),
            file_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            addr: config.server_addr(),
            auto_reconnect: config.server.auto_reconnect,
            connect_timeout: config.connect_timeout(),
            manifest_timeout: config.manifest_timeout(),
            file_timeout: config.file_timeout(),
        }
    }
}

/// A completed file download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDownload {
    pub bytes: u64,
    /// MD5 of the received bytes
    pub content_hash: String,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    options: SessionOptions,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Arc<Link>>>,
    /// Cancelled by `disconnect()`; stops reconnect attempts
    shutdown: Mutex<CancellationToken>,
    next_link_id: AtomicU64,
    progress: Arc<Progress>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                options,
                state,
                link: Mutex::new(None),
                shutdown: Mutex::new(CancellationToken::new()),
                next_link_id: AtomicU64::new(0),
                progress: Arc::new(Progress::new()),
            }),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Progress of the current update pass.
    pub fn progress(&self) -> Arc<Progress> {
        self.inner.progress.clone()
    }

    /// Open the connection. With auto-reconnect enabled, a later drop of
    /// this connection triggers reconnect attempts until [`Self::disconnect`].
    pub async fn connect(&self) -> Result<()> {
        let token = {
            let mut shutdown = lock(&self.inner.shutdown);
            if shutdown.is_cancelled() {
                *shutdown = CancellationToken::new();
            }
            shutdown.clone()
        };
        self.establish(&token).await
    }

    /// Close the connection and stop reconnecting. Pending requests fail
    /// with [`ClientError::Disconnected`].
    pub fn disconnect(&self) {
        lock(&self.inner.shutdown).cancel();
        if let Some(link) = lock(&self.inner.link).take() {
            link.close();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Fetch the latest manifest, or a named version. `Ok(None)` when the
    /// server has no such manifest.
    pub async fn request_manifest(&self, version: Option<&str>) -> Result<Option<ManifestRecord>> {
        let (tx, rx) = oneshot::channel();
        let request = Request::Manifest {
            version: version.map(str::to_string),
        };
        self.link()?.post(Waiter::Manifest(tx), request)?;
        await_reply(rx, self.inner.options.manifest_timeout, "manifest").await
    }

    /// Download `source_path` into `dest`, replacing it once the whole body
    /// has arrived.
    pub async fn request_file(&self, source_path: &str, dest: &Path) -> Result<FileDownload> {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter::File {
            source_path: source_path.to_string(),
            dest: dest.to_path_buf(),
            reply: tx,
        };
        let request = Request::File {
            source_path: source_path.to_string(),
        };
        self.link()?.post(waiter, request)?;
        await_reply(rx, self.inner.options.file_timeout, "file").await
    }

    fn link(&self) -> Result<Arc<Link>> {
        lock(&self.inner.link)
            .clone()
            .ok_or(ClientError::NotConnected)
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
    }

    async fn establish(&self, token: &CancellationToken) -> Result<()> {
        let addr = &self.inner.options.addr;
        self.set_state(ConnectionState::Connecting);

        let stream = match tokio::time::timeout(
            self.inner.options.connect_timeout,
            TcpStream::connect(addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::Timeout("connection"));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let id = self.inner.next_link_id.fetch_add(1, Ordering::SeqCst);
        let weak = Arc::downgrade(&self.inner);
        let on_close = move || {
            if let Some(inner) = weak.upgrade() {
                Session { inner }.link_lost(id);
            }
        };

        {
            let mut current = lock(&self.inner.link);
            if token.is_cancelled() {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::NotConnected);
            }
            let link = Link::spawn(id, stream, token.child_token(), on_close);
            if let Some(previous) = current.replace(link) {
                previous.close();
            }
            self.set_state(ConnectionState::Connected);
        }

        tracing::info!("Connected to {}", addr);
        Ok(())
    }

    fn link_lost(&self, id: u64) {
        {
            let mut current = lock(&self.inner.link);
            if current.as_ref().map(|link| link.id) != Some(id) {
                return;
            }
            *current = None;
            self.set_state(ConnectionState::Disconnected);
        }
        tracing::warn!("Connection to {} lost", self.inner.options.addr);

        let token = lock(&self.inner.shutdown).clone();
        if self.inner.options.auto_reconnect && !token.is_cancelled() {
            let session = self.clone();
            tokio::spawn(async move { session.reconnect(token).await });
        }
    }

    async fn reconnect(self, token: CancellationToken) {
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            if token.is_cancelled() || self.state() == ConnectionState::Connected {
                return;
            }

            match self.establish(&token).await {
                Ok(()) => {
                    tracing::info!("Reconnected to {}", self.inner.options.addr);
                    return;
                }
                Err(e) => tracing::warn!("Reconnect failed: {}", e),
            }

            tracing::info!("Reconnecting in {}ms...", backoff_ms);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                _ = token.cancelled() => return,
            }

            backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
        }
    }
}

async fn await_reply<T>(
    rx: oneshot::Receiver<Result<T>>,
    limit: Duration,
    what: &'static str,
) -> Result<T> {
    match tokio::time::timeout(limit, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(ClientError::Disconnected),
        Err(_) => {
            tracing::warn!("Timed out waiting for {} reply", what);
            Err(ClientError::Timeout(what))
        }
    }
}

/// Lock ignoring poisoning; the guarded data stays consistent between
/// statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use sync_proto::protocol::manifest_reply;
    use sync_proto::ServerCodec;
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    fn record(version: &str) -> ManifestRecord {
        ManifestRecord {
            version: version.to_string(),
            time: "2025-01-01_00:00:00".to_string(),
            description: String::new(),
            groups: Vec::new(),
        }
    }

    fn reply_for(version: &str) -> bytes::Bytes {
        manifest_reply(&ManifestRecord::to_reply(Some(&record(version))).unwrap())
    }

    async fn listener() -> (TcpListener, SessionOptions) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut options = SessionOptions::new(listener.local_addr().unwrap().to_string());
        options.auto_reconnect = false;
        options.manifest_timeout = Duration::from_millis(200);
        (listener, options)
    }

    #[tokio::test]
    async fn test_not_connected() {
        let session = Session::new(SessionOptions::new("127.0.0.1:1"));
        assert!(matches!(
            session.request_manifest(None).await,
            Err(ClientError::NotConnected)
        ));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let (listener, options) = listener().await;
        drop(listener);

        let session = Session::new(options);
        assert!(session.connect().await.is_err());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_second_manifest_request_is_busy() {
        let (listener, options) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, ServerCodec::new());
            // Answer the first request only after the busy check ran
            let request = framed.next().await.unwrap().unwrap();
            assert_eq!(request, Request::Manifest { version: None });
            tokio::time::sleep(Duration::from_millis(100)).await;
            framed.send(reply_for("1.0")).await.unwrap();
            framed
        });

        let session = Session::new(options);
        session.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.request_manifest(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            session.request_manifest(None).await,
            Err(ClientError::Busy("manifest"))
        ));
        let manifest = first.await.unwrap().unwrap().unwrap();
        assert_eq!(manifest.version, "1.0");

        let _server = server.await.unwrap();
        session.disconnect();
    }

    #[tokio::test]
    async fn test_late_reply_after_timeout_is_discarded() {
        let (listener, mut options) = listener().await;
        options.manifest_timeout = Duration::from_millis(300);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, ServerCodec::new());

            framed.next().await.unwrap().unwrap();
            // Reply well after the client gave up on the first request
            tokio::time::sleep(Duration::from_millis(450)).await;
            framed.send(reply_for("stale")).await.unwrap();

            framed.next().await.unwrap().unwrap();
            framed.send(reply_for("fresh")).await.unwrap();
            framed.next().await
        });

        let session = Session::new(options);
        session.connect().await.unwrap();

        assert!(matches!(
            session.request_manifest(None).await,
            Err(ClientError::Timeout("manifest"))
        ));
        let fresh = session.request_manifest(None).await.unwrap().unwrap();
        assert_eq!(fresh.version, "fresh");
        session.disconnect();
    }

    #[tokio::test]
    async fn test_server_drop_fails_pending_request() {
        let (listener, options) = listener().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, ServerCodec::new());
            framed.next().await;
            drop(framed);
        });

        let session = Session::new(options);
        let mut state = session.watch_state();
        session.connect().await.unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let result = session.request_file("a.txt", &dir.path().join("a.txt")).await;
        assert!(matches!(result, Err(ClientError::Disconnected)));

        state
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_transport_error() {
        let (listener, mut options) = listener().await;
        options.auto_reconnect = true;
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
            drop(listener);
            // Refuse the immediate retry so the client has to back off
            tokio::time::sleep(Duration::from_millis(300)).await;

            let listener = TcpListener::bind(addr).await.unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, ServerCodec::new());
            framed.next().await.unwrap().unwrap();
            framed.send(reply_for("2.0")).await.unwrap();

            // Wait for the client to hang up, then expect no new attempts
            let _ = framed.next().await;
            tokio::time::timeout(Duration::from_millis(2500), listener.accept())
                .await
                .is_err()
        });

        let session = Session::new(options);
        let mut state = session.watch_state();
        session.connect().await.unwrap();

        state
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        let manifest = session.request_manifest(None).await.unwrap().unwrap();
        assert_eq!(manifest.version, "2.0");

        session.disconnect();
        assert!(server.await.unwrap());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_stops_reconnect_backoff() {
        let (listener, mut options) = listener().await;
        options.auto_reconnect = true;
        let addr = listener.local_addr().unwrap();
        let (dropped_tx, dropped_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
            drop(listener);
            let _ = dropped_tx.send(());
        });

        let session = Session::new(options);
        let mut state = session.watch_state();
        session.connect().await.unwrap();
        dropped_rx.await.unwrap();
        state
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await
            .unwrap();

        // The immediate retry is refused; the loop is now backing off
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.disconnect();

        let listener = TcpListener::bind(addr).await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(2500), listener.accept())
                .await
                .is_err()
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
