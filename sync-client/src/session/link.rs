//! One live TCP connection: a writer task draining queued requests and a
//! reader task routing replies.

use crate::session::lock;
use crate::session::mailbox::{Mailbox, Waiter};
use crate::session::receiver::Receiver;
use crate::utils::{ClientError, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use sync_proto::{ClientCodec, Request};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

pub(crate) struct Link {
    pub id: u64,
    requests: mpsc::UnboundedSender<Request>,
    mailbox: Arc<Mutex<Mailbox>>,
    cancel: CancellationToken,
}

impl Link {
    /// Start the reader and writer tasks. `on_close` runs once both sides
    /// have stopped for any reason.
    pub fn spawn<F>(id: u64, stream: TcpStream, cancel: CancellationToken, on_close: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (read_half, write_half) = stream.into_split();
        let (requests, rx) = mpsc::unbounded_channel();
        let mailbox = Arc::new(Mutex::new(Mailbox::new()));

        tokio::spawn(write_loop(
            FramedWrite::new(write_half, ClientCodec::new()),
            rx,
            cancel.clone(),
        ));
        tokio::spawn(read_loop(
            FramedRead::new(read_half, ClientCodec::new()),
            Receiver::new(mailbox.clone()),
            cancel.clone(),
            on_close,
        ));

        Arc::new(Self {
            id,
            requests,
            mailbox,
            cancel,
        })
    }

    /// Queue `request`, registering `waiter` for its reply.
    pub fn post(&self, waiter: Waiter, request: Request) -> Result<()> {
        let mut mailbox = lock(&self.mailbox);
        mailbox.admit(waiter.kind())?;
        self.requests
            .send(request)
            .map_err(|_| ClientError::Disconnected)?;
        mailbox.push(waiter);
        Ok(())
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, ClientCodec>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => request,
        };
        let Some(request) = request else { break };

        if let Err(e) = sink.send(request).await {
            tracing::warn!("Failed to send request: {}", e);
            break;
        }
    }
    cancel.cancel();
}

async fn read_loop<F>(
    mut replies: FramedRead<OwnedReadHalf, ClientCodec>,
    mut receiver: Receiver,
    cancel: CancellationToken,
    on_close: F,
) where
    F: FnOnce(),
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = replies.next() => next,
        };

        match next {
            Some(Ok(reply)) => receiver.handle(reply).await,
            Some(Err(e)) => {
                tracing::warn!("Dropping connection after protocol error: {}", e);
                break;
            }
            None => {
                tracing::info!("Server closed the connection");
                break;
            }
        }
    }

    cancel.cancel();
    receiver.shutdown().await;
    on_close();
}
