//! Callers waiting for replies on one connection.
//!
//! Replies arrive in request order, so waiters form a FIFO. At most one live
//! waiter per request kind is admitted; a waiter whose caller gave up (timed
//! out) stays queued so its late reply can be recognized and drained.

use crate::session::FileDownload;
use crate::utils::{ClientError, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use sync_proto::ManifestRecord;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Manifest,
    File,
}

impl RequestKind {
    pub fn name(self) -> &'static str {
        match self {
            RequestKind::Manifest => "manifest",
            RequestKind::File => "file",
        }
    }
}

pub type ManifestReply = oneshot::Sender<Result<Option<ManifestRecord>>>;
pub type FileReply = oneshot::Sender<Result<FileDownload>>;

#[derive(Debug)]
pub enum Waiter {
    Manifest(ManifestReply),
    File {
        source_path: String,
        dest: PathBuf,
        reply: FileReply,
    },
}

impl Waiter {
    pub fn kind(&self) -> RequestKind {
        match self {
            Waiter::Manifest(_) => RequestKind::Manifest,
            Waiter::File { .. } => RequestKind::File,
        }
    }

    /// The caller stopped waiting.
    pub fn is_abandoned(&self) -> bool {
        match self {
            Waiter::Manifest(reply) => reply.is_closed(),
            Waiter::File { reply, .. } => reply.is_closed(),
        }
    }

    /// Resolve with an error, whatever the kind.
    pub fn fail(self, error: ClientError) {
        match self {
            Waiter::Manifest(reply) => {
                let _ = reply.send(Err(error));
            }
            Waiter::File { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Mailbox {
    queue: VecDeque<Waiter>,
    closed: bool,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `kind` while a live waiter of that kind is queued.
    pub fn admit(&self, kind: RequestKind) -> Result<()> {
        if self.closed {
            return Err(ClientError::Disconnected);
        }
        let busy = self
            .queue
            .iter()
            .any(|waiter| waiter.kind() == kind && !waiter.is_abandoned());
        if busy {
            return Err(ClientError::Busy(kind.name()));
        }
        Ok(())
    }

    pub fn push(&mut self, waiter: Waiter) {
        self.queue.push_back(waiter);
    }

    /// The waiter the next reply belongs to.
    pub fn pop(&mut self) -> Option<Waiter> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Fail every queued waiter with [`ClientError::Disconnected`] and
    /// refuse new ones.
    pub fn close(&mut self) {
        self.closed = true;
        for waiter in self.queue.drain(..) {
            waiter.fail(ClientError::Disconnected);
        }
    }
}
