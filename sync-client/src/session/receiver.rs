//! Routes decoded replies to their waiters and writes file bodies to disk.

use crate::session::mailbox::{FileReply, Mailbox, Waiter};
use crate::session::{lock, FileDownload, PART_SUFFIX};
use crate::utils::ClientError;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use sync_proto::hash::ContentHasher;
use sync_proto::{ManifestRecord, Reply};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

pub(crate) struct Receiver {
    mailbox: Arc<Mutex<Mailbox>>,
    body: Body,
}

/// What to do with incoming body chunks.
enum Body {
    Idle,
    Receiving(Download),
    /// Body of a reply nobody is waiting for
    Draining { name: String },
}

impl Receiver {
    pub fn new(mailbox: Arc<Mutex<Mailbox>>) -> Self {
        Self {
            mailbox,
            body: Body::Idle,
        }
    }

    pub async fn handle(&mut self, reply: Reply) {
        match reply {
            Reply::Manifest(body) => self.on_manifest(&body),
            Reply::FileError { name, message } => self.on_file_error(name, message),
            Reply::FileHeader { name, length } => self.on_file_header(name, length).await,
            Reply::FileChunk { data, remaining } => self.on_chunk(data, remaining).await,
        }
    }

    /// The connection ended: fail the running download and every waiter.
    pub async fn shutdown(&mut self) {
        if let Body::Receiving(download) = std::mem::replace(&mut self.body, Body::Idle) {
            download.abort(ClientError::Disconnected).await;
        }
        lock(&self.mailbox).close();
    }

    fn next_waiter(&self) -> Option<Waiter> {
        lock(&self.mailbox).pop()
    }

    fn on_manifest(&mut self, body: &str) {
        match self.next_waiter() {
            Some(Waiter::Manifest(reply)) if reply.is_closed() => {
                tracing::warn!("Discarding unexpected manifest reply that arrived after its timeout");
            }
            Some(Waiter::Manifest(reply)) => {
                let parsed = ManifestRecord::from_reply(body).map_err(ClientError::from);
                let _ = reply.send(parsed);
            }
            Some(other) => {
                tracing::warn!("Received a manifest reply while a {} reply was due", other.kind().name());
                other.fail(ClientError::UnexpectedReply("manifest".to_string()));
            }
            None => tracing::warn!("Discarding unexpected manifest reply"),
        }
    }

    fn on_file_error(&mut self, name: String, message: String) {
        match self.next_waiter() {
            Some(Waiter::File { reply, .. }) if reply.is_closed() => {
                tracing::warn!("Discarding unexpected error reply for {} after its timeout", name);
            }
            Some(Waiter::File {
                source_path, reply, ..
            }) if source_path == name => {
                let _ = reply.send(Err(ClientError::Server(message)));
            }
            Some(other) => {
                tracing::warn!("Received an error reply for {} that no request matches", name);
                other.fail(ClientError::UnexpectedReply(format!("error for {name}")));
            }
            None => tracing::warn!("Discarding unexpected error reply for {}: {}", name, message),
        }
    }

    async fn on_file_header(&mut self, name: String, length: u64) {
        match self.next_waiter() {
            Some(Waiter::File { reply, .. }) if reply.is_closed() => {
                tracing::warn!("Draining unexpected reply for {} after its timeout", name);
            }
            Some(Waiter::File {
                source_path,
                dest,
                reply,
            }) if source_path == name => match Download::begin(name.clone(), dest, reply).await {
                Ok(download) if length == 0 => {
                    download.finish().await;
                    return;
                }
                Ok(download) => {
                    self.body = Body::Receiving(download);
                    return;
                }
                Err(()) => {}
            },
            Some(other) => {
                tracing::warn!("Received file {} that no request matches", name);
                other.fail(ClientError::UnexpectedReply(format!("file {name}")));
            }
            None => tracing::warn!("Draining unexpected file reply for {}", name),
        }

        if length > 0 {
            self.body = Body::Draining { name };
        }
    }

    async fn on_chunk(&mut self, data: Bytes, remaining: u64) {
        match std::mem::replace(&mut self.body, Body::Idle) {
            Body::Receiving(mut download) => {
                if let Err(e) = download.write(&data).await {
                    let name = download.name.clone();
                    download.abort(ClientError::Io(e)).await;
                    if remaining > 0 {
                        self.body = Body::Draining { name };
                    }
                } else if remaining == 0 {
                    download.finish().await;
                } else {
                    self.body = Body::Receiving(download);
                }
            }
            Body::Draining { name } => {
                if remaining > 0 {
                    self.body = Body::Draining { name };
                } else {
                    tracing::debug!("Drained body of {}", name);
                }
            }
            Body::Idle => tracing::warn!("Discarding file data outside of a reply"),
        }
    }
}

/// A file body being written to `<dest>.part`.
struct Download {
    name: String,
    dest: PathBuf,
    part: PathBuf,
    file: File,
    hasher: ContentHasher,
    bytes: u64,
    reply: FileReply,
}

impl Download {
    /// Open the part file. On failure the waiter is resolved here.
    async fn begin(name: String, dest: PathBuf, reply: FileReply) -> Result<Self, ()> {
        let part = part_path(&dest);
        match open_part(&part).await {
            Ok(file) => Ok(Self {
                name,
                dest,
                part,
                file,
                hasher: ContentHasher::new(),
                bytes: 0,
                reply,
            }),
            Err(e) => {
                tracing::warn!("Failed to create {}: {}", part.display(), e);
                let _ = reply.send(Err(ClientError::Io(e)));
                Err(())
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all(data).await?;
        self.hasher.update(data);
        self.bytes += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self) {
        if let Err(e) = self.file.flush().await {
            self.abort(ClientError::Io(e)).await;
            return;
        }
        drop(self.file);

        if self.reply.is_closed() {
            tracing::warn!("Discarding unexpected late download of {}", self.name);
            let _ = tokio::fs::remove_file(&self.part).await;
            return;
        }

        let result = match tokio::fs::rename(&self.part, &self.dest).await {
            Ok(()) => Ok(FileDownload {
                bytes: self.bytes,
                content_hash: self.hasher.finish(),
            }),
            Err(e) => {
                let _ = tokio::fs::remove_file(&self.part).await;
                Err(ClientError::Io(e))
            }
        };
        let _ = self.reply.send(result);
    }

    async fn abort(self, error: ClientError) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.part).await {
            tracing::debug!("Failed to remove {}: {}", self.part.display(), e);
        }
        let _ = self.reply.send(Err(error));
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut part = dest.as_os_str().to_os_string();
    part.push(PART_SUFFIX);
    PathBuf::from(part)
}

async fn open_part(part: &Path) -> std::io::Result<File> {
    if let Some(parent) = part.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    File::create(part).await
}
