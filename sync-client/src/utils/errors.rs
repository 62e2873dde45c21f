//! Error types for the sync client.

use std::path::PathBuf;
use sync_proto::{HashError, ProtocolError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not connected to the server")]
    NotConnected,

    #[error("A {0} request is already pending")]
    Busy(&'static str),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Connection lost")]
    Disconnected,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Manifest not found on server")]
    ManifestNotFound,

    #[error("Hash mismatch for {}: expected {expected}, got {actual}", path.display())]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;
