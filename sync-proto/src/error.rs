//! Error types shared by both ends of the connection.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to fingerprint a file.
///
/// Never interpret this as "file absent": callers must propagate it.
#[derive(Error, Debug)]
pub enum HashError {
    #[error("Failed to read {path} for hashing: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    /// Whether the file disappeared before it could be read.
    pub fn is_not_found(&self) -> bool {
        match self {
            HashError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Unknown message tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("Truncated frame while reading {0}")]
    Truncated(&'static str),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("Invalid file length: {0}")]
    InvalidLength(i64),

    #[error("File body overrun: {received} bytes received with {remaining} remaining")]
    BodyOverrun { received: u64, remaining: u64 },

    #[error("Field too large: {0} bytes")]
    FieldTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
