//! MD5 content fingerprints.
//!
//! Hashes are rendered as 32 lowercase hex characters, the form stored in
//! manifests and compared by the integrity check.

use crate::error::HashError;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read buffer used when hashing files.
pub const HASH_BUFFER_SIZE: usize = 8192;

/// Length of a rendered content hash.
pub const HASH_HEX_LEN: usize = 32;

/// Hash an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Hash a file by streaming it in fixed-size chunks.
pub fn hash_file(path: &Path) -> Result<String, HashError> {
    let io_err = |source| HashError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = ContentHasher::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).map_err(io_err)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finish())
}

/// Whether `value` looks like a rendered content hash.
pub fn is_content_hash(value: &str) -> bool {
    value.len() == HASH_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Incremental hasher for data that arrives in pieces (e.g. a download).
#[derive(Default, Clone)]
pub struct ContentHasher {
    inner: Md5,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self { inner: Md5::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}
