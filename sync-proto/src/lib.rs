//! Shared building blocks for the manifest sync server and client.
//!
//! - [`hash`]: MD5 content fingerprints for buffers and files
//! - [`manifest`]: versioned manifest records, path groups and file entries
//! - [`protocol`]: length-prefixed frames, message tags and codecs

pub mod error;
pub mod hash;
pub mod manifest;
pub mod protocol;

pub use error::{HashError, ProtocolError};
pub use manifest::{FileEntry, ManifestRecord, PathGroup, SyncMode};
pub use protocol::{ClientCodec, Reply, Request, ServerCodec};
