//! Sync client library.
//!
//! Keeps a local file tree in line with the manifest published by a sync
//! server: fetch the manifest over a persistent session, diff it against the
//! tree, then delete and download until both match.

pub mod config;
pub mod fs;
pub mod integrity;
pub mod session;
pub mod transfer;
pub mod update;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use config::Config;
pub use integrity::IntegrityReport;
pub use session::{ConnectionState, FileDownload, Session, SessionOptions};
pub use update::{UpdateOutcome, UpdateStatus, Updater};
pub use utils::errors::ClientError;
pub type Result<T> = std::result::Result<T, ClientError>;
