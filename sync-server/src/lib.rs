//! Manifest sync server: versioned manifest store, commit scanner, operator
//! console and the TCP dispatcher that serves manifests and file bodies.

pub mod commands;
pub mod commit;
pub mod config;
pub mod console;
pub mod db;
pub mod error;
pub mod models;
pub mod net;
pub mod state;
pub mod store;

pub use commands::CommandResult;
pub use config::{AppConfig, SyncDirSpec};
pub use error::ServeError;
pub use state::AppState;
pub use store::ManifestStore;
