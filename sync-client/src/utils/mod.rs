//! Utility modules for the sync client.

pub mod errors;
pub mod logger;

pub use errors::{ClientError, Result};
