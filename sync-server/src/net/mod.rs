//! TCP front end: accept loop and per-connection request handling.

pub mod connection;
pub mod listener;

pub use connection::handle_connection;
pub use listener::serve;
