use sync_proto::ProtocolError;

/// Failure that ends one client connection.
#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection writer closed")]
    WriterClosed,

    #[error("{path} ended after {sent} of {expected} bytes")]
    ShortFile {
        path: String,
        sent: u64,
        expected: u64,
    },
}
