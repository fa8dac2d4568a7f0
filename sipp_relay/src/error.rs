// Error types for the relay and its client.

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::ConnectionId;

/// Everything that can go wrong inside the relay or the chat client.
///
/// Only `Bind` and `AlreadyRunning` are fatal to the server process; the
/// rest are scoped to a single connection or a single message.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lock file {} already exists; is another server running?", .path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("message router has shut down")]
    RouterClosed,

    #[error("handshake rejected: {reason}")]
    HandshakeRejected { reason: String },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
