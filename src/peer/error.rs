use thiserror::Error;

/// Errors that can occur during neighbor communication.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The handshake preamble did not match or the peer ID was malformed.
    #[error("handshake mismatch")]
    HandshakeMismatch,

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Received an unknown message type.
    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    /// The connection was closed, locally or by the neighbor.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("timeout")]
    Timeout,
}
