//! Transport error types.

use std::time::Duration;

use super::stomp::StompError;

/// Errors that can occur while opening or driving a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Handshake rejected: {0}")]
    Rejected(String),

    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] StompError),

    #[error("Connection closed")]
    Closed,
}
