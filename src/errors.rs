// Crate-wide error type
// Every fallible path below main funnels into SimnetError

use thiserror::Error;

pub type SimnetResult<T> = std::result::Result<T, SimnetError>;

#[derive(Error, Debug)]
pub enum SimnetError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("axum error: {0}")]
    AxumError(#[from] axum::Error),

    #[error("websocket error: {0}")]
    WsError(#[from] tokio_tungstenite::tungstenite::Error),

    /// Socket failed during send/receive; ends the session.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Wrong framing, mis-identified guid, or unparseable first frame.
    #[error("handshake error: {0}")]
    HandshakeError(String),

    /// Client connected to /connect/{{id}} for an unregistered server.
    #[error("unknown server: {0}")]
    UnknownServer(uuid::Uuid),

    /// Unknown tag, missing required field, or a variant the receiver rejects.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Delete routed through the non-delete merge path.
    #[error("invalid plugin operation: {0}")]
    InvalidPluginOp(String),

    /// Plugin instantiation round made no progress.
    #[error("missing plugin dependency: {0}")]
    MissingDependency(String),

    #[error("operation failed: {0}")]
    OpFailed(String),
}

pub fn transport_error(msg: impl ToString) -> SimnetError {
    SimnetError::TransportError(msg.to_string())
}

pub fn handshake_error(msg: impl ToString) -> SimnetError {
    SimnetError::HandshakeError(msg.to_string())
}

pub fn op_failed(msg: impl ToString) -> SimnetError {
    SimnetError::OpFailed(msg.to_string())
}
