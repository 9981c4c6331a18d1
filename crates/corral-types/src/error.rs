use thiserror::Error;

/// Failure taxonomy for the messaging core. The Conversation API
/// surfaces these to its caller synchronously; the gateway never raises
/// store errors and reports transport problems only through its own
/// connection lifecycle.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("conversation not found")]
    NotFound,

    #[error("not a participant in this conversation")]
    Forbidden,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Durable store unavailable or corrupt; retryable by the caller.
    #[error("store error: {0}")]
    Store(String),

    /// Gateway connection issue; the client must reconnect and rejoin
    /// its rooms.
    #[error("transport error: {0}")]
    Transport(String),
}
