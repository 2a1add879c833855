use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// A non-CONNECT frame arrived on a fresh connection.
    #[error("CONNECT frame expected")]
    ConnectExpected,

    #[error("Unsupported protocol version")]
    UnsupportedProtocolVersion,

    /// Empty client identifier combined with a persistent session request.
    #[error("Client identifier rejected")]
    IdentifierRejected,

    #[error("Bad username or password")]
    BadCredentials,

    /// Connection-level authorization refusal (vhost access, loopback
    /// policy).
    #[error("Not authorized")]
    NotAuthorized,

    /// Topic-level authorization refusal on PUBLISH or SUBSCRIBE; fatal for
    /// the connection.
    #[error("Access refused to topic: {0}")]
    TopicAccessRefused(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("AMQP operation failed: {0}")]
    Amqp(String),

    /// The outgoing frame channel is gone; the socket writer has shut down.
    #[error("Connection closed")]
    ConnectionClosed,
}
