/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Opening the connection failed (DNS, TCP, TLS or upgrade).
    #[error("connect to {url} failed: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The TLS client configuration could not be built.
    #[error("tls setup failed: {0}")]
    Tls(String),
}
