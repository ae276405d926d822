//! Error types for the relay layer.

use earshot_protocol::ProtocolError;
use earshot_session::SessionError;
use earshot_transport::TransportError;

/// Machine code used for every failure that didn't come from the control
/// plane itself (network errors, unreadable bodies).
pub const BAD_HANDSHAKE: &str = "BAD_HANDSHAKE";

/// Why relay discovery failed.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The control plane answered with an error payload, or the request
    /// never got an answer (code [`BAD_HANDSHAKE`]).
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    /// The control plane answered, but not with what we asked for.
    #[error("malformed control plane response: {0}")]
    Malformed(String),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl DiscoveryError {
    /// The machine code shown to operators.
    pub fn code(&self) -> &str {
        match self {
            DiscoveryError::Rejected { code, .. } => code,
            DiscoveryError::Malformed(_) | DiscoveryError::Client(_) => BAD_HANDSHAKE,
        }
    }
}

/// Errors surfaced by the relay driver and inbound handlers.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// The driver spawns its socket tasks on the runtime it was built in.
    #[error("the relay driver must be created inside a tokio runtime")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_rejected_uses_control_plane_code() {
        let err = DiscoveryError::Rejected {
            code: "INVALID_KEY".into(),
            message: "no such server".into(),
        };
        assert_eq!(err.code(), "INVALID_KEY");
        assert_eq!(err.to_string(), "INVALID_KEY: no such server");
    }

    #[test]
    fn test_code_malformed_is_bad_handshake() {
        assert_eq!(DiscoveryError::Malformed("x".into()).code(), BAD_HANDSHAKE);
    }

    #[test]
    fn test_from_transport_error() {
        let err: RelayError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, RelayError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }
}
