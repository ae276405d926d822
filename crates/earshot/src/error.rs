//! Unified error type for Earshot.

use earshot_protocol::ProtocolError;
use earshot_relay::{DiscoveryError, RelayError};
use earshot_session::SessionError;
use earshot_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `earshot` facade you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum EarshotError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (unknown client, bad token, import mismatch).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The control plane refused or could not be reached.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// A relay driver error.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The builder was missing something it needs.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The logging subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}
