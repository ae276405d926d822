//! Error types for the session layer.

use earshot_protocol::ClientId;

/// Errors that can occur during session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session exists for the given client. The player may have left
    /// while an operation on them was in flight.
    #[error("session not found for client {0}")]
    NotFound(ClientId),

    /// The client already has a registered session.
    #[error("client {0} already has a session")]
    AlreadyRegistered(ClientId),

    /// Imported state belongs to a different player than the one joining.
    #[error("imported session belongs to {actual}, not {expected}")]
    ImportMismatch { expected: ClientId, actual: ClientId },

    /// A token could not be decoded back into its parts.
    #[error("invalid session token: {0}")]
    InvalidToken(String),
}
