//! Error types for the protocol layer.
//!
//! Each crate in Earshot defines its own error enum. A `ProtocolError`
//! always means "this one message could not be understood", never "the
//! connection is broken". Callers drop the message and carry on.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into JSON).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning JSON into a Rust type).
    ///
    /// Common causes: malformed JSON, a missing required field, or a
    /// field with the wrong type. Extra fields never cause this.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The event name does not match any known channel.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// A packet was decoded as a payload belonging to another channel.
    #[error("channel mismatch: expected {expected}, got {actual}")]
    ChannelMismatch {
        /// The channel of the requested payload type.
        expected: crate::Channel,
        /// The channel the packet was actually sent on.
        actual: crate::Channel,
    },

    /// The message parsed but breaks a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
