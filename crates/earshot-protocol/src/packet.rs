//! The packet envelope and the socket frame that carries it.
//!
//! ```text
//! ┌ Frame ──────────────────────────────────────┐
//! │ event: "data"                               │  ← socket event name
//! │ payload: "<Packet as JSON string>"          │
//! │   ┌ Packet ───────────────────────────────┐ │
//! │   │ channel: "voice-drop"                 │ │  ← which payload shape
//! │   │ payload: { "streamKey": "..." }       │ │
//! │   │ client: "3f1c...-uuid"                │ │  ← stamped at send time
//! │   └───────────────────────────────────────┘ │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Outbound packets all travel on the single `"data"` event. Inbound
//! messages use the channel tag itself as the event name, with the
//! payload object directly inside.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Channel, ChannelPayload, ClientId, ProtocolError};

/// Socket event name used for every outbound packet.
pub const DATA_EVENT: &str = "data";

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A channel-tagged payload, optionally addressed to one client.
///
/// Fields are private: once built, a packet can't be edited. The only
/// "change" is [`addressed_to`](Packet::addressed_to), which consumes the
/// packet and returns a stamped one. Payload builders don't know the final
/// wire target, the sender does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    channel: Channel,
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client: Option<ClientId>,
}

impl Packet {
    /// Builds an unaddressed packet from a typed payload.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the payload can't be represented
    /// as JSON (e.g. a map with non-string keys).
    pub fn new<P: ChannelPayload>(payload: &P) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: P::CHANNEL,
            payload: serde_json::to_value(payload).map_err(ProtocolError::Encode)?,
            client: None,
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The client this packet is addressed to, if it was stamped.
    pub fn client(&self) -> Option<ClientId> {
        self.client
    }

    /// Returns the same packet addressed to `client`.
    pub fn addressed_to(self, client: ClientId) -> Self {
        Self {
            client: Some(client),
            ..self
        }
    }

    /// Decodes the payload as `P`.
    ///
    /// # Errors
    /// - `ProtocolError::ChannelMismatch` if `P` belongs to another channel
    /// - `ProtocolError::Decode` if the payload shape doesn't fit `P`
    pub fn decode<P: ChannelPayload>(&self) -> Result<P, ProtocolError> {
        if self.channel != P::CHANNEL {
            return Err(ProtocolError::ChannelMismatch {
                expected: P::CHANNEL,
                actual: self.channel,
            });
        }
        P::deserialize(&self.payload).map_err(ProtocolError::Decode)
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One push-socket event: a name and its JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    /// Wraps a packet into the outbound `"data"` event.
    ///
    /// The packet is serialized to a JSON *string* inside the frame, which
    /// is how the relay expects data events.
    pub fn data(packet: &Packet) -> Result<Self, ProtocolError> {
        let text = serde_json::to_string(packet).map_err(ProtocolError::Encode)?;
        Ok(Self {
            event: DATA_EVENT.to_string(),
            payload: Value::String(text),
        })
    }

    /// Builds a channel-named event carrying `payload` directly, the way
    /// the relay delivers inbound messages.
    pub fn for_channel<P: ChannelPayload>(payload: &P) -> Result<Self, ProtocolError> {
        Ok(Self {
            event: P::CHANNEL.as_str().to_string(),
            payload: serde_json::to_value(payload).map_err(ProtocolError::Encode)?,
        })
    }

    /// The channel named by this frame's event, if it is one.
    pub fn channel(&self) -> Option<Channel> {
        Channel::from_tag(&self.event)
    }

    /// Decodes a channel-named frame's payload as `P`.
    ///
    /// Extra fields are ignored; missing required ones fail only this
    /// message.
    ///
    /// # Errors
    /// - `ProtocolError::UnknownChannel` if the event names no channel
    /// - `ProtocolError::ChannelMismatch` if it names a different channel
    /// - `ProtocolError::Decode` if the payload shape doesn't fit `P`
    pub fn decode<P: ChannelPayload>(&self) -> Result<P, ProtocolError> {
        let channel = self
            .channel()
            .ok_or_else(|| ProtocolError::UnknownChannel(self.event.clone()))?;
        if channel != P::CHANNEL {
            return Err(ProtocolError::ChannelMismatch {
                expected: P::CHANNEL,
                actual: channel,
            });
        }
        P::deserialize(&self.payload).map_err(ProtocolError::Decode)
    }

    /// Unwraps the packet from a `"data"` frame.
    ///
    /// # Errors
    /// - `ProtocolError::InvalidMessage` if this isn't a data frame or its
    ///   payload isn't a string
    /// - `ProtocolError::Decode` if the embedded packet is malformed
    pub fn packet(&self) -> Result<Packet, ProtocolError> {
        if self.event != DATA_EVENT {
            return Err(ProtocolError::InvalidMessage(format!(
                "expected a {DATA_EVENT} frame, got {}",
                self.event
            )));
        }
        let Value::String(text) = &self.payload else {
            return Err(ProtocolError::InvalidMessage(
                "data frame payload must be a string".into(),
            ));
        };
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}
