//! Channel identifiers and the payload contract bound to each channel.
//!
//! A channel is a stable string tag such as `"voice-subscribe"`. It tells
//! the receiver which payload shape to expect. The mapping is fixed:
//! every payload type implements [`ChannelPayload`] and names exactly one
//! channel, so a packet can never carry a payload of the wrong shape for
//! its tag.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Which way a channel flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Game server → relay → one client.
    ToClient,
    /// Relay → game server.
    FromRelay,
}

/// Every topic the game server and the relay exchange.
///
/// `#[serde(rename_all = "kebab-case")]` makes `VoiceSubscribe` travel as
/// `"voice-subscribe"`, which is the tag the relay and the web client use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    // -- Game server → client --
    /// A toast shown in the player's web client.
    PushNotification,
    /// Start listening to a peer's voice stream.
    VoiceSubscribe,
    /// Stop listening to a peer's voice stream.
    VoiceDrop,
    /// Batched spatial updates for streams the client listens to.
    VoiceLocation,
    /// Apply a color to the player's smart lights.
    HueApply,

    // -- Relay → game server --
    /// A player's web client opened its session.
    ClientConnected,
    /// A player's web client closed its session.
    ClientDisconnected,
    /// A player's voice media readiness or microphone changed.
    VoiceState,
    /// A message from the relay meant for the server console.
    SystemNotification,
}

impl Channel {
    /// All channels, in declaration order.
    pub const ALL: [Channel; 9] = [
        Channel::PushNotification,
        Channel::VoiceSubscribe,
        Channel::VoiceDrop,
        Channel::VoiceLocation,
        Channel::HueApply,
        Channel::ClientConnected,
        Channel::ClientDisconnected,
        Channel::VoiceState,
        Channel::SystemNotification,
    ];

    /// The wire tag of this channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::PushNotification => "push-notification",
            Channel::VoiceSubscribe => "voice-subscribe",
            Channel::VoiceDrop => "voice-drop",
            Channel::VoiceLocation => "voice-location",
            Channel::HueApply => "hue-apply",
            Channel::ClientConnected => "client-connected",
            Channel::ClientDisconnected => "client-disconnected",
            Channel::VoiceState => "voice-state",
            Channel::SystemNotification => "system-notification",
        }
    }

    /// Looks up a channel by its wire tag. Returns `None` for tags this
    /// build doesn't know.
    pub fn from_tag(tag: &str) -> Option<Channel> {
        Self::ALL.into_iter().find(|c| c.as_str() == tag)
    }

    pub fn direction(&self) -> Direction {
        match self {
            Channel::PushNotification
            | Channel::VoiceSubscribe
            | Channel::VoiceDrop
            | Channel::VoiceLocation
            | Channel::HueApply => Direction::ToClient,
            Channel::ClientConnected
            | Channel::ClientDisconnected
            | Channel::VoiceState
            | Channel::SystemNotification => Direction::FromRelay,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload type bound to exactly one channel.
///
/// Implementations are plain serde structs. Unknown fields are ignored on
/// decode (serde's default), so the relay can add fields without breaking
/// older game servers. Missing required fields fail the decode of that one
/// message.
pub trait ChannelPayload: Serialize + DeserializeOwned + Send + 'static {
    /// The channel this payload travels on.
    const CHANNEL: Channel;
}
