//! Wire protocol for Earshot.
//!
//! This crate defines the "language" the game server speaks with the relay:
//!
//! - **Types** ([`ClientId`], [`Vector3`], [`Location`]): identity and
//!   spatial values shared by every layer.
//! - **Channels** ([`Channel`], [`ChannelPayload`]): the stable topic tags
//!   and the fixed payload shape that belongs to each of them.
//! - **Packets** ([`Packet`], [`Frame`]): the envelope that carries a
//!   payload to one client, and the socket event that carries the envelope.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames become bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between the transport (raw bytes) and the relay
//! driver (sessions and state). It has no idea whether a socket is open;
//! it only knows how messages are shaped.
//!
//! ```text
//! Transport (bytes) → Frame (event + payload) → Packet (channel + client)
//! ```

mod channel;
mod codec;
mod error;
mod packet;
mod payloads;
mod types;

pub use channel::{Channel, ChannelPayload, Direction};
pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use packet::{DATA_EVENT, Frame, Packet};
pub use payloads::{
    ClientConnectedPayload, ClientDisconnectedPayload, HueApplyPayload,
    HueColor, LocationUpdate, NotificationPayload, SystemNotificationPayload,
    VoiceDropPayload, VoiceLocationPayload, VoiceStatePayload,
    VoiceSubscribePayload,
};
pub use types::{ClientId, Location, Vector3};
