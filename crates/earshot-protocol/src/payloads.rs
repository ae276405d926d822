//! Payload structs, one per channel.
//!
//! Field names travel in camelCase (`targetStreamKey`), which is what the
//! relay and the browser client expect. `#[serde(rename_all = "camelCase")]`
//! handles the translation so the Rust side keeps snake_case.

use serde::{Deserialize, Serialize};

use crate::{Channel, ChannelPayload, ClientId};

// ---------------------------------------------------------------------------
// Game server → client
// ---------------------------------------------------------------------------

/// A toast in the player's web client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
}

impl ChannelPayload for NotificationPayload {
    const CHANNEL: Channel = Channel::PushNotification;
}

/// The spatial state of one voice stream, as seen by one listener.
///
/// `x`, `y`, `z` are relative to the listener, so the browser can pan the
/// stream without knowing absolute world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    /// Stream key of the speaker this update describes.
    pub stream_key: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub pitch: f32,
    pub yaw: f32,
}

/// Tells a client to start listening to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSubscribePayload {
    pub target_stream_key: String,
    pub target_player_name: String,
    pub target_uuid: ClientId,
    pub location: LocationUpdate,
}

impl ChannelPayload for VoiceSubscribePayload {
    const CHANNEL: Channel = Channel::VoiceSubscribe;
}

/// Tells a client to stop listening to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceDropPayload {
    pub stream_key: String,
}

impl ChannelPayload for VoiceDropPayload {
    const CHANNEL: Channel = Channel::VoiceDrop;
}

/// A batch of location updates flushed to one listener in one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceLocationPayload {
    pub updates: Vec<LocationUpdate>,
}

impl ChannelPayload for VoiceLocationPayload {
    const CHANNEL: Channel = Channel::VoiceLocation;
}

/// An RGB(+brightness) light color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HueColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub brightness: u8,
}

/// Applies a color to the lights matched by `selector`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HueApplyPayload {
    pub color: HueColor,
    /// Light selector, e.g. `"[1,2,3]"` or `"*"`.
    pub selector: String,
}

impl ChannelPayload for HueApplyPayload {
    const CHANNEL: Channel = Channel::HueApply;
}

// ---------------------------------------------------------------------------
// Relay → game server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConnectedPayload {
    pub client: ClientId,
}

impl ChannelPayload for ClientConnectedPayload {
    const CHANNEL: Channel = Channel::ClientConnected;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisconnectedPayload {
    pub client: ClientId,
}

impl ChannelPayload for ClientDisconnectedPayload {
    const CHANNEL: Channel = Channel::ClientDisconnected;
}

/// Voice media readiness for one client.
///
/// `microphone_enabled` is absent when only readiness changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStatePayload {
    pub client: ClientId,
    pub voice_ready: bool,
    #[serde(default)]
    pub microphone_enabled: Option<bool>,
}

impl ChannelPayload for VoiceStatePayload {
    const CHANNEL: Channel = Channel::VoiceState;
}

/// A relay-side message for the server operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotificationPayload {
    pub message: String,
}

impl ChannelPayload for SystemNotificationPayload {
    const CHANNEL: Channel = Channel::SystemNotification;
}
