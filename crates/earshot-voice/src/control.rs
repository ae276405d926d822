use earshot_protocol::{ClientId, Packet};

/// The voice media service's remote controls.
pub trait VoiceControl: Send + Sync {
    /// Mutes the client's microphone no matter what the client wants.
    fn force_mute(&self, client: ClientId);

    /// Lifts a previous [`force_mute`](Self::force_mute).
    fn force_unmute(&self, client: ClientId);

    /// Shuts the voice media connection down. Called when the relay
    /// connection is torn down.
    fn stop(&self);
}

/// A [`VoiceControl`] for deployments without a voice media service.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVoiceControl;

impl VoiceControl for NoVoiceControl {
    fn force_mute(&self, client: ClientId) {
        tracing::debug!(%client, "force mute ignored, no voice service");
    }

    fn force_unmute(&self, client: ClientId) {
        tracing::debug!(%client, "force unmute ignored, no voice service");
    }

    fn stop(&self) {}
}

/// A message for the proxy process that owns the live connections.
#[derive(Debug, Clone, PartialEq)]
pub enum NodePacket {
    /// Apply `allow_speaking(allow)` for `client` on the proxy.
    ForceMute { client: ClientId, allow: bool },
    /// Deliver an already-addressed client packet through the proxy's
    /// relay socket.
    ClientPacket(Packet),
}

/// Sends [`NodePacket`]s to the owning proxy.
///
/// Only present in multi-server deployments where this process is a node.
pub trait NodeForwarder: Send + Sync {
    fn forward(&self, packet: NodePacket);
}
