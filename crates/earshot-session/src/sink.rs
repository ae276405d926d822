use earshot_protocol::Packet;

use crate::ClientSession;

/// Where packets for a client go.
///
/// Producers (notifications, the voice graph, host modules) call `send`
/// and move on. Sending is fire-and-forget: an implementation that can't
/// deliver right now drops the packet and counts the drop, it never
/// blocks or fails the caller.
pub trait PacketSink: Send + Sync {
    /// Stamps `packet` with `session`'s id and delivers it, or drops it.
    fn send(&self, session: &ClientSession, packet: Packet);
}
