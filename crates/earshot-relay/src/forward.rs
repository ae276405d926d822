//! Packet delivery for node servers.
//!
//! A node has no relay socket of its own. Its packets are stamped here
//! and handed to the proxy, which sends them through its connection.

use std::sync::Arc;

use earshot_protocol::Packet;
use earshot_session::{ClientSession, PacketSink};
use earshot_voice::{NodeForwarder, NodePacket};

/// [`PacketSink`] that forwards every packet to the owning proxy.
pub struct ForwardingSink {
    node: Arc<dyn NodeForwarder>,
}

impl ForwardingSink {
    pub fn new(node: Arc<dyn NodeForwarder>) -> Self {
        Self { node }
    }
}

impl PacketSink for ForwardingSink {
    fn send(&self, session: &ClientSession, packet: Packet) {
        self.node
            .forward(NodePacket::ClientPacket(packet.addressed_to(session.id())));
    }
}
