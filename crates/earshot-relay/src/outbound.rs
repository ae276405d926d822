//! The outbound half of the relay socket.
//!
//! [`RelayOutbound`] is the [`PacketSink`] every producer writes to. It
//! owns nothing but a queue sender: the driver's writer task drains the
//! queue into the socket. Packets sent while the relay or the client is
//! offline are dropped and counted, never queued for later.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use earshot_protocol::{Codec, Frame, JsonCodec, Packet, ProtocolError};
use earshot_session::{ClientSession, PacketSink};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::state::StateMachine;

// ---------------------------------------------------------------------------
// Throughput
// ---------------------------------------------------------------------------

/// Packet counters, readable from any thread.
#[derive(Debug, Default)]
pub struct Throughput {
    sent: AtomicU64,
    window: AtomicU64,
    last_window: AtomicU64,
    dropped: AtomicU64,
}

/// A copy of the counters at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputSnapshot {
    pub packets_sent: u64,
    pub packets_last_window: u64,
    pub packets_dropped: u64,
}

impl Throughput {
    fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.window.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Closes the current window. Called once per window by the driver.
    pub fn roll(&self) {
        let count = self.window.swap(0, Ordering::Relaxed);
        self.last_window.store(count, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Packets sent during the last complete window.
    pub fn last_window(&self) -> u64 {
        self.last_window.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ThroughputSnapshot {
        ThroughputSnapshot {
            packets_sent: self.sent(),
            packets_last_window: self.last_window(),
            packets_dropped: self.dropped(),
        }
    }
}

// ---------------------------------------------------------------------------
// RelayOutbound
// ---------------------------------------------------------------------------

/// Stamps, encodes and queues packets for the live relay socket.
pub struct RelayOutbound {
    state: Arc<StateMachine>,
    queue: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    codec: JsonCodec,
    throughput: Throughput,
}

impl RelayOutbound {
    pub(crate) fn new(state: Arc<StateMachine>) -> Self {
        Self {
            state,
            queue: Mutex::new(None),
            codec: JsonCodec,
            throughput: Throughput::default(),
        }
    }

    /// Points the sink at a new socket's writer queue.
    pub(crate) fn attach(&self, queue: mpsc::UnboundedSender<Vec<u8>>) {
        *self.queue.lock() = Some(queue);
    }

    /// Drops the writer queue. The writer task drains what is left and
    /// then closes the socket.
    pub(crate) fn detach(&self) {
        self.queue.lock().take();
    }

    pub fn throughput(&self) -> &Throughput {
        &self.throughput
    }

    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
        let frame = Frame::data(packet)?;
        self.codec.encode(&frame)
    }
}

impl PacketSink for RelayOutbound {
    fn send(&self, session: &ClientSession, packet: Packet) {
        let channel = packet.channel();
        if !session.is_connected() || !self.state.is_connected() {
            trace!(client = %session.id(), %channel, "packet dropped, not connected");
            self.throughput.record_drop();
            return;
        }

        let packet = packet.addressed_to(session.id());
        let bytes = match self.encode(&packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(client = %session.id(), %channel, error = %e, "packet could not be encoded");
                self.throughput.record_drop();
                return;
            }
        };

        let queued = match &*self.queue.lock() {
            Some(queue) => queue.send(bytes).is_ok(),
            None => false,
        };
        if queued {
            self.throughput.record_sent();
        } else {
            trace!(client = %session.id(), %channel, "packet dropped, socket gone");
            self.throughput.record_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use earshot_protocol::{ClientId, VoiceDropPayload};
    use earshot_session::{PlayerIdentity, SessionConfig, SessionRegistry, TokenFactory};

    use super::*;
    use crate::state::{ConnectionState, StateKind};

    fn connected_machine() -> Arc<StateMachine> {
        let machine = Arc::new(StateMachine::new());
        machine.transition(StateKind::Idle, ConnectionState::AssigningRelay);
        machine.transition(StateKind::AssigningRelay, ConnectionState::Connecting);
        machine.transition(StateKind::Connecting, ConnectionState::Connected);
        machine
    }

    fn session() -> Arc<ClientSession> {
        let registry = SessionRegistry::new(TokenFactory::new("pub"), SessionConfig::default());
        registry
            .register(PlayerIdentity::new(ClientId::random(), "Alex"), None)
            .unwrap()
    }

    fn packet() -> Packet {
        Packet::new(&VoiceDropPayload {
            stream_key: "sk".into(),
        })
        .unwrap()
    }

    // =====================================================================
    // send()
    // =====================================================================

    #[test]
    fn test_send_when_connected_queues_stamped_data_frame() {
        let outbound = RelayOutbound::new(connected_machine());
        let (tx, mut rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        let session = session();
        session.set_connected(true);

        outbound.send(&session, packet());

        let bytes = rx.try_recv().unwrap();
        let frame: Frame = JsonCodec.decode(&bytes).unwrap();
        let sent = frame.packet().unwrap();
        assert_eq!(sent.client(), Some(session.id()));
        assert_eq!(outbound.throughput().sent(), 1);
    }

    #[test]
    fn test_send_when_client_offline_drops() {
        let outbound = RelayOutbound::new(connected_machine());
        let (tx, mut rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        let session = session();

        outbound.send(&session, packet());

        assert!(rx.try_recv().is_err());
        assert_eq!(outbound.throughput().sent(), 0);
        assert_eq!(outbound.throughput().dropped(), 1);
    }

    #[test]
    fn test_send_when_relay_not_connected_drops() {
        let outbound = RelayOutbound::new(Arc::new(StateMachine::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        let session = session();
        session.set_connected(true);

        outbound.send(&session, packet());

        assert!(rx.try_recv().is_err());
        assert_eq!(outbound.throughput().dropped(), 1);
    }

    #[test]
    fn test_send_after_detach_drops() {
        let outbound = RelayOutbound::new(connected_machine());
        let (tx, _rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        outbound.detach();
        let session = session();
        session.set_connected(true);

        outbound.send(&session, packet());

        assert_eq!(outbound.throughput().sent(), 0);
        assert_eq!(outbound.throughput().dropped(), 1);
    }

    // =====================================================================
    // Throughput
    // =====================================================================

    #[test]
    fn test_roll_moves_window_count() {
        let throughput = Throughput::default();
        throughput.record_sent();
        throughput.record_sent();

        throughput.roll();

        assert_eq!(throughput.last_window(), 2);
        throughput.roll();
        assert_eq!(throughput.last_window(), 0);
        assert_eq!(throughput.sent(), 2);
    }
}
