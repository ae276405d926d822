//! The built-in inbound handlers.
//!
//! - [`SystemHandler`] logs relay notices for the operator.
//! - [`ClientHandler`] tracks web client and voice readiness per session
//!   and keeps the proximity graph in step with it.

use std::sync::Arc;

use earshot_protocol::{
    Channel, ClientConnectedPayload, ClientDisconnectedPayload, Frame, SystemNotificationPayload,
    VoiceStatePayload,
};
use earshot_voice::ProximityGraph;
use tracing::{debug, info};

use crate::dispatch::{Dispatcher, InboundHandler};
use crate::error::RelayError;

/// Callback for relay notices.
pub type NoticeCallback = Arc<dyn Fn(&str) + Send + Sync>;

// ---------------------------------------------------------------------------
// SystemHandler
// ---------------------------------------------------------------------------

/// Handles `system-notification`.
#[derive(Default)]
pub struct SystemHandler {
    on_notice: Option<NoticeCallback>,
}

impl SystemHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also hands every notice to `callback`, e.g. to show it in-game.
    pub fn with_callback(callback: NoticeCallback) -> Self {
        Self {
            on_notice: Some(callback),
        }
    }

    pub fn install(self: Arc<Self>, dispatcher: &Dispatcher) {
        dispatcher.register(Channel::SystemNotification, self);
    }
}

impl InboundHandler for SystemHandler {
    fn handle(&self, frame: &Frame) -> Result<(), RelayError> {
        let notice: SystemNotificationPayload = frame.decode()?;
        info!(message = %notice.message, "relay notice");
        if let Some(callback) = &self.on_notice {
            callback(&notice.message);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ClientHandler
// ---------------------------------------------------------------------------

/// Handles `client-connected`, `client-disconnected` and `voice-state`.
///
/// Messages about clients with no local session are ignored: the player
/// may have left between the relay sending and us reading.
pub struct ClientHandler {
    graph: Arc<ProximityGraph>,
}

impl ClientHandler {
    pub fn new(graph: Arc<ProximityGraph>) -> Self {
        Self { graph }
    }

    pub fn install(self: Arc<Self>, dispatcher: &Dispatcher) {
        dispatcher.register(Channel::ClientConnected, self.clone());
        dispatcher.register(Channel::ClientDisconnected, self.clone());
        dispatcher.register(Channel::VoiceState, self);
    }

    fn client_connected(&self, payload: ClientConnectedPayload) {
        let Some(session) = self.graph.sessions().get(&payload.client) else {
            debug!(client = %payload.client, "connect for unknown client ignored");
            return;
        };
        session.set_connected(true);
        info!(client = %session.id(), name = session.name(), "web client connected");
    }

    fn client_disconnected(&self, payload: ClientDisconnectedPayload) {
        let Some(session) = self.graph.sessions().get(&payload.client) else {
            debug!(client = %payload.client, "disconnect for unknown client ignored");
            return;
        };
        session.set_connected(false);
        session.set_connected_to_voice(false);
        self.graph.unlink_all(&session);
        session.voice().reset_client();
        info!(client = %session.id(), name = session.name(), "web client disconnected");
    }

    fn voice_state(&self, payload: VoiceStatePayload) {
        let Some(session) = self.graph.sessions().get(&payload.client) else {
            debug!(client = %payload.client, "voice state for unknown client ignored");
            return;
        };
        let was_ready = session.is_connected_to_voice();
        session.set_connected_to_voice(payload.voice_ready);
        if was_ready && !payload.voice_ready {
            self.graph.unlink_all(&session);
        }
        if let Some(enabled) = payload.microphone_enabled {
            self.graph.set_microphone_enabled(&session, enabled);
        }
        debug!(
            client = %session.id(),
            voice_ready = payload.voice_ready,
            microphone = ?payload.microphone_enabled,
            "voice state updated"
        );
    }
}

impl InboundHandler for ClientHandler {
    fn handle(&self, frame: &Frame) -> Result<(), RelayError> {
        match frame.channel() {
            Some(Channel::ClientConnected) => self.client_connected(frame.decode()?),
            Some(Channel::ClientDisconnected) => self.client_disconnected(frame.decode()?),
            Some(Channel::VoiceState) => self.voice_state(frame.decode()?),
            _ => debug!(event = %frame.event, "client handler got a foreign frame"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use earshot_protocol::{ClientId, Location, Packet, Vector3};
    use earshot_session::{
        ClientSession, PacketSink, PlayerIdentity, SessionConfig, SessionRegistry, TokenFactory,
    };
    use earshot_voice::NoVoiceControl;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(ClientId, Packet)>>,
    }

    impl PacketSink for Recorder {
        fn send(&self, session: &ClientSession, packet: Packet) {
            self.sent.lock().push((session.id(), packet));
        }
    }

    struct Harness {
        graph: Arc<ProximityGraph>,
        sink: Arc<Recorder>,
        dispatcher: Dispatcher,
    }

    fn harness() -> Harness {
        let registry = Arc::new(SessionRegistry::new(
            TokenFactory::new("pub"),
            SessionConfig::default(),
        ));
        let sink = Arc::new(Recorder::default());
        let graph = Arc::new(ProximityGraph::new(
            registry,
            sink.clone(),
            Arc::new(()),
            Arc::new(NoVoiceControl),
        ));
        let dispatcher = Dispatcher::new();
        Arc::new(ClientHandler::new(graph.clone())).install(&dispatcher);
        Harness {
            graph,
            sink,
            dispatcher,
        }
    }

    fn player(h: &Harness, name: &str) -> Arc<ClientSession> {
        h.graph
            .sessions()
            .register(PlayerIdentity::new(ClientId::random(), name), None)
            .unwrap()
    }

    fn voice_state(client: ClientId, ready: bool, mic: Option<bool>) -> Frame {
        Frame::for_channel(&VoiceStatePayload {
            client,
            voice_ready: ready,
            microphone_enabled: mic,
        })
        .unwrap()
    }

    // =====================================================================
    // ClientHandler
    // =====================================================================

    #[test]
    fn test_client_connected_marks_session() {
        let h = harness();
        let alex = player(&h, "Alex");

        h.dispatcher.dispatch_frame(
            &Frame::for_channel(&ClientConnectedPayload { client: alex.id() }).unwrap(),
        );

        assert!(alex.is_connected());
    }

    #[test]
    fn test_voice_state_sets_readiness_and_microphone() {
        let h = harness();
        let alex = player(&h, "Alex");
        alex.set_connected(true);

        h.dispatcher.dispatch_frame(&voice_state(alex.id(), true, Some(true)));

        assert!(alex.is_voice_ready());
        assert!(alex.voice().is_microphone_enabled());
    }

    #[test]
    fn test_client_disconnected_unlinks_peers() {
        let h = harness();
        let alex = player(&h, "Alex");
        let sam = player(&h, "Sam");
        for s in [&alex, &sam] {
            s.set_connected(true);
            s.set_connected_to_voice(true);
        }
        assert!(h.graph.link(&alex, &sam));

        h.dispatcher.dispatch_frame(
            &Frame::for_channel(&ClientDisconnectedPayload { client: alex.id() }).unwrap(),
        );

        assert!(!alex.is_connected());
        assert!(!sam.voice().is_subscribed_to(alex.id()));
        assert_eq!(alex.voice().subscription_count(), 0);
        let drops = h
            .sink
            .sent
            .lock()
            .iter()
            .filter(|(to, p)| *to == sam.id() && p.channel() == Channel::VoiceDrop)
            .count();
        assert_eq!(drops, 1);
    }

    #[test]
    fn test_client_reconnect_starts_with_clean_voice_state() {
        let h = harness();
        let alex = player(&h, "Alex");
        let sam = player(&h, "Sam");
        for s in [&alex, &sam] {
            s.set_connected(true);
            s.set_connected_to_voice(true);
            s.voice().swap_microphone_enabled(true);
        }
        h.graph.link(&alex, &sam);
        h.graph.on_location_tick(
            &alex,
            Location::new("world", Vector3::new(3.0, 64.0, 0.0), 0.0, 0.0),
        );
        assert_eq!(sam.voice().pending_location_count(), 1);

        h.dispatcher.dispatch_frame(
            &Frame::for_channel(&ClientDisconnectedPayload { client: sam.id() }).unwrap(),
        );
        h.dispatcher.dispatch_frame(
            &Frame::for_channel(&ClientConnectedPayload { client: sam.id() }).unwrap(),
        );
        h.sink.sent.lock().clear();
        h.graph.flush_locations();

        assert!(!sam.voice().is_microphone_enabled());
        assert_eq!(sam.voice().pending_location_count(), 0);
        assert!(h.sink.sent.lock().is_empty());
    }

    #[test]
    fn test_voice_lost_unlinks_peers() {
        let h = harness();
        let alex = player(&h, "Alex");
        let sam = player(&h, "Sam");
        for s in [&alex, &sam] {
            s.set_connected(true);
            s.set_connected_to_voice(true);
        }
        h.graph.link(&alex, &sam);

        h.dispatcher.dispatch_frame(&voice_state(alex.id(), false, None));

        assert!(alex.is_connected());
        assert!(!alex.is_voice_ready());
        assert!(!sam.voice().is_subscribed_to(alex.id()));
    }

    #[test]
    fn test_unknown_client_is_ignored() {
        let h = harness();

        h.dispatcher.dispatch_frame(
            &Frame::for_channel(&ClientConnectedPayload {
                client: ClientId::random(),
            })
            .unwrap(),
        );

        assert!(h.sink.sent.lock().is_empty());
    }

    // =====================================================================
    // SystemHandler
    // =====================================================================

    #[test]
    fn test_system_notice_reaches_callback() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = seen.clone();
        Arc::new(SystemHandler::with_callback(Arc::new(move |msg: &str| {
            sink.lock().push(msg.to_string());
        })))
        .install(&dispatcher);

        dispatcher.dispatch_frame(
            &Frame::for_channel(&SystemNotificationPayload {
                message: "relay restarting".into(),
            })
            .unwrap(),
        );

        assert_eq!(*seen.lock(), vec!["relay restarting".to_string()]);
    }
}
