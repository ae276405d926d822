//! Integration tests for the relay driver.
//!
//! The control plane is a `StaticRelayDirectory` and the relay is the
//! relay side of a `MemoryConnector`, so every test runs in paused tokio
//! time without touching the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use earshot_protocol::{
    Channel, ClientConnectedPayload, ClientId, Codec, Frame, JsonCodec, NotificationPayload,
    Packet,
};
use earshot_relay::{
    BAD_HANDSHAKE, ClientHandler, ConnectionState, RelayAssignment, RelayConfig, RelayDriver,
    StaticRelayDirectory,
};
use earshot_session::{
    ClientSession, PacketSink, PlayerIdentity, SessionConfig, SessionRegistry, TokenFactory,
};
use earshot_tick::TokioScheduler;
use earshot_transport::{MemoryConnector, MemoryPeer};
use earshot_voice::{ProximityGraph, VoiceControl};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

type Driver = RelayDriver<StaticRelayDirectory, MemoryConnector>;

// =========================================================================
// Harness
// =========================================================================

#[derive(Default)]
struct CountingVoice {
    stops: AtomicUsize,
}

impl VoiceControl for CountingVoice {
    fn force_mute(&self, _client: ClientId) {}
    fn force_unmute(&self, _client: ClientId) {}
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    driver: Driver,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    voice: Arc<CountingVoice>,
    transitions: Arc<Mutex<Vec<(ConnectionState, ConnectionState)>>>,
    registry: Arc<SessionRegistry>,
}

fn assignment() -> RelayAssignment {
    RelayAssignment {
        secure_endpoint: "wss://relay1/".into(),
        insecure_endpoint: "ws://relay1/".into(),
        relay_id: Uuid::new_v4(),
    }
}

fn harness_with(directory: StaticRelayDirectory) -> Harness {
    let (connector, peers) = MemoryConnector::new();
    let voice = Arc::new(CountingVoice::default());
    let driver = RelayDriver::new(
        directory,
        connector,
        Arc::new(TokioScheduler::current()),
        voice.clone(),
        RelayConfig::default(),
    )
    .unwrap();

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let log = transitions.clone();
    driver.on_state_changed(Arc::new(move |old, new| {
        log.lock().push((old.clone(), new.clone()));
    }));

    let registry = Arc::new(SessionRegistry::new(
        TokenFactory::new("pub"),
        SessionConfig::default(),
    ));

    Harness {
        driver,
        peers,
        voice,
        transitions,
        registry,
    }
}

fn harness() -> Harness {
    harness_with(StaticRelayDirectory::assigning(assignment()))
}

/// Lets spawned tasks run. Time is paused, so this costs nothing.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn connect(h: &mut Harness) -> MemoryPeer {
    let attempt = h.driver.request_connect().expect("driver should be idle");
    attempt.await.unwrap();
    assert_eq!(h.driver.state(), ConnectionState::Connected);
    h.peers.recv().await.expect("relay side of the socket")
}

fn player(h: &Harness, name: &str) -> Arc<ClientSession> {
    h.registry
        .register(PlayerIdentity::new(ClientId::random(), name), None)
        .unwrap()
}

fn notification() -> Packet {
    Packet::new(&NotificationPayload {
        title: "Hi".into(),
        message: "there".into(),
    })
    .unwrap()
}

fn idle_because(reason: &str) -> ConnectionState {
    ConnectionState::Idle(Some(reason.to_string()))
}

// =========================================================================
// Connecting
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_walks_all_states_and_dials_secure_endpoint() {
    let mut h = harness();

    let peer = connect(&mut h).await;

    assert_eq!(peer.url(), "wss://relay1/");
    assert_eq!(h.driver.connector().dialed(), vec!["wss://relay1/".to_string()]);
    assert_eq!(
        *h.transitions.lock(),
        vec![
            (ConnectionState::Idle(None), ConnectionState::AssigningRelay),
            (ConnectionState::AssigningRelay, ConnectionState::Connecting),
            (ConnectionState::Connecting, ConnectionState::Connected),
        ]
    );
    assert!(h.driver.relay_id().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_request_connect_while_attempt_running_is_ignored() {
    let h = harness_with(StaticRelayDirectory::stalled());

    let first = h.driver.request_connect();
    let second = h.driver.request_connect();

    assert!(first.is_some());
    assert!(second.is_none());
    settle().await;
    assert_eq!(h.driver.directory().start_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_request_connect_while_connected_is_ignored() {
    let mut h = harness();
    let _peer = connect(&mut h).await;

    assert!(h.driver.request_connect().is_none());
    assert_eq!(h.driver.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_goes_idle_with_code() {
    let h = harness_with(StaticRelayDirectory::rejecting(BAD_HANDSHAKE, "unreachable"));

    h.driver.request_connect().unwrap().await.unwrap();

    assert_eq!(
        h.driver.state(),
        idle_because("Failed to do the initial handshake. Error: BAD_HANDSHAKE")
    );
    assert!(h.driver.connector().dialed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_discovery_that_never_answers_times_out() {
    let h = harness_with(StaticRelayDirectory::stalled());

    h.driver.request_connect();
    tokio::time::sleep(Duration::from_secs(36)).await;

    assert_eq!(h.driver.state(), idle_because("Connecting to the relay timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_socket_that_never_opens_times_out() {
    let h = harness();
    h.driver.connector().stall();

    h.driver.request_connect();
    tokio::time::sleep(Duration::from_secs(36)).await;

    assert_eq!(
        h.driver.state(),
        idle_because("Connecting to the relay timed out (socket)")
    );
}

#[tokio::test(start_paused = true)]
async fn test_refused_socket_goes_idle_with_reason() {
    let h = harness();
    h.driver.connector().refuse();

    h.driver.request_connect().unwrap().await.unwrap();

    let state = h.driver.state();
    assert!(state.can_connect());
    assert!(
        state
            .reason()
            .is_some_and(|r| r.starts_with("Failed to connect to the relay")),
        "unexpected state {state}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_after_connecting_do_nothing() {
    let mut h = harness();
    let _peer = connect(&mut h).await;
    let before = h.transitions.lock().len();

    tokio::time::sleep(Duration::from_secs(40)).await;

    assert_eq!(h.driver.state(), ConnectionState::Connected);
    assert_eq!(h.transitions.lock().len(), before);
}

// =========================================================================
// Packet flow
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_send_reaches_relay_as_stamped_data_frame() {
    let mut h = harness();
    let mut peer = connect(&mut h).await;
    let alex = player(&h, "Alex");
    alex.set_connected(true);

    h.driver.outbound().send(&alex, notification());

    let bytes = peer.recv().await.unwrap();
    let frame: Frame = JsonCodec.decode(&bytes).unwrap();
    let packet = frame.packet().unwrap();
    assert_eq!(packet.channel(), Channel::PushNotification);
    assert_eq!(packet.client(), Some(alex.id()));
    assert_eq!(h.driver.status().throughput.packets_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_to_offline_client_is_dropped() {
    let mut h = harness();
    let mut peer = connect(&mut h).await;
    let alex = player(&h, "Alex");

    h.driver.outbound().send(&alex, notification());
    settle().await;

    assert!(peer.try_recv().is_none());
    let status = h.driver.status();
    assert_eq!(status.throughput.packets_sent, 0);
    assert_eq!(status.throughput.packets_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_while_idle_is_dropped() {
    let h = harness();
    let alex = player(&h, "Alex");
    alex.set_connected(true);

    h.driver.outbound().send(&alex, notification());

    assert_eq!(h.driver.status().throughput.packets_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_throughput_window_rolls() {
    let mut h = harness();
    let _peer = connect(&mut h).await;
    let alex = player(&h, "Alex");
    alex.set_connected(true);

    for _ in 0..3 {
        h.driver.outbound().send(&alex, notification());
    }
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(h.driver.status().throughput.packets_last_window, 3);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_frames_reach_handlers() {
    let mut h = harness();
    let graph = Arc::new(ProximityGraph::new(
        h.registry.clone(),
        h.driver.outbound(),
        Arc::new(()),
        h.voice.clone(),
    ));
    Arc::new(ClientHandler::new(graph)).install(h.driver.dispatcher());
    let peer = connect(&mut h).await;
    let alex = player(&h, "Alex");

    let frame = Frame::for_channel(&ClientConnectedPayload { client: alex.id() }).unwrap();
    peer.send(JsonCodec.encode(&frame).unwrap());
    settle().await;

    assert!(alex.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_garbage_from_relay_keeps_socket_open() {
    let mut h = harness();
    let peer = connect(&mut h).await;

    peer.send(b"definitely not json".to_vec());
    settle().await;

    assert_eq!(h.driver.state(), ConnectionState::Connected);
}

// =========================================================================
// Disconnecting
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnect_when_connected_logs_out_once_and_stops_voice() {
    let mut h = harness();
    let mut peer = connect(&mut h).await;

    h.driver.disconnect();
    settle().await;

    assert_eq!(h.driver.state(), ConnectionState::Idle(None));
    assert_eq!(h.driver.directory().end_calls(), 1);
    assert_eq!(h.voice.stops.load(Ordering::SeqCst), 1);
    assert!(peer.recv().await.is_none(), "socket should be closed");
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_assigning_logs_out() {
    let h = harness_with(StaticRelayDirectory::stalled());
    h.driver.request_connect();

    h.driver.disconnect();
    settle().await;

    assert!(h.driver.can_connect());
    assert_eq!(h.driver.directory().end_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_when_idle_only_stops_voice() {
    let h = harness();

    h.driver.disconnect();
    settle().await;

    assert_eq!(h.driver.directory().end_calls(), 0);
    assert_eq!(h.voice.stops.load(Ordering::SeqCst), 1);
    assert!(h.transitions.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_after_disconnect_does_not_count() {
    let mut h = harness();
    let _peer = connect(&mut h).await;
    let alex = player(&h, "Alex");
    alex.set_connected(true);
    h.driver.disconnect();

    h.driver.outbound().send(&alex, notification());

    let status = h.driver.status();
    assert_eq!(status.throughput.packets_sent, 0);
    assert_eq!(status.throughput.packets_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_relay_closing_socket_goes_idle_and_logs_out() {
    let mut h = harness();
    let mut peer = connect(&mut h).await;

    peer.close();
    settle().await;

    assert_eq!(h.driver.state(), idle_because("Lost connection to the relay"));
    assert_eq!(h.driver.directory().end_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_disconnect() {
    let mut h = harness();
    let _first = connect(&mut h).await;
    h.driver.disconnect();

    let second = connect(&mut h).await;

    assert_eq!(second.url(), "wss://relay1/");
    assert_eq!(h.driver.directory().start_calls(), 2);
}
