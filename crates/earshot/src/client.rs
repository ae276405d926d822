//! The `Earshot` builder and facade.
//!
//! This is the entry point for a game server. It ties the layers together:
//! discovery → relay driver → sessions → proximity graph → heartbeat.

use std::sync::Arc;

use earshot_protocol::{ClientId, Packet};
use earshot_relay::{
    ClientHandler, ConnectionState, ForwardingSink, HttpRelayDirectory, NoticeCallback,
    RelayDirectory, RelayDriver, RelayStatus, StateListener, SystemHandler,
};
use earshot_session::{
    BlockReason, ClientSession, Notification, PacketSink, PlayerIdentity, ServerKeySet,
    SessionRegistry, SessionSnapshot, TokenFactory,
};
use earshot_tick::{TaskScheduler, TokioScheduler};
use earshot_transport::{Connector, WebSocketConnector};
use earshot_voice::{NoVoiceControl, NodeForwarder, ProximityGraph, VoiceControl, VoiceEventSink};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::EarshotError;
use crate::config::EarshotConfig;
use crate::heartbeat::{LocationProvider, VoicePump};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring an [`Earshot`] instance.
///
/// # Example
///
/// ```rust,ignore
/// use earshot::prelude::*;
///
/// let earshot = Earshot::builder()
///     .keys(ServerKeySet::new(private_key, public_key))
///     .config(config)
///     .build()?;
/// earshot.request_connect();
/// ```
pub struct EarshotBuilder {
    config: EarshotConfig,
    keys: Option<ServerKeySet>,
    voice: Arc<dyn VoiceControl>,
    events: Arc<dyn VoiceEventSink>,
    node: Option<Arc<dyn NodeForwarder>>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    on_notice: Option<NoticeCallback>,
}

impl EarshotBuilder {
    /// Creates a builder with default settings and no voice service.
    pub fn new() -> Self {
        Self {
            config: EarshotConfig::default(),
            keys: None,
            voice: Arc::new(NoVoiceControl),
            events: Arc::new(()),
            node: None,
            scheduler: None,
            on_notice: None,
        }
    }

    pub fn config(mut self, config: EarshotConfig) -> Self {
        self.config = config;
        self
    }

    /// The server's control plane key pair. Required.
    pub fn keys(mut self, keys: ServerKeySet) -> Self {
        self.keys = Some(keys);
        self
    }

    /// The voice media service to mute, unmute and stop.
    pub fn voice_control(mut self, voice: Arc<dyn VoiceControl>) -> Self {
        self.voice = voice;
        self
    }

    /// Where proximity and microphone events go.
    pub fn voice_events(mut self, events: Arc<dyn VoiceEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Runs this process as a node: client packets and speaking overrides
    /// go to the proxy instead of a local relay socket.
    pub fn node(mut self, node: Arc<dyn NodeForwarder>) -> Self {
        self.node = Some(node);
        self
    }

    /// Replaces the tokio-backed scheduler used for timeouts and the
    /// throughput window.
    pub fn scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Hands every relay notice to `callback` as well as the log.
    pub fn on_notice(mut self, callback: NoticeCallback) -> Self {
        self.on_notice = Some(callback);
        self
    }

    /// Builds an instance that talks to the control plane over HTTPS and
    /// to the relay over WebSocket.
    ///
    /// # Errors
    /// - `EarshotError::Config` without [`keys`](Self::keys)
    /// - `EarshotError::Discovery` / `Transport` if a client can't be built
    /// - `EarshotError::Relay` outside a tokio runtime
    pub fn build(self) -> Result<Earshot<HttpRelayDirectory, WebSocketConnector>, EarshotError> {
        let keys = self.require_keys()?;
        let directory = HttpRelayDirectory::new(self.config.discovery.clone(), keys.clone())?;
        let connector = WebSocketConnector::new()?;
        self.build_with(directory, connector)
    }

    /// Builds an instance on a custom directory and connector.
    ///
    /// # Errors
    /// - `EarshotError::Config` without [`keys`](Self::keys)
    /// - `EarshotError::Relay` outside a tokio runtime
    pub fn build_with<D: RelayDirectory, C: Connector>(
        self,
        directory: D,
        connector: C,
    ) -> Result<Earshot<D, C>, EarshotError> {
        let public_key = self.require_keys()?.public_key.clone();
        let scheduler: Arc<dyn TaskScheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::new(
                tokio::runtime::Handle::try_current()
                    .map_err(|_| earshot_relay::RelayError::NoRuntime)?,
            )),
        };

        let driver = RelayDriver::new(
            directory,
            connector,
            scheduler,
            Arc::clone(&self.voice),
            self.config.relay.clone(),
        )?;

        let tokens = TokenFactory::new(public_key)
            .with_secret_length(self.config.sessions.secret_length);
        let sessions = Arc::new(SessionRegistry::new(tokens, self.config.sessions.clone()));

        let sink: Arc<dyn PacketSink> = match &self.node {
            Some(node) => Arc::new(ForwardingSink::new(Arc::clone(node))),
            None => driver.outbound(),
        };
        let mut graph = ProximityGraph::new(
            Arc::clone(&sessions),
            Arc::clone(&sink),
            self.events,
            self.voice,
        );
        if let Some(node) = self.node {
            graph = graph.with_node_forwarder(node);
        }
        let graph = Arc::new(graph);
        graph.attach();

        let system = match self.on_notice {
            Some(callback) => SystemHandler::with_callback(callback),
            None => SystemHandler::new(),
        };
        Arc::new(system).install(driver.dispatcher());
        Arc::new(ClientHandler::new(Arc::clone(&graph))).install(driver.dispatcher());

        info!(
            environment = %self.config.discovery.environment,
            build = self.config.discovery.build,
            "earshot ready"
        );

        Ok(Earshot {
            driver,
            sessions,
            pump: VoicePump::new(Arc::clone(&graph), self.config.voice.clone()),
            graph,
            sink,
            config: self.config,
        })
    }

    fn require_keys(&self) -> Result<&ServerKeySet, EarshotError> {
        self.keys
            .as_ref()
            .ok_or_else(|| EarshotError::Config("a server key pair is required".into()))
    }
}

impl Default for EarshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Earshot
// ---------------------------------------------------------------------------

/// What `status` reports to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarshotStatus {
    #[serde(flatten)]
    pub relay: RelayStatus,
    pub environment: String,
    pub build: u32,
    pub sessions: usize,
}

/// A game server's relay client.
///
/// Owns the relay connection, the online sessions and the proximity voice
/// graph.
pub struct Earshot<D: RelayDirectory = HttpRelayDirectory, C: Connector = WebSocketConnector> {
    driver: RelayDriver<D, C>,
    sessions: Arc<SessionRegistry>,
    graph: Arc<ProximityGraph>,
    pump: VoicePump,
    sink: Arc<dyn PacketSink>,
    config: EarshotConfig,
}

impl Earshot {
    /// Creates a new builder.
    pub fn builder() -> EarshotBuilder {
        EarshotBuilder::new()
    }
}

impl<D: RelayDirectory, C: Connector> Earshot<D, C> {
    // -----------------------------------------------------------------------
    // Relay connection
    // -----------------------------------------------------------------------

    /// Starts connecting to a relay if idle. See
    /// [`RelayDriver::request_connect`].
    pub fn request_connect(&self) -> Option<JoinHandle<()>> {
        self.driver.request_connect()
    }

    /// Tears the relay connection down and stops voice.
    pub fn disconnect(&self) {
        self.driver.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.driver.state()
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    pub fn can_connect(&self) -> bool {
        self.driver.can_connect()
    }

    pub fn on_state_changed(&self, listener: StateListener) {
        self.driver.on_state_changed(listener);
    }

    pub fn driver(&self) -> &RelayDriver<D, C> {
        &self.driver
    }

    /// Sends `packet` to `session`'s web client, or drops it.
    pub fn send(&self, session: &ClientSession, packet: Packet) {
        self.sink.send(session, packet);
    }

    /// Sends a notification. Returns `false` if its title or message is
    /// empty.
    pub fn notify(&self, session: &ClientSession, notification: &Notification) -> bool {
        notification.send(&*self.sink, session)
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Registers a joining player, importing `snapshot` when they arrive
    /// from another server.
    ///
    /// # Errors
    /// Returns `EarshotError::Session` if the player already has a session
    /// or the snapshot belongs to someone else.
    pub fn register_session(
        &self,
        identity: PlayerIdentity,
        snapshot: Option<SessionSnapshot>,
    ) -> Result<Arc<ClientSession>, EarshotError> {
        Ok(self.sessions.register(identity, snapshot)?)
    }

    /// Removes a leaving player and unlinks them from everyone.
    pub fn remove_session(&self, id: &ClientId) -> Option<Arc<ClientSession>> {
        self.sessions.remove(id)
    }

    pub fn session(&self, id: &ClientId) -> Option<Arc<ClientSession>> {
        self.sessions.get(id)
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    // -----------------------------------------------------------------------
    // Proximity voice
    // -----------------------------------------------------------------------

    pub fn graph(&self) -> &Arc<ProximityGraph> {
        &self.graph
    }

    /// Links two players by id. See [`ProximityGraph::link`].
    ///
    /// # Errors
    /// Returns `EarshotError::Session` if either player has no session.
    pub fn link(&self, a: &ClientId, b: &ClientId) -> Result<bool, EarshotError> {
        let (a, b) = (self.sessions.require(a)?, self.sessions.require(b)?);
        Ok(self.graph.link(&a, &b))
    }

    /// Unlinks two players by id.
    ///
    /// # Errors
    /// Returns `EarshotError::Session` if either player has no session.
    pub fn unlink(&self, a: &ClientId, b: &ClientId) -> Result<bool, EarshotError> {
        let (a, b) = (self.sessions.require(a)?, self.sessions.require(b)?);
        Ok(self.graph.unlink(&a, &b))
    }

    /// # Errors
    /// Returns `EarshotError::Session` if the player has no session.
    pub fn set_microphone_enabled(&self, id: &ClientId, enabled: bool) -> Result<(), EarshotError> {
        let session = self.sessions.require(id)?;
        self.graph.set_microphone_enabled(&session, enabled);
        Ok(())
    }

    /// # Errors
    /// Returns `EarshotError::Session` if the player has no session.
    pub fn allow_speaking(&self, id: &ClientId, allow: bool) -> Result<(), EarshotError> {
        let session = self.sessions.require(id)?;
        self.graph.allow_speaking(&session, allow);
        Ok(())
    }

    /// # Errors
    /// Returns `EarshotError::Session` if the player has no session.
    pub fn add_block_reason(
        &self,
        id: &ClientId,
        reason: BlockReason,
    ) -> Result<bool, EarshotError> {
        let session = self.sessions.require(id)?;
        Ok(self.graph.add_block_reason(&session, reason))
    }

    /// # Errors
    /// Returns `EarshotError::Session` if the player has no session.
    pub fn remove_block_reason(
        &self,
        id: &ClientId,
        reason: &BlockReason,
    ) -> Result<bool, EarshotError> {
        let session = self.sessions.require(id)?;
        Ok(self.graph.remove_block_reason(&session, reason))
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Runs the voice work of one heartbeat by hand. Returns the number of
    /// location packets sent.
    pub fn beat(&self, tick: u64, locations: &dyn LocationProvider) -> usize {
        self.pump.beat(tick, locations)
    }

    /// Starts the heartbeat loop on the current runtime.
    pub fn start_heartbeat(&self, locations: Arc<dyn LocationProvider>) -> JoinHandle<()> {
        self.pump
            .clone()
            .spawn(self.config.heartbeat.clone(), locations)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &EarshotConfig {
        &self.config
    }

    pub fn status(&self) -> EarshotStatus {
        EarshotStatus {
            relay: self.driver.status(),
            environment: self.config.discovery.environment.clone(),
            build: self.config.discovery.build,
            sessions: self.sessions.len(),
        }
    }
}
