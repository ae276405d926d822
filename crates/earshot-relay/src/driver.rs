//! The relay driver: discovery, socket lifecycle and packet flow.
//!
//! ```text
//! request_connect()
//!   │ Idle → AssigningRelay          guard: 35 s "timed out"
//!   ▼
//! directory.start_session()  ──err──→ Idle("Failed to do the initial handshake. Error: CODE")
//!   │ AssigningRelay → Connecting    guard: 35 s "timed out (socket)"
//!   ▼
//! connector.connect(endpoint) ──err──→ Idle(reason)
//!   │ Connecting → Connected
//!   ▼
//! reader task: socket → Dispatcher
//! writer task: RelayOutbound queue → socket
//! ```
//!
//! Leaving `Connected` for any reason tells the control plane the session
//! ended. Logout is fire-and-forget: its result is only logged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use earshot_tick::{TaskHandle, TaskScheduler};
use earshot_transport::{Connection, Connector};
use earshot_voice::VoiceControl;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::discovery::RelayDirectory;
use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::outbound::{RelayOutbound, ThroughputSnapshot};
use crate::state::{ConnectionState, StateKind, StateListener, StateMachine};

const ASSIGN_TIMEOUT_REASON: &str = "Connecting to the relay timed out";
const SOCKET_TIMEOUT_REASON: &str = "Connecting to the relay timed out (socket)";
const LOST_REASON: &str = "Lost connection to the relay";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing knobs for the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// How long each connection phase may take before giving up.
    pub connect_timeout_secs: u64,
    /// Length of the throughput counting window.
    pub throughput_window_ms: u64,
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_millis(self.throughput_window_ms.max(1))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 35,
            throughput_window_ms: 1000,
        }
    }
}

/// What the driver reports to status commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub state: String,
    pub relay_id: Option<Uuid>,
    #[serde(flatten)]
    pub throughput: ThroughputSnapshot,
}

// ---------------------------------------------------------------------------
// RelayDriver
// ---------------------------------------------------------------------------

/// Owns the process-wide relay connection.
///
/// Cheap to clone; every clone drives the same connection.
pub struct RelayDriver<D: RelayDirectory, C: Connector> {
    inner: Arc<DriverInner<D, C>>,
}

impl<D: RelayDirectory, C: Connector> Clone for RelayDriver<D, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct DriverInner<D: RelayDirectory, C: Connector> {
    directory: D,
    connector: C,
    runtime: Handle,
    scheduler: Arc<dyn TaskScheduler>,
    voice: Arc<dyn VoiceControl>,
    config: RelayConfig,
    state: Arc<StateMachine>,
    outbound: Arc<RelayOutbound>,
    dispatcher: Arc<Dispatcher>,
    live: Mutex<Option<LiveSocket>>,
    /// Bumped by every connect request and every disconnect. An attempt
    /// whose number is no longer current must not touch shared state.
    attempt: AtomicU64,
    relay_id: Mutex<Option<Uuid>>,
    window: Mutex<Option<TaskHandle>>,
}

/// The reader task of the open socket and the attempt that opened it.
struct LiveSocket {
    attempt: u64,
    reader: AbortHandle,
}

impl<D: RelayDirectory, C: Connector> RelayDriver<D, C> {
    /// Builds an idle driver on the current tokio runtime.
    ///
    /// # Errors
    /// Returns `RelayError::NoRuntime` outside a tokio runtime.
    pub fn new(
        directory: D,
        connector: C,
        scheduler: Arc<dyn TaskScheduler>,
        voice: Arc<dyn VoiceControl>,
        config: RelayConfig,
    ) -> Result<Self, RelayError> {
        let runtime = Handle::try_current().map_err(|_| RelayError::NoRuntime)?;
        let state = Arc::new(StateMachine::new());
        let outbound = Arc::new(RelayOutbound::new(Arc::clone(&state)));
        let inner = Arc::new(DriverInner {
            directory,
            connector,
            runtime,
            scheduler,
            voice,
            config,
            state,
            outbound,
            dispatcher: Arc::new(Dispatcher::new()),
            live: Mutex::new(None),
            attempt: AtomicU64::new(0),
            relay_id: Mutex::new(None),
            window: Mutex::new(None),
        });

        let weak: Weak<DriverInner<D, C>> = Arc::downgrade(&inner);
        inner.state.on_change(Arc::new(move |old, _new| {
            if old.is_connected() {
                if let Some(inner) = weak.upgrade() {
                    inner.spawn_logout();
                }
            }
        }));

        let outbound = Arc::clone(&inner.outbound);
        let window = inner.scheduler.run_repeating(
            inner.config.throughput_window(),
            Box::new(move || outbound.throughput().roll()),
        );
        *inner.window.lock() = Some(window);

        Ok(Self { inner })
    }

    /// Starts a connection attempt if the driver is idle.
    ///
    /// Returns the task running the attempt, or `None` when an attempt or
    /// connection already exists. The attempt never reports errors to the
    /// caller: failures land in the state as `Idle(reason)`.
    pub fn request_connect(&self) -> Option<JoinHandle<()>> {
        let inner = &self.inner;
        if !inner
            .state
            .transition(StateKind::Idle, ConnectionState::AssigningRelay)
        {
            debug!(state = %inner.state.current(), "connect requested while not idle");
            return None;
        }
        inner.state.schedule_timeout(
            &*inner.scheduler,
            inner.config.connect_timeout(),
            StateKind::AssigningRelay,
            ASSIGN_TIMEOUT_REASON,
        );
        let attempt = inner.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let driver = Arc::clone(inner);
        Some(inner.runtime.spawn(async move { driver.establish(attempt).await }))
    }

    /// Tears the connection down and stops voice.
    ///
    /// Safe to call in any state. Packets already queued are still
    /// written before the socket closes.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let live = {
            let mut live = inner.live.lock();
            inner.attempt.fetch_add(1, Ordering::SeqCst);
            live.take()
        };
        if let Some(live) = live {
            live.reader.abort();
        }
        inner.outbound.detach();
        let old = inner.state.force_idle(None);
        // Leaving Connected already fired logout through the listener.
        if !old.is_connected() && old.kind() != StateKind::Idle {
            inner.spawn_logout();
        }
        inner.voice.stop();
        info!(from = %old, "relay disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    pub fn can_connect(&self) -> bool {
        self.inner.state.can_connect()
    }

    /// Subscribes to state transitions.
    pub fn on_state_changed(&self, listener: StateListener) {
        self.inner.state.on_change(listener);
    }

    /// The sink producers write to.
    pub fn outbound(&self) -> Arc<RelayOutbound> {
        Arc::clone(&self.inner.outbound)
    }

    /// The inbound routing table.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn directory(&self) -> &D {
        &self.inner.directory
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// The relay of the most recent assignment.
    pub fn relay_id(&self) -> Option<Uuid> {
        *self.inner.relay_id.lock()
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            state: self.inner.state.current().to_string(),
            relay_id: self.relay_id(),
            throughput: self.inner.outbound.throughput().snapshot(),
        }
    }
}

impl<D: RelayDirectory, C: Connector> DriverInner<D, C> {
    fn is_current(&self, attempt: u64) -> bool {
        self.attempt.load(Ordering::SeqCst) == attempt
    }

    /// Moves the attempt along unless it was superseded meanwhile.
    fn advance(&self, attempt: u64, from: StateKind, next: ConnectionState) -> bool {
        self.is_current(attempt) && self.state.transition(from, next)
    }

    async fn establish(self: Arc<Self>, attempt: u64) {
        let assignment = match self.directory.start_session().await {
            Ok(assignment) => assignment,
            Err(e) => {
                warn!(code = e.code(), error = %e, "relay discovery failed");
                let reason = format!("Failed to do the initial handshake. Error: {}", e.code());
                self.advance(
                    attempt,
                    StateKind::AssigningRelay,
                    ConnectionState::Idle(Some(reason)),
                );
                return;
            }
        };

        let url = assignment.endpoint().to_string();
        info!(relay_id = %assignment.relay_id, %url, "relay assigned");
        if !self.advance(attempt, StateKind::AssigningRelay, ConnectionState::Connecting) {
            debug!("relay assignment arrived after the attempt ended");
            return;
        }
        *self.relay_id.lock() = Some(assignment.relay_id);
        self.state.schedule_timeout(
            &*self.scheduler,
            self.config.connect_timeout(),
            StateKind::Connecting,
            SOCKET_TIMEOUT_REASON,
        );

        let connection = match self.connector.connect(&url).await {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                warn!(%url, error = %e, "relay socket failed to open");
                self.advance(
                    attempt,
                    StateKind::Connecting,
                    ConnectionState::Idle(Some(format!("Failed to connect to the relay: {e}"))),
                );
                return;
            }
        };

        if !self.go_live(attempt, &connection) {
            debug!(%url, "relay socket opened after the attempt ended");
            close_quietly(&*connection).await;
            return;
        }
        if !self.advance(attempt, StateKind::Connecting, ConnectionState::Connected) {
            // The socket guard fired while we were dialing.
            debug!(%url, "relay socket opened after the attempt timed out");
            self.drop_socket(attempt);
            return;
        }
        info!(%url, conn = %connection.id(), "relay connected");
    }

    /// Starts the reader and writer for `connection` and records it as the
    /// live socket, unless `attempt` was superseded.
    fn go_live(self: &Arc<Self>, attempt: u64, connection: &Arc<C::Connection>) -> bool {
        let mut live = self.live.lock();
        if !self.is_current(attempt) {
            return false;
        }
        let (queue, pending) = mpsc::unbounded_channel();
        self.outbound.attach(queue);
        self.runtime.spawn(write_loop(Arc::clone(connection), pending));
        let reader = self.runtime.spawn(read_loop(
            Arc::downgrade(self),
            Arc::clone(connection),
            attempt,
        ));
        *live = Some(LiveSocket {
            attempt,
            reader: reader.abort_handle(),
        });
        true
    }

    /// Forgets the socket opened by `attempt` if it is still the live
    /// one. Returns whether it was.
    fn drop_socket(&self, attempt: u64) -> bool {
        let mut live = self.live.lock();
        match live.as_ref() {
            Some(socket) if socket.attempt == attempt => {
                if let Some(socket) = live.take() {
                    socket.reader.abort();
                }
                drop(live);
                self.outbound.detach();
                true
            }
            _ => false,
        }
    }

    fn socket_closed(&self, attempt: u64) {
        if !self.drop_socket(attempt) {
            return;
        }
        if self
            .state
            .transition(StateKind::Connected, ConnectionState::Idle(Some(LOST_REASON.into())))
        {
            warn!("relay connection lost");
        }
    }

    fn spawn_logout(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            match inner.directory.end_session().await {
                Ok(()) => debug!("relay session ended"),
                Err(e) => warn!(code = e.code(), error = %e, "relay logout failed"),
            }
        });
    }
}

impl<D: RelayDirectory, C: Connector> Drop for DriverInner<D, C> {
    fn drop(&mut self) {
        if let Some(window) = self.window.lock().take() {
            window.cancel();
        }
        if let Some(live) = self.live.lock().take() {
            live.reader.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Socket tasks
// ---------------------------------------------------------------------------

/// Writes queued frames until the queue closes, then closes the socket.
async fn write_loop<T: Connection>(
    connection: Arc<T>,
    mut pending: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = pending.recv().await {
        if let Err(e) = connection.send(&bytes).await {
            warn!(conn = %connection.id(), error = %e, "relay write failed");
            break;
        }
    }
    close_quietly(&*connection).await;
}

async fn close_quietly<T: Connection>(connection: &T) {
    if let Err(e) = connection.close().await {
        debug!(conn = %connection.id(), error = %e, "relay close failed");
    }
}

/// Feeds inbound frames to the dispatcher until the socket ends.
async fn read_loop<D: RelayDirectory, C: Connector>(
    driver: Weak<DriverInner<D, C>>,
    connection: Arc<C::Connection>,
    attempt: u64,
) {
    loop {
        match connection.recv().await {
            Ok(Some(bytes)) => {
                let Some(driver) = driver.upgrade() else {
                    return;
                };
                driver.dispatcher.dispatch(&bytes);
            }
            Ok(None) => {
                info!(conn = %connection.id(), "relay closed the socket");
                break;
            }
            Err(e) => {
                warn!(conn = %connection.id(), error = %e, "relay read failed");
                break;
            }
        }
    }
    if let Some(driver) = driver.upgrade() {
        driver.socket_closed(attempt);
    }
}
