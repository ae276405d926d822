//! In-memory connector for testing and embedded relays.
//!
//! Each successful `connect` produces a [`MemoryConnection`] for the game
//! server side and hands the other end, a [`MemoryPeer`], to whoever holds
//! the receiver returned by [`MemoryConnector::new`]. The peer plays the
//! relay: it reads what the driver sent and injects inbound frames.
//!
//! ```
//! use earshot_transport::{Connection, Connector, MemoryConnector};
//!
//! # tokio_test_block_on(async {
//! let (connector, mut peers) = MemoryConnector::new();
//! let conn = connector.connect("wss://relay1/").await.unwrap();
//! let mut peer = peers.recv().await.unwrap();
//!
//! conn.send(b"hello").await.unwrap();
//! assert_eq!(peer.recv().await.unwrap(), b"hello");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::{Connection, ConnectionId, Connector, TransportError};

const MODE_ACCEPT: u8 = 0;
const MODE_REFUSE: u8 = 1;
const MODE_STALL: u8 = 2;

/// Connector whose connections are pairs of in-process channels.
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    mode: AtomicU8,
    dialed: StdMutex<Vec<String>>,
}

impl MemoryConnector {
    /// Creates a connector plus the receiver on which the relay side of
    /// every new connection is delivered.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            mode: AtomicU8::new(MODE_ACCEPT),
            dialed: StdMutex::new(Vec::new()),
        };
        (connector, rx)
    }

    /// Makes subsequent `connect` calls fail immediately.
    pub fn refuse(&self) {
        self.mode.store(MODE_REFUSE, Ordering::SeqCst);
    }

    /// Makes subsequent `connect` calls hang forever, like a relay that
    /// accepts TCP but never finishes the upgrade.
    pub fn stall(&self) {
        self.mode.store(MODE_STALL, Ordering::SeqCst);
    }

    /// Restores normal behavior.
    pub fn accept(&self) {
        self.mode.store(MODE_ACCEPT, Ordering::SeqCst);
    }

    /// Every URL passed to `connect`, in order.
    pub fn dialed(&self) -> Vec<String> {
        match self.dialed.lock() {
            Ok(dialed) => dialed.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, url: &str) {
        match self.dialed.lock() {
            Ok(mut dialed) => dialed.push(url.to_string()),
            Err(poisoned) => poisoned.into_inner().push(url.to_string()),
        }
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self, url: &str) -> Result<Self::Connection, TransportError> {
        self.record(url);
        match self.mode.load(Ordering::SeqCst) {
            MODE_REFUSE => {
                return Err(TransportError::ConnectFailed {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                });
            }
            MODE_STALL => std::future::pending::<()>().await,
            _ => {}
        }

        let (to_peer, from_client) = mpsc::unbounded_channel();
        let (to_client, from_peer) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            to_client: Some(to_client),
            from_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed {
                url: url.to_string(),
                reason: "no relay side listening".into(),
            })?;

        Ok(MemoryConnection {
            id: ConnectionId::next(),
            to_peer: Mutex::new(Some(to_peer)),
            from_peer: Mutex::new(from_peer),
        })
    }
}

/// The game-server end of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    to_peer: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    from_peer: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let guard = self.to_peer.lock().await;
        let sender = guard
            .as_ref()
            .ok_or_else(|| TransportError::ConnectionClosed("closed locally".into()))?;
        sender
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed("peer dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.from_peer.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the sender ends the peer's receive stream.
        self.to_peer.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// The relay end of an in-memory connection.
pub struct MemoryPeer {
    url: String,
    to_client: Option<mpsc::UnboundedSender<Vec<u8>>>,
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryPeer {
    /// The URL the game server dialed to reach this peer.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Waits for the next message the game server sent. Returns `None`
    /// once the game server closed the connection.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.recv().await
    }

    /// Returns a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.try_recv().ok()
    }

    /// Delivers a message to the game server. Returns `false` if the game
    /// server side is gone or the peer was closed.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(data.into()).is_ok(),
            None => false,
        }
    }

    /// Simulates the relay hanging up.
    pub fn close(&mut self) {
        self.to_client.take();
    }
}
