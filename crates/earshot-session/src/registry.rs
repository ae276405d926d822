//! The session registry: every online player, looked up by id.
//!
//! Unlike a single-owner manager, the registry is shared across the tick
//! loop and socket callbacks, so it is backed by a `DashMap` and hands out
//! `Arc<ClientSession>` clones. Callers must tolerate a lookup returning
//! `None`: the player may have left while their operation was in flight.
//!
//! ## Lifecycle
//!
//! ```text
//! register(identity, None)      ──→ fresh token + secret
//! register(identity, Some(snap)) ──→ credentials reused from snapshot
//!                 │
//!                 ▼
//!             [online] ── remove(id) ──→ teardown hooks ──→ state reset
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use earshot_protocol::ClientId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::token::DEFAULT_SECRET_LENGTH;
use crate::{ClientSession, PlayerIdentity, SessionError, SessionSnapshot, TokenFactory, VoiceState};

/// Callback run with a session that is being removed.
pub type TeardownHook = Arc<dyn Fn(&Arc<ClientSession>) + Send + Sync>;

/// Configuration for new sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum queued location updates per session before the oldest is
    /// dropped.
    ///
    /// Default: 64.
    pub location_queue_capacity: usize,

    /// Length of the random session secret embedded in each token.
    ///
    /// Default: 8.
    pub secret_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            location_queue_capacity: 64,
            secret_length: DEFAULT_SECRET_LENGTH,
        }
    }
}

/// All online sessions.
pub struct SessionRegistry {
    sessions: DashMap<ClientId, Arc<ClientSession>>,
    tokens: TokenFactory,
    teardown: RwLock<Vec<TeardownHook>>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(tokens: TokenFactory, config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            tokens: tokens.with_secret_length(config.secret_length),
            teardown: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Registers a joining player.
    ///
    /// With `imported` present (a cross-server transfer) the session's
    /// credentials and flags come from the snapshot; otherwise a new token
    /// is issued.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyRegistered`] if the player is already online
    /// - [`SessionError::ImportMismatch`] if the snapshot is for someone else
    pub fn register(
        &self,
        identity: PlayerIdentity,
        imported: Option<SessionSnapshot>,
    ) -> Result<Arc<ClientSession>, SessionError> {
        let id = identity.id;
        if let Some(snapshot) = &imported {
            if snapshot.identity.id != id {
                return Err(SessionError::ImportMismatch {
                    expected: id,
                    actual: snapshot.identity.id,
                });
            }
        }

        match self.sessions.entry(id) {
            Entry::Occupied(_) => Err(SessionError::AlreadyRegistered(id)),
            Entry::Vacant(slot) => {
                let voice = VoiceState::new(self.config.location_queue_capacity);
                let session = match imported {
                    Some(snapshot) => {
                        tracing::info!(client_id = %id, "session imported");
                        ClientSession::from_snapshot(snapshot, voice)
                    }
                    None => {
                        let issued = self.tokens.issue(&identity);
                        tracing::info!(client_id = %id, name = %identity.name, "session created");
                        ClientSession::new(identity, issued, voice)
                    }
                };
                let session = Arc::new(session);
                slot.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    /// Looks up a session by player id.
    pub fn get(&self, id: &ClientId) -> Option<Arc<ClientSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Like [`get`](Self::get), but absence is an error.
    pub fn require(&self, id: &ClientId) -> Result<Arc<ClientSession>, SessionError> {
        self.get(id).ok_or(SessionError::NotFound(*id))
    }

    /// Detaches a session and runs every teardown hook on it.
    ///
    /// Hooks run after the session left the map and lost its connection
    /// flags, so a hook scanning [`all`](Self::all) no longer sees it and
    /// nothing treats it as voice-ready any more.
    pub fn remove(&self, id: &ClientId) -> Option<Arc<ClientSession>> {
        let (_, session) = self.sessions.remove(id)?;
        session.set_connected(false);
        session.set_connected_to_voice(false);

        // Clone the hook list so a hook may register another hook.
        let hooks: Vec<TeardownHook> = self.teardown.read().clone();
        for hook in &hooks {
            hook(&session);
        }
        session.teardown();

        tracing::info!(client_id = %id, "session removed");
        Some(session)
    }

    /// Registers a callback to run whenever a session is removed.
    pub fn on_teardown(&self, hook: TeardownHook) {
        self.teardown.write().push(hook);
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Every online session, in no particular order.
    pub fn all(&self) -> Vec<Arc<ClientSession>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
