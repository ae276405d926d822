//! Session types: the server's record of one online player.
//!
//! A session tracks:
//! - WHO the player is ([`PlayerIdentity`])
//! - HOW the relay and web client recognise them (session secret, token,
//!   stream key)
//! - WHAT is live for them (relay and voice connection flags)
//! - their proximity-voice state ([`VoiceState`])

use std::sync::atomic::{AtomicBool, Ordering};

use earshot_protocol::ClientId;
use serde::{Deserialize, Serialize};

use crate::token::random_alphanumeric;
use crate::{IssuedToken, VoiceState};

/// Length of the per-session stream key peers use to address voice.
const STREAM_KEY_LENGTH: usize = 16;

// ---------------------------------------------------------------------------
// PlayerIdentity
// ---------------------------------------------------------------------------

/// Stable player id plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub id: ClientId,
    pub name: String,
}

impl PlayerIdentity {
    pub fn new(id: ClientId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// The portable part of a session, handed to another server process when
/// a player transfers.
///
/// Importing a snapshot reuses its credentials instead of minting a new
/// token, so a companion web client that already holds the token keeps
/// working across the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub identity: PlayerIdentity,
    pub session_key: String,
    pub token: String,
    pub stream_key: String,
    pub connected_to_relay: bool,
    pub connected_to_voice: bool,
    #[serde(default)]
    pub microphone_enabled: bool,
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// One online player.
///
/// Sessions are shared as `Arc<ClientSession>`: the registry, the voice
/// graph and in-flight socket callbacks may all hold one. Credentials are
/// fixed at construction; the connection flags and voice state use
/// interior mutability.
pub struct ClientSession {
    identity: PlayerIdentity,
    session_key: String,
    token: String,
    stream_key: String,
    connected_to_relay: AtomicBool,
    connected_to_voice: AtomicBool,
    voice: VoiceState,
}

impl ClientSession {
    /// Creates a session with freshly issued credentials.
    pub(crate) fn new(identity: PlayerIdentity, issued: IssuedToken, voice: VoiceState) -> Self {
        Self {
            identity,
            session_key: issued.session_key,
            token: issued.token,
            stream_key: random_alphanumeric(STREAM_KEY_LENGTH),
            connected_to_relay: AtomicBool::new(false),
            connected_to_voice: AtomicBool::new(false),
            voice,
        }
    }

    /// Rebuilds a session from a snapshot taken on another server.
    pub(crate) fn from_snapshot(snapshot: SessionSnapshot, voice: VoiceState) -> Self {
        voice.swap_microphone_enabled(snapshot.microphone_enabled);
        Self {
            identity: snapshot.identity,
            session_key: snapshot.session_key,
            token: snapshot.token,
            stream_key: snapshot.stream_key,
            connected_to_relay: AtomicBool::new(snapshot.connected_to_relay),
            connected_to_voice: AtomicBool::new(snapshot.connected_to_voice),
            voice,
        }
    }

    pub fn id(&self) -> ClientId {
        self.identity.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn identity(&self) -> &PlayerIdentity {
        &self.identity
    }

    /// The short random secret scoping this session's relay routing.
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Whether the player's web client is attached through the relay.
    pub fn is_connected(&self) -> bool {
        self.connected_to_relay.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected_to_relay.store(connected, Ordering::Release);
    }

    pub fn is_connected_to_voice(&self) -> bool {
        self.connected_to_voice.load(Ordering::Acquire)
    }

    pub fn set_connected_to_voice(&self, connected: bool) {
        self.connected_to_voice.store(connected, Ordering::Release);
    }

    /// Ready for proximity voice: both the relay and the voice media
    /// connection are up.
    pub fn is_voice_ready(&self) -> bool {
        self.is_connected() && self.is_connected_to_voice()
    }

    pub fn voice(&self) -> &VoiceState {
        &self.voice
    }

    /// Exports the state another server needs to import this session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            identity: self.identity.clone(),
            session_key: self.session_key.clone(),
            token: self.token.clone(),
            stream_key: self.stream_key.clone(),
            connected_to_relay: self.is_connected(),
            connected_to_voice: self.is_connected_to_voice(),
            microphone_enabled: self.voice.is_microphone_enabled(),
        }
    }

    /// Drops all live state. Called by the registry on removal.
    pub(crate) fn teardown(&self) {
        self.set_connected(false);
        self.set_connected_to_voice(false);
        self.voice.reset();
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.identity.id)
            .field("name", &self.identity.name)
            .field("stream_key", &self.stream_key)
            .field("connected_to_relay", &self.is_connected())
            .field("connected_to_voice", &self.is_connected_to_voice())
            .finish_non_exhaustive()
    }
}
