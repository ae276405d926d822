//! Configuration for an Earshot instance.
//!
//! Every section derives `Serialize`/`Deserialize` with `#[serde(default)]`,
//! so a host can load a partial file and get defaults for the rest.

use earshot_relay::{DiscoveryConfig, RelayConfig};
use earshot_session::SessionConfig;
use earshot_tick::HeartbeatConfig;
use serde::{Deserialize, Serialize};

/// Proximity voice timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Poll speaker locations every N heartbeats.
    pub location_poll_every: u32,
    /// Flush pending location queues every N heartbeats.
    pub flush_every: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            location_poll_every: 1,
            flush_every: 1,
        }
    }
}

impl VoiceConfig {
    pub(crate) fn polls_on(&self, tick: u64) -> bool {
        tick % u64::from(self.location_poll_every.max(1)) == 0
    }

    pub(crate) fn flushes_on(&self, tick: u64) -> bool {
        tick % u64::from(self.flush_every.max(1)) == 0
    }
}

/// Everything an [`Earshot`](crate::Earshot) needs besides its key pair.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EarshotConfig {
    pub discovery: DiscoveryConfig,
    pub relay: RelayConfig,
    pub heartbeat: HeartbeatConfig,
    pub sessions: SessionConfig,
    pub voice: VoiceConfig,
}

impl EarshotConfig {
    pub fn discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn sessions(mut self, sessions: SessionConfig) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn voice(mut self, voice: VoiceConfig) -> Self {
        self.voice = voice;
        self
    }
}
