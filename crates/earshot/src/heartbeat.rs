//! Wiring the server heartbeat to the proximity voice graph.
//!
//! Each beat polls the location of every voice-ready player, fans it out to
//! whoever is listening, then flushes the queued updates as one packet per
//! listener.

use std::sync::Arc;

use earshot_protocol::{ClientId, Location};
use earshot_tick::{Heartbeat, HeartbeatConfig};
use earshot_voice::ProximityGraph;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::config::VoiceConfig;

/// Where player positions come from. Implemented by the host game.
pub trait LocationProvider: Send + Sync + 'static {
    /// Current location of `client`, or `None` if they aren't in a world.
    fn location(&self, client: ClientId) -> Option<Location>;
}

/// Runs the voice side of one heartbeat.
#[derive(Clone)]
pub struct VoicePump {
    graph: Arc<ProximityGraph>,
    config: VoiceConfig,
}

impl VoicePump {
    pub fn new(graph: Arc<ProximityGraph>, config: VoiceConfig) -> Self {
        Self { graph, config }
    }

    /// Does the work of beat number `tick`. Returns the number of location
    /// packets sent.
    pub fn beat(&self, tick: u64, locations: &dyn LocationProvider) -> usize {
        if self.config.polls_on(tick) {
            // Voice-ready sessions without a listener still need a fresh
            // position for the subscribe packet of their first link.
            for session in self.graph.sessions().all() {
                let id = session.id();
                if !session.is_voice_ready() && !self.graph.is_location_source(&id) {
                    continue;
                }
                if let Some(location) = locations.location(id) {
                    self.graph.on_location_tick(&session, location);
                }
            }
        }
        if !self.config.flushes_on(tick) {
            return 0;
        }
        let sent = self.graph.flush_locations();
        if sent > 0 {
            trace!(tick, sent, "location updates flushed");
        }
        sent
    }

    /// Spawns the beat loop. Abort the returned handle to stop it.
    pub(crate) fn spawn(
        self,
        config: HeartbeatConfig,
        locations: Arc<dyn LocationProvider>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut heartbeat = Heartbeat::new(config);
            loop {
                let beat = heartbeat.wait_for_beat().await;
                self.beat(beat.tick, &*locations);
                heartbeat.record_beat_end();
            }
        })
    }
}
