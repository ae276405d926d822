//! The proximity voice graph.
//!
//! A link between A and B is two set memberships, `B ∈ A.subscriptions`
//! and `A ∈ B.subscriptions`, added and removed together. There is no
//! listen-only link.
//!
//! ```text
//!   link(A, B)            unlink_all(A)
//!   A ⇄ B                 every peer P with A ∈ P.subscriptions:
//!   subscribe → A, B        remove edge, drop → P, leave event
//!   enter × 2             A.subscriptions cleared
//! ```
//!
//! Location updates flow from a speaker's tick into each listener's
//! pending queue and reach the web client on the next
//! [`flush_locations`](ProximityGraph::flush_locations).

use std::sync::{Arc, Weak};

use dashmap::DashSet;
use earshot_protocol::{
    ChannelPayload, ClientId, Location, LocationUpdate, Packet, VoiceDropPayload,
    VoiceLocationPayload, VoiceSubscribePayload,
};
use earshot_session::{BlockReason, ClientSession, PacketSink, SessionRegistry};
use tracing::{debug, warn};

use crate::{NodeForwarder, NodePacket, VoiceControl, VoiceEvent, VoiceEventSink};

pub struct ProximityGraph {
    sessions: Arc<SessionRegistry>,
    sink: Arc<dyn PacketSink>,
    events: Arc<dyn VoiceEventSink>,
    control: Arc<dyn VoiceControl>,
    node: Option<Arc<dyn NodeForwarder>>,
    /// Sessions with at least one subscriber; only these need location
    /// polling.
    location_sources: DashSet<ClientId>,
}

impl ProximityGraph {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        sink: Arc<dyn PacketSink>,
        events: Arc<dyn VoiceEventSink>,
        control: Arc<dyn VoiceControl>,
    ) -> Self {
        Self {
            sessions,
            sink,
            events,
            control,
            node: None,
            location_sources: DashSet::new(),
        }
    }

    /// Routes [`allow_speaking`](Self::allow_speaking) through the proxy.
    pub fn with_node_forwarder(mut self, node: Arc<dyn NodeForwarder>) -> Self {
        self.node = Some(node);
        self
    }

    /// Hooks the graph into session removal so a leaving player is
    /// unlinked from everyone.
    pub fn attach(self: &Arc<Self>) {
        let graph: Weak<Self> = Arc::downgrade(self);
        self.sessions.on_teardown(Arc::new(move |session| {
            if let Some(graph) = graph.upgrade() {
                graph.unlink_all(session);
            }
        }));
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Links two sessions so each hears the other.
    ///
    /// Returns `false` and changes nothing if the sessions are the same,
    /// either side isn't voice-ready, or either side already subscribes
    /// to the other.
    pub fn link(&self, a: &ClientSession, b: &ClientSession) -> bool {
        if a.id() == b.id() {
            return false;
        }
        if !a.is_voice_ready() || !b.is_voice_ready() {
            return false;
        }

        {
            // Lock in id order so two concurrent links can't deadlock.
            let (first, second) = if a.id() < b.id() { (a, b) } else { (b, a) };
            let mut first_subs = first.voice().lock_subscriptions();
            let mut second_subs = second.voice().lock_subscriptions();
            if first_subs.contains(&second.id()) || second_subs.contains(&first.id()) {
                return false;
            }
            // Removed sessions never get new edges. Removal leaves the map
            // before teardown scans the peers under these same locks.
            if !self.sessions.contains(&first.id()) || !self.sessions.contains(&second.id()) {
                return false;
            }
            first_subs.insert(second.id());
            second_subs.insert(first.id());
        }

        self.send_subscribe(a, b);
        self.send_subscribe(b, a);

        self.events.emit(VoiceEvent::EnterProximity {
            listener: a.id(),
            speaker: b.id(),
        });
        self.events.emit(VoiceEvent::EnterProximity {
            listener: b.id(),
            speaker: a.id(),
        });

        self.update_location_source(a);
        self.update_location_source(b);
        debug!(a = %a.id(), b = %b.id(), "proximity link added");
        true
    }

    /// Removes the link between two sessions, if there is one.
    pub fn unlink(&self, a: &ClientSession, b: &ClientSession) -> bool {
        if a.id() == b.id() {
            return false;
        }
        let removed = {
            let (first, second) = if a.id() < b.id() { (a, b) } else { (b, a) };
            let mut first_subs = first.voice().lock_subscriptions();
            let mut second_subs = second.voice().lock_subscriptions();
            let one = first_subs.remove(&second.id());
            let other = second_subs.remove(&first.id());
            one || other
        };
        if !removed {
            return false;
        }

        self.send_drop(a, b);
        self.send_drop(b, a);
        self.update_location_source(a);
        self.update_location_source(b);
        debug!(a = %a.id(), b = %b.id(), "proximity link removed");
        true
    }

    /// Drops every link to `session`, driven from the departing side.
    ///
    /// Scans all sessions rather than trusting `session`'s own set, which
    /// may already have been discarded.
    pub fn unlink_all(&self, session: &ClientSession) {
        let id = session.id();
        for peer in self.sessions.all() {
            if peer.id() == id {
                continue;
            }
            let removed = peer.voice().lock_subscriptions().remove(&id);
            if removed {
                self.update_location_source(&peer);
                self.send_drop(&peer, session);
            }
        }
        session.voice().lock_subscriptions().clear();
        self.location_sources.remove(&id);
    }

    // -----------------------------------------------------------------------
    // Locations
    // -----------------------------------------------------------------------

    /// Handles one location poll for `session`.
    ///
    /// When the session may speak, the location is queued for every
    /// subscriber. Otherwise it is cached and sent once speaking is
    /// possible again.
    pub fn on_location_tick(&self, session: &ClientSession, location: Location) {
        session.voice().set_last_location(location.clone());
        if self.can_speak(session) {
            self.force_location_update(session, &location);
        } else {
            session.voice().defer_location(location);
        }
    }

    /// Queues `location` for every peer hearing `session`, skipping the
    /// speaking gates. Returns the peers that got an update.
    pub fn force_location_update(
        &self,
        session: &ClientSession,
        location: &Location,
    ) -> Vec<Arc<ClientSession>> {
        let mut touched = Vec::new();
        for peer_id in session.voice().subscriptions() {
            let Some(peer) = self.sessions.get(&peer_id) else {
                continue;
            };
            let update = location_update(
                session.stream_key(),
                location,
                peer.voice().last_location().as_ref(),
            );
            peer.voice().enqueue_location(update);
            touched.push(peer);
        }
        touched
    }

    /// Sends every pending location queue to its client, one packet per
    /// session. Returns the number of packets sent.
    pub fn flush_locations(&self) -> usize {
        let mut sent = 0;
        for session in self.sessions.all() {
            if self.flush_session(&session) {
                sent += 1;
            }
        }
        sent
    }

    /// Ids of sessions that currently have a subscriber.
    pub fn location_sources(&self) -> Vec<ClientId> {
        self.location_sources.iter().map(|id| *id).collect()
    }

    pub fn is_location_source(&self, id: &ClientId) -> bool {
        self.location_sources.contains(id)
    }

    // -----------------------------------------------------------------------
    // Speaking
    // -----------------------------------------------------------------------

    /// Records the client's microphone switch.
    ///
    /// Switching on pushes the cached location straight to the peers.
    /// Mute/unmute events only fire for voice-ready sessions, but the flag
    /// is stored either way.
    pub fn set_microphone_enabled(&self, session: &ClientSession, enabled: bool) {
        let was_enabled = session.voice().is_microphone_enabled();
        if !was_enabled && enabled {
            self.flush_deferred(session);
        }
        session.voice().swap_microphone_enabled(enabled);

        if !session.is_voice_ready() {
            return;
        }
        let client = session.id();
        self.events.emit(if enabled {
            VoiceEvent::MicrophoneUnmuted { client }
        } else {
            VoiceEvent::MicrophoneMuted { client }
        });
    }

    /// Hard override of the client's ability to speak.
    ///
    /// On a node the request is forwarded to the proxy, which owns the
    /// voice connection.
    pub fn allow_speaking(&self, session: &ClientSession, allow: bool) {
        let client = session.id();
        if let Some(node) = &self.node {
            node.forward(NodePacket::ForceMute { client, allow });
            return;
        }
        if allow {
            self.control.force_unmute(client);
        } else {
            self.control.force_mute(client);
        }
    }

    /// Adds a block reason. Returns `false` if it was already set.
    pub fn add_block_reason(&self, session: &ClientSession, reason: BlockReason) -> bool {
        session.voice().add_block_reason(reason)
    }

    /// Removes a block reason. Lifting the last one pushes the cached
    /// location if the microphone is on.
    pub fn remove_block_reason(&self, session: &ClientSession, reason: &BlockReason) -> bool {
        let removed = session.voice().remove_block_reason(reason);
        if removed && session.voice().is_microphone_enabled() {
            self.flush_deferred(session);
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn can_speak(&self, session: &ClientSession) -> bool {
        session.is_voice_ready()
            && session.voice().is_microphone_enabled()
            && !session.voice().is_blocked()
    }

    /// Sends the cached location now, bypassing the next heartbeat.
    fn flush_deferred(&self, session: &ClientSession) {
        if session.voice().is_blocked() {
            return;
        }
        let Some(location) = session.voice().take_deferred_location() else {
            return;
        };
        for peer in self.force_location_update(session, &location) {
            self.flush_session(&peer);
        }
    }

    fn flush_session(&self, session: &ClientSession) -> bool {
        let updates = session.voice().drain_locations();
        if updates.is_empty() {
            return false;
        }
        self.send(session, &VoiceLocationPayload { updates })
    }

    fn update_location_source(&self, session: &ClientSession) {
        if session.voice().subscription_count() > 0 {
            self.location_sources.insert(session.id());
        } else {
            self.location_sources.remove(&session.id());
        }
    }

    /// Tells `listener` to start hearing `speaker`.
    fn send_subscribe(&self, listener: &ClientSession, speaker: &ClientSession) {
        let location = match speaker.voice().last_location() {
            Some(at) => location_update(
                speaker.stream_key(),
                &at,
                listener.voice().last_location().as_ref(),
            ),
            None => LocationUpdate {
                stream_key: speaker.stream_key().to_string(),
                x: 0.0,
                y: 0.0,
                z: 0.0,
                pitch: 0.0,
                yaw: 0.0,
            },
        };
        let payload = VoiceSubscribePayload {
            target_stream_key: speaker.stream_key().to_string(),
            target_player_name: speaker.name().to_string(),
            target_uuid: speaker.id(),
            location,
        };
        self.send(listener, &payload);
    }

    /// Tells `listener` to stop hearing `speaker`.
    fn send_drop(&self, listener: &ClientSession, speaker: &ClientSession) {
        self.send(
            listener,
            &VoiceDropPayload {
                stream_key: speaker.stream_key().to_string(),
            },
        );
        self.events.emit(VoiceEvent::LeaveProximity {
            listener: listener.id(),
            speaker: speaker.id(),
        });
    }

    fn send<P: ChannelPayload>(&self, session: &ClientSession, payload: &P) -> bool {
        match Packet::new(payload) {
            Ok(packet) => {
                self.sink.send(session, packet);
                true
            }
            Err(e) => {
                warn!(
                    client_id = %session.id(),
                    channel = %P::CHANNEL,
                    error = %e,
                    "failed to build voice packet"
                );
                false
            }
        }
    }
}

/// Where `speaker_at` is as seen from `listener_at`.
fn location_update(
    stream_key: &str,
    speaker_at: &Location,
    listener_at: Option<&Location>,
) -> LocationUpdate {
    let offset = match listener_at {
        Some(origin) => speaker_at.relative_to(origin),
        None => speaker_at.position,
    };
    LocationUpdate {
        stream_key: stream_key.to_string(),
        x: offset.x,
        y: offset.y,
        z: offset.z,
        pitch: speaker_at.pitch,
        yaw: speaker_at.yaw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use earshot_protocol::Vector3;

    #[test]
    fn test_location_update_relative_to_listener() {
        let speaker = Location::new("world", Vector3::new(10.0, 64.0, 10.0), 5.0, 90.0);
        let listener = Location::new("world", Vector3::new(4.0, 64.0, 2.0), 0.0, 0.0);

        let update = location_update("key", &speaker, Some(&listener));

        assert_eq!((update.x, update.y, update.z), (6.0, 0.0, 8.0));
        assert_eq!(update.yaw, 90.0);
        assert_eq!(update.stream_key, "key");
    }

    #[test]
    fn test_location_update_without_listener_is_absolute() {
        let speaker = Location::new("world", Vector3::new(10.0, 64.0, 10.0), 0.0, 0.0);

        let update = location_update("key", &speaker, None);

        assert_eq!((update.x, update.y, update.z), (10.0, 64.0, 10.0));
    }
}
