//! Per-session proximity-voice state.
//!
//! Everything in here is touched from two places at once: the heartbeat
//! (location ticks, flushes) and socket callbacks (links, drops, mic
//! toggles). Each set sits behind its own short-lived lock and nothing
//! is held across an await point.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use earshot_protocol::{ClientId, Location, LocationUpdate};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// A policy flag that forces a session silent regardless of its links.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The player is spectating.
    Spectating,
    /// A moderator muted the player.
    Moderated,
    /// The player stands in a region where voice is disabled.
    Region,
    /// Any other host-defined reason.
    Custom(String),
}

/// Voice state owned by one [`ClientSession`](crate::ClientSession).
pub struct VoiceState {
    /// Peers this session currently hears (and, by symmetry, is heard by).
    subscriptions: Mutex<HashSet<ClientId>>,
    block_reasons: Mutex<HashSet<BlockReason>>,
    microphone_enabled: AtomicBool,
    /// Location updates about *other* sessions, waiting to be flushed to
    /// this session's client.
    pending: Mutex<PendingLocations>,
    /// The most recent location reported for this session.
    last_location: Mutex<Option<Location>>,
    /// A location tick that arrived while this session couldn't speak.
    deferred: Mutex<Option<Location>>,
}

impl VoiceState {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscriptions: Mutex::new(HashSet::new()),
            block_reasons: Mutex::new(HashSet::new()),
            microphone_enabled: AtomicBool::new(false),
            pending: Mutex::new(PendingLocations::new(queue_capacity)),
            last_location: Mutex::new(None),
            deferred: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Locks the subscription set.
    ///
    /// The proximity graph holds two of these at once while it adds or
    /// removes a link, always acquiring them in `ClientId` order.
    pub fn lock_subscriptions(&self) -> MutexGuard<'_, HashSet<ClientId>> {
        self.subscriptions.lock()
    }

    pub fn is_subscribed_to(&self, peer: ClientId) -> bool {
        self.subscriptions.lock().contains(&peer)
    }

    /// A copy of the current subscription set.
    pub fn subscriptions(&self) -> Vec<ClientId> {
        self.subscriptions.lock().iter().copied().collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    // -----------------------------------------------------------------------
    // Speaking gates
    // -----------------------------------------------------------------------

    /// Adds a block reason. Returns `false` if it was already present.
    pub fn add_block_reason(&self, reason: BlockReason) -> bool {
        self.block_reasons.lock().insert(reason)
    }

    /// Removes a block reason. Returns `false` if it wasn't present.
    pub fn remove_block_reason(&self, reason: &BlockReason) -> bool {
        self.block_reasons.lock().remove(reason)
    }

    pub fn is_blocked(&self) -> bool {
        !self.block_reasons.lock().is_empty()
    }

    pub fn block_reasons(&self) -> Vec<BlockReason> {
        self.block_reasons.lock().iter().cloned().collect()
    }

    pub fn is_microphone_enabled(&self) -> bool {
        self.microphone_enabled.load(Ordering::Acquire)
    }

    /// Stores the flag and returns the previous value.
    pub fn swap_microphone_enabled(&self, enabled: bool) -> bool {
        self.microphone_enabled.swap(enabled, Ordering::AcqRel)
    }

    // -----------------------------------------------------------------------
    // Locations
    // -----------------------------------------------------------------------

    pub fn last_location(&self) -> Option<Location> {
        self.last_location.lock().clone()
    }

    pub fn set_last_location(&self, location: Location) {
        *self.last_location.lock() = Some(location);
    }

    /// Remembers a location that could not be sent yet. Only the newest
    /// deferred tick is kept.
    pub fn defer_location(&self, location: Location) {
        *self.deferred.lock() = Some(location);
    }

    pub fn take_deferred_location(&self) -> Option<Location> {
        self.deferred.lock().take()
    }

    /// Queues an update about another session for this session's client.
    pub fn enqueue_location(&self, update: LocationUpdate) {
        self.pending.lock().push(update);
    }

    /// Takes every queued update, oldest first.
    pub fn drain_locations(&self) -> Vec<LocationUpdate> {
        self.pending.lock().drain()
    }

    pub fn pending_location_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Forgets what belonged to the web client's connection: the
    /// microphone flag and every queued or deferred location. Block
    /// reasons and the last known location survive a reconnect.
    pub fn reset_client(&self) {
        self.microphone_enabled.store(false, Ordering::Release);
        self.pending.lock().clear();
        self.deferred.lock().take();
    }

    /// Forgets everything. Runs when the session is torn down.
    pub fn reset(&self) {
        self.reset_client();
        self.subscriptions.lock().clear();
        self.block_reasons.lock().clear();
        self.last_location.lock().take();
    }
}

impl Default for VoiceState {
    fn default() -> Self {
        Self::new(crate::SessionConfig::default().location_queue_capacity)
    }
}

// ---------------------------------------------------------------------------
// PendingLocations
// ---------------------------------------------------------------------------

/// A bounded FIFO of location updates, coalesced by source stream key.
///
/// A newer update from a source that is already queued replaces the old
/// one in place. When full, the oldest entry is dropped.
struct PendingLocations {
    updates: VecDeque<LocationUpdate>,
    capacity: usize,
}

impl PendingLocations {
    fn new(capacity: usize) -> Self {
        Self {
            updates: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, update: LocationUpdate) {
        if let Some(existing) = self
            .updates
            .iter_mut()
            .find(|queued| queued.stream_key == update.stream_key)
        {
            *existing = update;
            return;
        }
        if self.updates.len() >= self.capacity {
            if let Some(dropped) = self.updates.pop_front() {
                tracing::debug!(
                    stream_key = %dropped.stream_key,
                    "location queue full, dropping oldest"
                );
            }
        }
        self.updates.push_back(update);
    }

    fn drain(&mut self) -> Vec<LocationUpdate> {
        self.updates.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.updates.len()
    }

    fn clear(&mut self) {
        self.updates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use earshot_protocol::Vector3;

    fn update(stream_key: &str, x: f64) -> LocationUpdate {
        LocationUpdate {
            stream_key: stream_key.to_string(),
            x,
            y: 64.0,
            z: 0.0,
            pitch: 0.0,
            yaw: 0.0,
        }
    }

    #[test]
    fn test_enqueue_location_same_source_coalesces() {
        let voice = VoiceState::new(8);

        voice.enqueue_location(update("alice", 1.0));
        voice.enqueue_location(update("bob", 2.0));
        voice.enqueue_location(update("alice", 3.0));

        let drained = voice.drain_locations();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].stream_key, "alice");
        assert_eq!(drained[0].x, 3.0);
        assert_eq!(drained[1].stream_key, "bob");
    }

    #[test]
    fn test_enqueue_location_full_queue_drops_oldest() {
        let voice = VoiceState::new(2);

        voice.enqueue_location(update("a", 0.0));
        voice.enqueue_location(update("b", 0.0));
        voice.enqueue_location(update("c", 0.0));

        let keys: Vec<_> = voice
            .drain_locations()
            .into_iter()
            .map(|u| u.stream_key)
            .collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_drain_locations_empties_queue() {
        let voice = VoiceState::new(4);
        voice.enqueue_location(update("a", 0.0));

        assert_eq!(voice.drain_locations().len(), 1);
        assert_eq!(voice.pending_location_count(), 0);
        assert!(voice.drain_locations().is_empty());
    }

    #[test]
    fn test_block_reasons_gate() {
        let voice = VoiceState::default();
        assert!(!voice.is_blocked());

        assert!(voice.add_block_reason(BlockReason::Moderated));
        assert!(!voice.add_block_reason(BlockReason::Moderated));
        assert!(voice.is_blocked());

        assert!(voice.remove_block_reason(&BlockReason::Moderated));
        assert!(!voice.is_blocked());
    }

    #[test]
    fn test_deferred_location_keeps_newest() {
        let voice = VoiceState::default();
        let first = Location::new("world", Vector3::new(1.0, 0.0, 0.0), 0.0, 0.0);
        let second = Location::new("world", Vector3::new(2.0, 0.0, 0.0), 0.0, 0.0);

        voice.defer_location(first);
        voice.defer_location(second.clone());

        assert_eq!(voice.take_deferred_location(), Some(second));
        assert_eq!(voice.take_deferred_location(), None);
    }

    #[test]
    fn test_reset_clears_everything() {
        let voice = VoiceState::default();
        voice.lock_subscriptions().insert(ClientId::random());
        voice.add_block_reason(BlockReason::Spectating);
        voice.swap_microphone_enabled(true);
        voice.enqueue_location(update("a", 0.0));

        voice.reset();

        assert_eq!(voice.subscription_count(), 0);
        assert!(!voice.is_blocked());
        assert!(!voice.is_microphone_enabled());
        assert_eq!(voice.pending_location_count(), 0);
    }

    #[test]
    fn test_reset_client_keeps_blocks_and_last_location() {
        let voice = VoiceState::default();
        let here = Location::new("world", Vector3::new(1.0, 0.0, 0.0), 0.0, 0.0);
        voice.add_block_reason(BlockReason::Moderated);
        voice.swap_microphone_enabled(true);
        voice.enqueue_location(update("a", 0.0));
        voice.set_last_location(here.clone());
        voice.defer_location(here.clone());

        voice.reset_client();

        assert!(!voice.is_microphone_enabled());
        assert_eq!(voice.pending_location_count(), 0);
        assert_eq!(voice.take_deferred_location(), None);
        assert!(voice.is_blocked());
        assert_eq!(voice.last_location(), Some(here));
    }
}
