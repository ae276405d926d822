//! Proximity voice for Earshot.
//!
//! The [`ProximityGraph`] keeps symmetric "who hears whom" links between
//! client sessions and keeps each side's view of the other's position
//! fresh. It talks to the outside world through four seams:
//!
//! - [`PacketSink`](earshot_session::PacketSink): subscribe, drop and
//!   location packets for web clients
//! - [`VoiceEventSink`]: enter/leave proximity and mute/unmute events
//! - [`VoiceControl`]: the remote force-mute primitive of the voice
//!   media service
//! - [`NodeForwarder`]: optional; set when this process is a node behind
//!   a proxy and does not own the voice connection itself
//!
//! The graph logic is identical with or without a forwarder.

mod control;
mod events;
mod graph;

pub use control::{NodeForwarder, NodePacket, NoVoiceControl, VoiceControl};
pub use events::{VoiceEvent, VoiceEventSink};
pub use graph::ProximityGraph;
