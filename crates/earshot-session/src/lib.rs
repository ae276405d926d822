//! Client session management for Earshot.
//!
//! This crate owns everything the core knows about one online player:
//!
//! 1. **Identity and credentials**: [`ClientSession`] with its session
//!    secret, stream key and the token minted by [`TokenFactory`]
//! 2. **Voice state**: [`VoiceState`], the per-session sets the proximity
//!    graph reads and writes from both the tick loop and socket callbacks
//! 3. **Registry**: [`SessionRegistry`], lookup by [`ClientId`] plus
//!    teardown hooks that run when a session is removed
//! 4. **Delivery seam**: [`PacketSink`], the trait every packet producer
//!    sends through without knowing whether a socket is open
//!
//! # How it fits in the stack
//!
//! ```text
//! Voice graph / relay driver (above)  ← look sessions up, send packets
//!     ↕
//! Session layer (this crate)          ← who is online, what they hold
//!     ↕
//! Protocol layer (below)              ← ClientId, Packet, Location
//! ```
//!
//! [`ClientId`]: earshot_protocol::ClientId

mod error;
mod keys;
mod notification;
mod registry;
mod session;
mod sink;
mod token;
mod voice;

pub use error::SessionError;
pub use keys::ServerKeySet;
pub use notification::Notification;
pub use registry::{SessionConfig, SessionRegistry, TeardownHook};
pub use session::{ClientSession, PlayerIdentity, SessionSnapshot};
pub use sink::PacketSink;
pub use token::{IssuedToken, SessionToken, TokenFactory};
pub use voice::{BlockReason, VoiceState};
