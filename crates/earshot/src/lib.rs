//! # Earshot
//!
//! Relay client core for game servers.
//!
//! A game server embeds one [`Earshot`] instance. It asks the control plane
//! for a relay, keeps a push socket open to it, tracks the players whose
//! web clients are attached, and decides who can hear whom through the
//! proximity voice graph.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use earshot::prelude::*;
//!
//! // Inside a tokio runtime:
//! // let earshot = Earshot::builder()
//! //     .keys(ServerKeySet::new(private_key, public_key))
//! //     .build()?;
//! // earshot.request_connect();
//! // earshot.start_heartbeat(Arc::new(MyWorld));
//! ```

mod client;
mod config;
mod error;
mod heartbeat;
mod logging;

pub use client::{Earshot, EarshotBuilder, EarshotStatus};
pub use config::{EarshotConfig, VoiceConfig};
pub use error::EarshotError;
pub use heartbeat::{LocationProvider, VoicePump};
pub use logging::{DEFAULT_FILTER, init_logging};

pub use earshot_protocol as protocol;
pub use earshot_relay as relay;
pub use earshot_session as session;
pub use earshot_tick as tick;
pub use earshot_transport as transport;
pub use earshot_voice as voice;

/// The types most hosts need.
pub mod prelude {
    pub use crate::{
        Earshot, EarshotBuilder, EarshotConfig, EarshotError, LocationProvider, VoiceConfig,
    };
    pub use earshot_protocol::{ClientId, Location, Packet, Vector3};
    pub use earshot_relay::ConnectionState;
    pub use earshot_session::{
        BlockReason, ClientSession, Notification, PlayerIdentity, ServerKeySet, SessionSnapshot,
    };
    pub use earshot_voice::{VoiceControl, VoiceEvent, VoiceEventSink};
}
