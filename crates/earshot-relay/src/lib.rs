//! The game server's link to its relay.
//!
//! This crate owns the single outbound relay connection of a game server
//! process:
//!
//! - **Discovery** ([`RelayDirectory`], [`HttpRelayDirectory`]): asks the
//!   control plane which relay to use and tells it when we leave.
//! - **State** ([`StateMachine`], [`ConnectionState`]): the four-state
//!   lifecycle with its timeout guards.
//! - **Driver** ([`RelayDriver`]): runs discovery, opens the socket and
//!   pumps frames in both directions.
//! - **Outbound** ([`RelayOutbound`]): the [`PacketSink`] producers write
//!   to. It drops packets while anything is offline.
//! - **Inbound** ([`Dispatcher`], [`ClientHandler`], [`SystemHandler`]):
//!   routes relay frames by channel.
//!
//! # Architecture
//!
//! ```text
//!          ┌──────────────── RelayDriver ────────────────┐
//! tick ──→ │ request_connect / disconnect   StateMachine │
//!          │                                             │
//! graph ─→ │ RelayOutbound ─→ writer task ─→ socket      │
//!          │ Dispatcher    ←─ reader task ←─ socket      │ ──→ handlers
//!          └─────────────────────────────────────────────┘
//! ```
//!
//! [`PacketSink`]: earshot_session::PacketSink

mod discovery;
mod dispatch;
mod driver;
mod error;
mod forward;
mod handlers;
mod outbound;
mod state;

pub use discovery::{
    ApiResponse, DiscoveryConfig, HttpRelayDirectory, LoginResponse, RelayAssignment,
    RelayDirectory, RestError, StaticRelayDirectory,
};
pub use dispatch::{Dispatcher, InboundHandler};
pub use driver::{RelayConfig, RelayDriver, RelayStatus};
pub use error::{BAD_HANDSHAKE, DiscoveryError, RelayError};
pub use forward::ForwardingSink;
pub use handlers::{ClientHandler, NoticeCallback, SystemHandler};
pub use outbound::{RelayOutbound, Throughput, ThroughputSnapshot};
pub use state::{ConnectionState, StateKind, StateListener, StateMachine};
