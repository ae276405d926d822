//! Time for Earshot: the server heartbeat and scheduled tasks.
//!
//! Two clocks drive the core:
//!
//! - [`Heartbeat`]: the fixed-rate game-server tick (20 Hz by default)
//!   that polls player locations and flushes queued voice updates.
//! - [`TaskScheduler`]: "run once after a delay" and "run repeating",
//!   used for the relay timeout guards and the throughput window.
//!
//! Both sit on tokio timers, so tests can run them under
//! `#[tokio::test(start_paused = true)]` and skip ahead deterministically.
//!
//! ```ignore
//! let mut heartbeat = Heartbeat::new(HeartbeatConfig::default());
//! loop {
//!     tokio::select! {
//!         _ = shutdown.recv() => break,
//!         beat = heartbeat.wait_for_beat() => {
//!             poll_locations(beat.tick);
//!             heartbeat.record_beat_end();
//!         }
//!     }
//! }
//! ```

mod heartbeat;
mod scheduler;

pub use heartbeat::{Beat, Heartbeat, HeartbeatConfig, HeartbeatMetrics, OverrunPolicy};
pub use scheduler::{TaskHandle, TaskScheduler, TokioScheduler};
