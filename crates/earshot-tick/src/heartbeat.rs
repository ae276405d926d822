//! The fixed-rate server heartbeat.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a beat wakes up late.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrunPolicy {
    /// Forget the missed beats and schedule the next one from now.
    #[default]
    Skip,
    /// Keep the original cadence; the next beat fires on its old deadline.
    Keep,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Beats per second. 0 disables the heartbeat.
    ///
    /// Default: 20, the usual game-server tick rate.
    pub rate_hz: u32,
    pub policy: OverrunPolicy,
    /// Fraction of the beat budget (0.0–1.0) above which a slow beat is
    /// logged. Default: 0.8.
    pub budget_warn_threshold: f64,
    /// Random delay (0–max µs) added to the first beat. Default: 0.
    pub initial_jitter_us: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            rate_hz: 20,
            policy: OverrunPolicy::Skip,
            budget_warn_threshold: 0.8,
            initial_jitter_us: 0,
        }
    }
}

impl HeartbeatConfig {
    pub const MAX_RATE_HZ: u32 = 100;

    pub fn with_rate(rate_hz: u32) -> Self {
        Self {
            rate_hz,
            ..Default::default()
        }
    }

    /// Length of one beat, or `None` when disabled.
    pub fn period(&self) -> Option<Duration> {
        match self.rate_hz.min(Self::MAX_RATE_HZ) {
            0 => None,
            hz => Some(Duration::from_secs_f64(1.0 / f64::from(hz))),
        }
    }
}

// ---------------------------------------------------------------------------
// Beat
// ---------------------------------------------------------------------------

/// One heartbeat, returned by [`Heartbeat::wait_for_beat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beat {
    /// Beat number, starting at 1.
    pub tick: u64,
    /// Whether this beat woke up noticeably late.
    pub overrun: bool,
    /// Beats skipped to recover from the overrun.
    pub skipped: u64,
}

/// Counters kept across beats.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeartbeatMetrics {
    pub total_beats: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Longest time between `wait_for_beat` returning and
    /// `record_beat_end`.
    pub max_beat_time: Duration,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Fixed-rate beat source.
///
/// Owned by the single task that runs the tick loop; not shared.
pub struct Heartbeat {
    config: HeartbeatConfig,
    period: Option<Duration>,
    next: Option<TokioInstant>,
    tick: u64,
    beat_started: Option<Instant>,
    paused: bool,
    metrics: HeartbeatMetrics,
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig) -> Self {
        let period = config.period();
        let next = period.map(|p| {
            let jitter = match config.initial_jitter_us {
                0 => Duration::ZERO,
                max => Duration::from_micros(rand::rng().random_range(0..max)),
            };
            TokioInstant::now() + p + jitter
        });

        match period {
            Some(p) => debug!(
                rate_hz = config.rate_hz,
                period_ms = p.as_millis() as u64,
                "heartbeat created"
            ),
            None => debug!("heartbeat disabled"),
        }

        Self {
            config,
            period,
            next,
            tick: 0,
            beat_started: None,
            paused: false,
            metrics: HeartbeatMetrics::default(),
        }
    }

    /// Waits for the next beat.
    ///
    /// Pends forever while paused or disabled, which lets the caller keep
    /// it as one branch of a `tokio::select!`.
    pub async fn wait_for_beat(&mut self) -> Beat {
        let (deadline, period) = match (self.next, self.period) {
            (Some(deadline), Some(period)) if !self.paused => (deadline, period),
            _ => std::future::pending().await,
        };

        time::sleep_until(deadline).await;

        let now = TokioInstant::now();
        let late_by = now.saturating_duration_since(deadline);
        let overrun = late_by > period / 10;
        let mut skipped = 0;

        self.next = Some(match self.config.policy {
            OverrunPolicy::Skip => {
                if overrun {
                    skipped = (late_by.as_nanos() / period.as_nanos()) as u64;
                    if skipped > 0 {
                        warn!(tick = self.tick + 1, skipped, "heartbeat overrun, skipping ahead");
                    }
                }
                now + period
            }
            OverrunPolicy::Keep => deadline + period,
        });

        self.tick += 1;
        self.beat_started = Some(Instant::now());
        self.metrics.total_beats += 1;
        self.metrics.total_skipped += skipped;
        if overrun {
            self.metrics.total_overruns += 1;
        }
        trace!(tick = self.tick, overrun, "beat");

        Beat {
            tick: self.tick,
            overrun,
            skipped,
        }
    }

    /// Marks the work for the current beat as done.
    ///
    /// Logs a warning when the work took more than the configured share of
    /// the beat period. A call without a preceding beat does nothing.
    pub fn record_beat_end(&mut self) {
        let Some(started) = self.beat_started.take() else {
            return;
        };
        let elapsed = started.elapsed();
        self.metrics.max_beat_time = self.metrics.max_beat_time.max(elapsed);

        if let Some(period) = self.period {
            let used = elapsed.as_secs_f64() / period.as_secs_f64();
            if used >= self.config.budget_warn_threshold {
                warn!(
                    tick = self.tick,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    "heartbeat work close to or over its budget"
                );
            }
        }
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick, "heartbeat paused");
        }
    }

    /// Resumes beating one full period from now.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next = self.period.map(|p| TokioInstant::now() + p);
            debug!(tick = self.tick, "heartbeat resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_disabled(&self) -> bool {
        self.period.is_none()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn metrics(&self) -> &HeartbeatMetrics {
        &self.metrics
    }
}
