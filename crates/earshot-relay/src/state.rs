//! The relay connection state machine.
//!
//! ```text
//!        ┌────────────── timeout / failure ──────────────┐
//!        ▼                                               │
//!  ┌──────────┐ connect ┌────────────────┐ assigned ┌────────────┐ open ┌───────────┐
//!  │   Idle   │ ──────→ │ AssigningRelay │ ───────→ │ Connecting │ ───→ │ Connected │
//!  └──────────┘         └────────────────┘          └────────────┘      └───────────┘
//!        ▲                     │ timeout / failure                            │
//!        └─────────────────────┴──────────── disconnect / drop ───────────────┘
//! ```
//!
//! There is one machine per process. Every transition goes through a
//! mutex, so a tick-driven disconnect and a timer-driven timeout can't
//! interleave. Listeners run after the lock is released.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use earshot_tick::{TaskHandle, TaskScheduler};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Where the relay connection stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No relay. Carries the reason when the last attempt failed.
    Idle(Option<String>),
    /// Waiting for the control plane to assign a relay.
    AssigningRelay,
    /// Opening the socket to the assigned relay.
    Connecting,
    /// Live; packets flow.
    Connected,
}

/// [`ConnectionState`] without its data, for comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Idle,
    AssigningRelay,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn kind(&self) -> StateKind {
        match self {
            ConnectionState::Idle(_) => StateKind::Idle,
            ConnectionState::AssigningRelay => StateKind::AssigningRelay,
            ConnectionState::Connecting => StateKind::Connecting,
            ConnectionState::Connected => StateKind::Connected,
        }
    }

    /// A new connection attempt may start only from `Idle`.
    pub fn can_connect(&self) -> bool {
        self.kind() == StateKind::Idle
    }

    pub fn is_connected(&self) -> bool {
        self.kind() == StateKind::Connected
    }

    /// Why the machine is idle, if it said.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ConnectionState::Idle(reason) => reason.as_deref(),
            _ => None,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle(None)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle(None) => f.write_str("Idle"),
            ConnectionState::Idle(Some(reason)) => write!(f, "Idle ({reason})"),
            ConnectionState::AssigningRelay => f.write_str("AssigningRelay"),
            ConnectionState::Connecting => f.write_str("Connecting"),
            ConnectionState::Connected => f.write_str("Connected"),
        }
    }
}

impl StateKind {
    /// Whether the machine may move from `self` to `to`.
    fn allows(self, to: StateKind) -> bool {
        use StateKind::*;
        matches!(
            (self, to),
            (Idle, AssigningRelay)
                | (AssigningRelay, Connecting)
                | (AssigningRelay, Idle)
                | (Connecting, Connected)
                | (Connecting, Idle)
                | (Connected, Idle)
        )
    }
}

// ---------------------------------------------------------------------------
// StateMachine
// ---------------------------------------------------------------------------

/// Called with `(old, new)` after every transition.
pub type StateListener = Arc<dyn Fn(&ConnectionState, &ConnectionState) + Send + Sync>;

/// The process-wide connection state and its listeners.
#[derive(Default)]
pub struct StateMachine {
    state: Mutex<ConnectionState>,
    listeners: RwLock<Vec<StateListener>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ConnectionState {
        self.state.lock().clone()
    }

    pub fn can_connect(&self) -> bool {
        self.state.lock().can_connect()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().is_connected()
    }

    /// Subscribes to every future transition.
    ///
    /// Listeners run on the transitioning thread after the state lock is
    /// released, so a listener may itself drive the machine. Each `(old,
    /// new)` pair is exact, but two transitions racing on different
    /// threads can reach a listener in either order. Use
    /// [`current`](Self::current) when the latest state matters.
    pub fn on_change(&self, listener: StateListener) {
        self.listeners.write().push(listener);
    }

    /// Moves to `next` if the current state is of kind `from`.
    ///
    /// Returns `false` and changes nothing otherwise, including when the
    /// move itself isn't a legal edge of the machine.
    pub fn transition(&self, from: StateKind, next: ConnectionState) -> bool {
        if !from.allows(next.kind()) {
            warn!(from = ?from, to = %next, "illegal relay state transition refused");
            return false;
        }
        let old = {
            let mut state = self.state.lock();
            if state.kind() != from {
                return false;
            }
            std::mem::replace(&mut *state, next.clone())
        };
        self.notify(&old, &next);
        true
    }

    /// Moves to `Idle` from wherever the machine is. Returns the state it
    /// left.
    pub fn force_idle(&self, reason: Option<String>) -> ConnectionState {
        let next = ConnectionState::Idle(reason);
        let old = std::mem::replace(&mut *self.state.lock(), next.clone());
        if old != next {
            self.notify(&old, &next);
        }
        old
    }

    /// Schedules a guard that drops back to `Idle(reason)` if the machine
    /// is still in `expected` after `delay`.
    ///
    /// A guard that fires after the machine moved on does nothing, so
    /// guards are never cancelled.
    pub fn schedule_timeout(
        self: &Arc<Self>,
        scheduler: &dyn TaskScheduler,
        delay: Duration,
        expected: StateKind,
        reason: impl Into<String>,
    ) -> TaskHandle {
        let machine = Arc::clone(self);
        let reason = reason.into();
        scheduler.run_later(
            delay,
            Box::new(move || {
                if machine.transition(expected, ConnectionState::Idle(Some(reason.clone()))) {
                    warn!(state = ?expected, %reason, "relay connection attempt timed out");
                } else {
                    debug!(state = ?expected, "stale relay timeout ignored");
                }
            }),
        )
    }

    fn notify(&self, old: &ConnectionState, new: &ConnectionState) {
        info!(from = %old, to = %new, "relay state changed");
        let listeners: Vec<StateListener> = self.listeners.read().clone();
        for listener in &listeners {
            listener(old, new);
        }
    }
}

#[cfg(test)]
mod tests {
    use earshot_tick::TokioScheduler;

    use super::*;

    fn recorded(machine: &StateMachine) -> Arc<Mutex<Vec<(ConnectionState, ConnectionState)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        machine.on_change(Arc::new(move |old, new| {
            sink.lock().push((old.clone(), new.clone()));
        }));
        log
    }

    // =====================================================================
    // Exclusivity
    // =====================================================================

    #[test]
    fn test_flags_match_exactly_one_state() {
        let cases = [
            (ConnectionState::Idle(None), true, false),
            (ConnectionState::Idle(Some("x".into())), true, false),
            (ConnectionState::AssigningRelay, false, false),
            (ConnectionState::Connecting, false, false),
            (ConnectionState::Connected, false, true),
        ];
        for (state, can_connect, connected) in cases {
            assert_eq!(state.can_connect(), can_connect, "{state}");
            assert_eq!(state.is_connected(), connected, "{state}");
        }
    }

    // =====================================================================
    // transition()
    // =====================================================================

    #[test]
    fn test_transition_from_matching_kind_notifies() {
        let machine = StateMachine::new();
        let log = recorded(&machine);

        assert!(machine.transition(StateKind::Idle, ConnectionState::AssigningRelay));

        assert_eq!(machine.current(), ConnectionState::AssigningRelay);
        assert_eq!(
            *log.lock(),
            vec![(ConnectionState::Idle(None), ConnectionState::AssigningRelay)]
        );
    }

    #[test]
    fn test_listener_driving_machine_sees_every_pair() {
        let machine = Arc::new(StateMachine::new());
        let log = recorded(&machine);
        let weak = Arc::downgrade(&machine);
        machine.on_change(Arc::new(move |_, new| {
            if *new == ConnectionState::AssigningRelay {
                if let Some(machine) = weak.upgrade() {
                    machine.force_idle(Some("abandoned".into()));
                }
            }
        }));

        assert!(machine.transition(StateKind::Idle, ConnectionState::AssigningRelay));

        let idle = ConnectionState::Idle(Some("abandoned".into()));
        assert_eq!(machine.current(), idle);
        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert!(log.contains(&(ConnectionState::Idle(None), ConnectionState::AssigningRelay)));
        assert!(log.contains(&(ConnectionState::AssigningRelay, idle.clone())));
    }

    #[test]
    fn test_transition_from_wrong_kind_is_refused() {
        let machine = StateMachine::new();
        let log = recorded(&machine);

        assert!(!machine.transition(StateKind::Connecting, ConnectionState::Connected));

        assert!(machine.can_connect());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_transition_illegal_edge_is_refused() {
        let machine = StateMachine::new();

        // Idle can't jump straight to Connected.
        assert!(!machine.transition(StateKind::Idle, ConnectionState::Connected));
        assert!(!machine.is_connected());
    }

    #[test]
    fn test_second_connect_attempt_loses() {
        let machine = StateMachine::new();

        let first = machine.transition(StateKind::Idle, ConnectionState::AssigningRelay);
        let second = machine.transition(StateKind::Idle, ConnectionState::AssigningRelay);

        assert!(first);
        assert!(!second);
    }

    #[test]
    fn test_force_idle_returns_old_state() {
        let machine = StateMachine::new();
        machine.transition(StateKind::Idle, ConnectionState::AssigningRelay);
        machine.transition(StateKind::AssigningRelay, ConnectionState::Connecting);
        machine.transition(StateKind::Connecting, ConnectionState::Connected);

        let old = machine.force_idle(None);

        assert_eq!(old, ConnectionState::Connected);
        assert!(machine.can_connect());
    }

    #[test]
    fn test_force_idle_when_already_idle_does_not_notify() {
        let machine = StateMachine::new();
        let log = recorded(&machine);

        machine.force_idle(None);

        assert!(log.lock().is_empty());
    }

    // =====================================================================
    // schedule_timeout()
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_when_still_in_expected_state() {
        let machine = Arc::new(StateMachine::new());
        let scheduler = TokioScheduler::current();
        machine.transition(StateKind::Idle, ConnectionState::AssigningRelay);

        machine.schedule_timeout(
            &scheduler,
            Duration::from_secs(35),
            StateKind::AssigningRelay,
            "timed out",
        );
        tokio::time::sleep(Duration::from_secs(36)).await;

        assert_eq!(machine.current(), ConnectionState::Idle(Some("timed out".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_state_moved_on_is_noop() {
        let machine = Arc::new(StateMachine::new());
        let scheduler = TokioScheduler::current();
        machine.transition(StateKind::Idle, ConnectionState::AssigningRelay);
        machine.schedule_timeout(
            &scheduler,
            Duration::from_secs(35),
            StateKind::AssigningRelay,
            "timed out",
        );

        machine.transition(StateKind::AssigningRelay, ConnectionState::Connecting);
        machine.transition(StateKind::Connecting, ConnectionState::Connected);
        let log = recorded(&machine);
        tokio::time::sleep(Duration::from_secs(40)).await;

        assert_eq!(machine.current(), ConnectionState::Connected);
        assert!(log.lock().is_empty(), "stale guard must not transition");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_from_older_attempt_ignores_new_attempt_of_other_kind() {
        // Attempt 1 is abandoned while assigning; attempt 2 is connecting
        // when attempt 1's guard fires. Only the kind is checked, so the
        // old AssigningRelay guard leaves the new Connecting state alone.
        let machine = Arc::new(StateMachine::new());
        let scheduler = TokioScheduler::current();
        machine.transition(StateKind::Idle, ConnectionState::AssigningRelay);
        machine.schedule_timeout(
            &scheduler,
            Duration::from_secs(35),
            StateKind::AssigningRelay,
            "old",
        );
        machine.force_idle(None);

        machine.transition(StateKind::Idle, ConnectionState::AssigningRelay);
        machine.transition(StateKind::AssigningRelay, ConnectionState::Connecting);
        tokio::time::sleep(Duration::from_secs(36)).await;

        assert_eq!(machine.current(), ConnectionState::Connecting);
    }
}
