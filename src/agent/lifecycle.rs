//! Agent lifecycle state machine
//!
//! | Current        | Event                    | Next     |
//! |----------------|--------------------------|----------|
//! | Idle           | mail delivered           | Active   |
//! | Active         | processed: stop          | Idle     |
//! | Active         | processed: continue      | Active   |
//! | Active         | processing failed        | Idle     |
//! | Idle           | pause                    | Paused   |
//! | Active         | pause                    | Paused once the in-flight step reports |
//! | Paused         | resume                   | Resuming |
//! | Resuming       | resume complete          | Idle     |
//! | any but Stopped| stop                     | Stopped  |
//!
//! Every other pair is a no-op. `Stopped` is terminal.
//!
//! [`StateMachine`] is the pure transition function; [`Lifecycle`] is the
//! shared, observable handle the router and processing loop drive.

use crate::events::{EventBus, RuntimeEvent};
use crate::mail::WakeSignal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Agent lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Waiting for mail
    Idle,
    /// Processing mail
    Active,
    /// Suspended by command; mail queues up
    Paused,
    /// Leaving `Paused`; settles to `Idle`
    Resuming,
    /// Terminal
    Stopped,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Active => "active",
            AgentState::Paused => "paused",
            AgentState::Resuming => "resuming",
            AgentState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Stopped)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the agent decided at the end of a processing step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Suspend until more mail arrives
    Stop,
    /// Run another step immediately
    Continue,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    MailDelivered,
    Processed(Decision),
    ProcessingFailed,
    Pause,
    Resume,
    ResumeComplete,
    Stop,
}

/// How an event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event was accepted (the state may be unchanged, e.g. continue)
    Applied,
    /// Accepted, but takes effect when the in-flight step finishes
    Deferred,
    /// No transition is defined for this state
    Ignored,
}

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: AgentState,
    pub to: AgentState,
    pub outcome: Outcome,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn is_ignored(&self) -> bool {
        self.outcome == Outcome::Ignored
    }
}

/// Pure lifecycle transition function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    state: AgentState,
    pause_pending: bool,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: AgentState::Idle,
            pause_pending: false,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// A pause was requested mid-step and is waiting for the step to finish
    pub fn pause_pending(&self) -> bool {
        self.pause_pending
    }

    /// Apply one event
    pub fn apply(&mut self, event: LifecycleEvent) -> Transition {
        use AgentState::*;
        use LifecycleEvent::*;

        let from = self.state;
        let (to, outcome) = match (from, event) {
            (Stopped, _) => (Stopped, Outcome::Ignored),
            (_, Stop) => (Stopped, Outcome::Applied),

            (Idle, MailDelivered) => (Active, Outcome::Applied),
            (Idle, Pause) => (Paused, Outcome::Applied),

            (Active, Pause) if self.pause_pending => (Active, Outcome::Ignored),
            (Active, Pause) => {
                self.pause_pending = true;
                (Active, Outcome::Deferred)
            }
            (Active, Resume) if self.pause_pending => {
                self.pause_pending = false;
                (Active, Outcome::Applied)
            }
            (Active, Processed(_) | ProcessingFailed) if self.pause_pending => {
                self.pause_pending = false;
                (Paused, Outcome::Applied)
            }
            (Active, Processed(Decision::Continue)) => (Active, Outcome::Applied),
            (Active, Processed(Decision::Stop)) => (Idle, Outcome::Applied),
            (Active, ProcessingFailed) => (Idle, Outcome::Applied),

            (Paused, Resume) => (Resuming, Outcome::Applied),
            (Resuming, ResumeComplete) => (Idle, Outcome::Applied),

            (state, _) => (state, Outcome::Ignored),
        };

        self.state = to;
        if to == Stopped {
            self.pause_pending = false;
        }

        Transition { from, to, outcome }
    }
}

/// Shared, observable lifecycle of one agent
///
/// State changes are published on a watch channel so the processing loop can
/// sleep until something happens, and on the [`EventBus`].
pub struct Lifecycle {
    agent_id: String,
    machine: Mutex<StateMachine>,
    state_tx: watch::Sender<AgentState>,
    events: Arc<EventBus>,
}

impl Lifecycle {
    pub fn new(agent_id: impl Into<String>, events: Arc<EventBus>) -> Self {
        let (state_tx, _) = watch::channel(AgentState::Idle);
        Self {
            agent_id: agent_id.into(),
            machine: Mutex::new(StateMachine::new()),
            state_tx,
            events,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> AgentState {
        self.machine.lock().state()
    }

    pub fn pause_pending(&self) -> bool {
        self.machine.lock().pause_pending()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state_tx.subscribe()
    }

    /// Apply an event and publish any state change
    pub fn apply(&self, event: LifecycleEvent) -> Transition {
        let transition = {
            let mut machine = self.machine.lock();
            let transition = machine.apply(event);
            if transition.changed() {
                // Published under the lock so watchers see changes in order
                self.state_tx.send_replace(transition.to);
            }
            transition
        };

        if transition.changed() {
            debug!(
                agent_id = %self.agent_id,
                from = %transition.from,
                to = %transition.to,
                ?event,
                "Lifecycle transition"
            );
            crate::metrics::record_transition(transition.from.as_str(), transition.to.as_str());
            self.events.emit(RuntimeEvent::StateChanged {
                agent_id: self.agent_id.clone(),
                from: transition.from,
                to: transition.to,
            });
        }

        transition
    }
}

impl WakeSignal for Lifecycle {
    fn wake(&self) {
        self.apply(LifecycleEvent::MailDelivered);
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("agent_id", &self.agent_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentState::*;
    use LifecycleEvent::*;

    const ALL_STATES: [AgentState; 5] = [Idle, Active, Paused, Resuming, Stopped];
    const ALL_EVENTS: [LifecycleEvent; 8] = [
        MailDelivered,
        Processed(Decision::Stop),
        Processed(Decision::Continue),
        ProcessingFailed,
        Pause,
        Resume,
        ResumeComplete,
        Stop,
    ];

    fn machine_in(state: AgentState) -> StateMachine {
        StateMachine {
            state,
            pause_pending: false,
        }
    }

    #[test]
    fn test_table_transitions() {
        let cases = [
            (Idle, MailDelivered, Active),
            (Active, Processed(Decision::Stop), Idle),
            (Active, Processed(Decision::Continue), Active),
            (Active, ProcessingFailed, Idle),
            (Idle, Pause, Paused),
            (Paused, Resume, Resuming),
            (Resuming, ResumeComplete, Idle),
            (Idle, Stop, Stopped),
            (Active, Stop, Stopped),
            (Paused, Stop, Stopped),
            (Resuming, Stop, Stopped),
        ];

        for (from, event, to) in cases {
            let t = machine_in(from).apply(event);
            assert_eq!(t.to, to, "{from:?} + {event:?}");
            assert_eq!(t.outcome, Outcome::Applied, "{from:?} + {event:?}");
        }
    }

    #[test]
    fn test_every_pair_is_defined() {
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                let t = machine_in(state).apply(event);
                assert_eq!(t.from, state);
                if t.is_ignored() {
                    assert_eq!(t.to, state, "ignored events must not move {state:?}");
                }
            }
        }
    }

    #[test]
    fn test_stopped_is_terminal() {
        for event in ALL_EVENTS {
            let t = machine_in(Stopped).apply(event);
            assert_eq!(t.to, Stopped);
            assert!(t.is_ignored());
        }
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut machine = StateMachine::new();
        let first = machine.apply(Stop);
        let second = machine.apply(Stop);
        assert_eq!(first.to, Stopped);
        assert_eq!(second.to, Stopped);
        assert!(second.is_ignored());
    }

    #[test]
    fn test_pause_mid_step_waits_for_result() {
        let mut machine = machine_in(Active);

        let t = machine.apply(Pause);
        assert_eq!(t.outcome, Outcome::Deferred);
        assert_eq!(machine.state(), Active);
        assert!(machine.pause_pending());

        // Mail during the step doesn't change anything
        assert!(machine.apply(MailDelivered).is_ignored());

        let t = machine.apply(Processed(Decision::Continue));
        assert_eq!(t.to, Paused);
        assert!(!machine.pause_pending());
    }

    #[test]
    fn test_resume_cancels_pending_pause() {
        let mut machine = machine_in(Active);
        machine.apply(Pause);
        machine.apply(Resume);
        assert!(!machine.pause_pending());
        assert_eq!(machine.apply(Processed(Decision::Stop)).to, Idle);
    }

    #[test]
    fn test_mail_while_paused_is_ignored() {
        let mut machine = machine_in(Paused);
        assert!(machine.apply(MailDelivered).is_ignored());
        assert_eq!(machine.state(), Paused);
    }

    #[tokio::test]
    async fn test_lifecycle_publishes_changes() {
        let events = Arc::new(EventBus::new(16));
        let mut rx = events.subscribe();
        let lifecycle = Lifecycle::new("agent-1", events);
        let mut state_rx = lifecycle.subscribe();

        lifecycle.wake();
        state_rx.changed().await.unwrap();
        assert_eq!(*state_rx.borrow_and_update(), Active);

        // A second wake in the same burst changes nothing
        lifecycle.wake();
        assert!(!state_rx.has_changed().unwrap());

        assert_eq!(
            rx.recv().await.unwrap(),
            RuntimeEvent::StateChanged {
                agent_id: "agent-1".into(),
                from: Idle,
                to: Active,
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
