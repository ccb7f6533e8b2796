//! Runtime events for observability
//!
//! Every notable runtime occurrence is published on an [`EventBus`]:
//! listeners registered with [`EventBus::add_listener`] are called inline, and
//! any number of async subscribers receive events through a broadcast channel.

use crate::agent::AgentState;
use crate::mail::{Address, BounceReason, MessageId};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Type alias for event listener collection to reduce complexity
type EventListeners = Arc<RwLock<Vec<Box<dyn Fn(&RuntimeEvent) + Send + Sync>>>>;

/// Events emitted by the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// An agent's lifecycle state changed
    StateChanged {
        agent_id: String,
        from: AgentState,
        to: AgentState,
    },

    /// A message could not be delivered and was bounced to its sender
    Bounced {
        original_id: MessageId,
        sender: Address,
        recipient: Address,
        reason: BounceReason,
    },

    /// Inference kept failing until the retry budget ran out
    InferenceFailed {
        agent_id: String,
        attempts: u32,
        error: String,
    },

    /// A tool request came back as an error
    ToolFailed {
        agent_id: String,
        tool: String,
        error: String,
    },

    /// Outstanding correlations were dropped by an expiry sweep
    CorrelationsExpired { count: usize },

    /// An agent's processing loop exited
    AgentStopped { agent_id: String },
}

impl RuntimeEvent {
    /// Check if this event reports a failure
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            RuntimeEvent::InferenceFailed { .. } | RuntimeEvent::ToolFailed { .. }
        )
    }
}

/// Fan-out point for [`RuntimeEvent`]s
pub struct EventBus {
    sender: broadcast::Sender<RuntimeEvent>,
    listeners: EventListeners,
}

impl EventBus {
    /// Create a bus whose subscribers may lag by up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Add an event listener
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&RuntimeEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(listener));
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to listeners and subscribers
    pub fn emit(&self, event: RuntimeEvent) {
        match &event {
            RuntimeEvent::InferenceFailed {
                agent_id,
                attempts,
                error,
            } => error!(agent_id = %agent_id, attempts, "Inference failed: {}", error),
            RuntimeEvent::ToolFailed {
                agent_id,
                tool,
                error,
            } => warn!(agent_id = %agent_id, tool = %tool, "Tool failed: {}", error),
            other => debug!(event = ?other, "Runtime event"),
        }

        for listener in self.listeners.read().iter() {
            listener(&event);
        }

        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
