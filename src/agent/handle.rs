//! Control handle for a running agent

use super::{AgentSession, AgentState, Lifecycle, LifecycleEvent, Transition};
use crate::mail::{Address, Mailbox};
use crate::{Result, RuntimeError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Handle to one agent and its processing task
pub struct AgentHandle {
    session: Arc<AgentSession>,
    lifecycle: Arc<Lifecycle>,
    mailbox: Arc<Mailbox>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AgentHandle {
    pub(crate) fn new(
        session: Arc<AgentSession>,
        lifecycle: Arc<Lifecycle>,
        mailbox: Arc<Mailbox>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            session,
            lifecycle,
            mailbox,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    pub fn agent_id(&self) -> &str {
        &self.session.agent_id
    }

    pub fn address(&self) -> &Address {
        &self.session.address
    }

    pub fn state(&self) -> AgentState {
        self.lifecycle.state()
    }

    /// Messages waiting in the agent's mailbox
    pub fn unread_count(&self) -> usize {
        self.mailbox.unread_count()
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Watch lifecycle state changes
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.lifecycle.subscribe()
    }

    /// Suspend the agent
    ///
    /// An idle agent pauses at once; an active one pauses when its current
    /// step reports.
    pub fn pause(&self) -> Transition {
        self.lifecycle.apply(LifecycleEvent::Pause)
    }

    /// Resume a paused agent; queued mail wakes it right after
    pub fn resume(&self) -> Transition {
        self.lifecycle.apply(LifecycleEvent::Resume)
    }

    /// Stop the agent permanently
    ///
    /// Idempotent. The mailbox is closed at once so later mail bounces; the
    /// processing task exits at its next suspension point.
    pub fn stop(&self) -> Transition {
        // Closed first: anything routed from here on bounces instead of
        // landing in a mailbox nobody will drain
        self.mailbox.close();
        let transition = self.lifecycle.apply(LifecycleEvent::Stop);
        if transition.changed() {
            info!(agent_id = %self.session.agent_id, from = %transition.from, "Stopping agent");
        }
        self.cancel.cancel();
        transition
    }

    pub fn is_stopped(&self) -> bool {
        self.state().is_terminal()
    }

    /// Wait for the processing task to exit
    ///
    /// Returns immediately if it was already joined.
    pub async fn join(&self) -> Result<()> {
        let task = self.task.lock().take();
        match task {
            Some(task) => task
                .await
                .map_err(|e| RuntimeError::Other(format!("Agent task failed: {}", e))),
            None => Ok(()),
        }
    }

    /// Wait until the agent reaches `state`
    pub async fn wait_for_state(&self, state: AgentState, timeout: Duration) -> Result<()> {
        let mut rx = self.lifecycle.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|current| *current == state)).await;

        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(RuntimeError::Other(format!(
                "Lifecycle of {} closed",
                self.session.agent_id
            ))),
            Err(_) => Err(RuntimeError::Timeout(format!(
                "{} did not reach {} within {:?} (currently {})",
                self.session.agent_id,
                state,
                timeout,
                self.state()
            ))),
        }
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("address", &self.session.address)
            .field("state", &self.state())
            .field("unread", &self.unread_count())
            .finish()
    }
}
