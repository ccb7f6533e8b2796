//! Per-agent processing loop
//!
//! One task per agent. The loop sleeps while the agent is idle or paused and
//! runs one processing step at a time while it is active, so an agent never
//! has two steps in flight. A step:
//!
//! 1. Takes a batch of mail from the mailbox
//! 2. Calls inference, retrying with backoff
//! 3. Routes outgoing mail and runs requested tools
//! 4. Reports the decision to the lifecycle
//!
//! Stop is observed at every suspension point through a cancellation token.

use super::{AgentSession, AgentState, Decision, Lifecycle, LifecycleEvent};
use crate::config::ConfigHandle;
use crate::events::{EventBus, RuntimeEvent};
use crate::integrations::{
    retry, AgentContext, Exhausted, ExecutionContext, Inference, PromptProvider, RetryPolicy,
    ToolExecutor, ToolOutcome, ToolResult, ToolStatus, WakeReason,
};
use crate::mail::{Mailbox, Message, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a processing step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepResult {
    /// The lifecycle was updated; keep looping
    Reported,
    /// Stop was requested mid-step
    Cancelled,
}

/// Collaborators a processing loop needs
#[derive(Clone)]
pub(crate) struct ProcessorDeps {
    pub router: Arc<Router>,
    pub inference: Arc<dyn Inference>,
    pub tools: Arc<dyn ToolExecutor>,
    pub prompt: Arc<dyn PromptProvider>,
    pub config: ConfigHandle,
    pub events: Arc<EventBus>,
}

/// State of one agent's processing loop
pub(crate) struct Processor {
    session: Arc<AgentSession>,
    lifecycle: Arc<Lifecycle>,
    mailbox: Arc<Mailbox>,
    deps: ProcessorDeps,
    cancel: CancellationToken,
    step: u64,
    reason: WakeReason,
    continues: u32,
    tool_results: Vec<ToolOutcome>,
}

impl Processor {
    pub(crate) fn new(
        session: Arc<AgentSession>,
        lifecycle: Arc<Lifecycle>,
        mailbox: Arc<Mailbox>,
        deps: ProcessorDeps,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            lifecycle,
            mailbox,
            deps,
            cancel,
            step: 0,
            reason: WakeReason::Mail,
            continues: 0,
            tool_results: Vec::new(),
        }
    }

    /// Drive the agent until it is stopped
    pub(crate) async fn run(mut self) {
        let mut state_rx = self.lifecycle.subscribe();
        info!(agent_id = %self.session.agent_id, address = %self.session.address, "Agent started");

        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                AgentState::Stopped => break,
                AgentState::Active => {
                    if self.step().await == StepResult::Cancelled {
                        break;
                    }
                }
                AgentState::Resuming => {
                    self.lifecycle.apply(LifecycleEvent::ResumeComplete);
                    self.wake_if_pending();
                }
                AgentState::Idle | AgentState::Paused => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        changed = state_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.finish();
    }

    /// Mail that arrived while the agent was busy or paused wakes it now
    fn wake_if_pending(&self) {
        if self.lifecycle.state() == AgentState::Idle && self.mailbox.unread_count() > 0 {
            self.lifecycle.apply(LifecycleEvent::MailDelivered);
        }
    }

    async fn step(&mut self) -> StepResult {
        // One snapshot for the whole step
        let snapshot = self.deps.config.current();
        let config = &snapshot.config;
        let reason = self.reason;

        self.step += 1;
        let inbox: Vec<Message> = self.mailbox.drain(config.drain_batch).collect();
        debug!(
            agent_id = %self.session.agent_id,
            step = self.step,
            reason = reason.signal(),
            messages = inbox.len(),
            "Processing step"
        );

        let context = AgentContext {
            agent_id: self.session.agent_id.clone(),
            project_id: self.session.project_id.clone(),
            address: self.session.address.clone(),
            metadata: self.session.metadata.clone(),
            prompt: self.deps.prompt.render(&self.session),
            inbox,
            tool_results: std::mem::take(&mut self.tool_results),
            step: self.step,
            config_version: snapshot.version,
        };

        let policy = RetryPolicy::from_config(config);
        let result = {
            let inference = &*self.deps.inference;
            let context = &context;
            tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = retry(&policy, "inference", move |_| inference.infer(context, reason)) => Some(result),
            }
        };

        let outcome = match result {
            None => {
                self.mailbox.restore(context.inbox);
                return StepResult::Cancelled;
            }
            Some(Err(Exhausted { attempts, error })) => {
                // Put the mail back so nothing is lost
                self.mailbox.restore(context.inbox);
                self.tool_results = context.tool_results;
                self.continues = 0;
                self.reason = WakeReason::Mail;

                crate::metrics::record_inference_failure();
                self.deps.events.emit(RuntimeEvent::InferenceFailed {
                    agent_id: self.session.agent_id.clone(),
                    attempts,
                    error: error.to_string(),
                });
                // No wake here; a failing service would spin on the same mail
                self.lifecycle.apply(LifecycleEvent::ProcessingFailed);
                return StepResult::Reported;
            }
            Some(Ok(outcome)) => outcome,
        };

        if self.cancel.is_cancelled() {
            self.mailbox.restore(context.inbox);
            return StepResult::Cancelled;
        }

        for outgoing in outcome.outgoing {
            let message = outgoing.into_message(self.session.address.clone());
            if let Err(err) = self.deps.router.route(message) {
                debug!(agent_id = %self.session.agent_id, error = %err, "Outgoing message not delivered");
            }
        }

        for request in outcome.tool_requests {
            let execution = ExecutionContext {
                agent_id: self.session.agent_id.clone(),
                project_id: self.session.project_id.clone(),
                address: self.session.address.clone(),
                step: self.step,
            };
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return StepResult::Cancelled,
                result = self.deps.tools.execute(&request.name, &request.parameters, &execution) => result,
            };

            let result = match result {
                Ok(result) => result,
                Err(err) => ToolResult::error(err.to_string()),
            };
            if result.status == ToolStatus::Error {
                self.deps.events.emit(RuntimeEvent::ToolFailed {
                    agent_id: self.session.agent_id.clone(),
                    tool: request.name.clone(),
                    error: result.payload.to_string(),
                });
            }
            self.tool_results.push(ToolOutcome { request, result });
        }

        let mut decision = outcome.decision;
        if decision == Decision::Continue {
            self.continues += 1;
            if self.continues >= config.max_continue_steps {
                warn!(
                    agent_id = %self.session.agent_id,
                    steps = self.continues,
                    "Too many consecutive continue decisions, returning to idle"
                );
                decision = Decision::Stop;
            }
        }

        let transition = self.lifecycle.apply(LifecycleEvent::Processed(decision));
        if transition.to == AgentState::Active {
            self.reason = WakeReason::Continue;
        } else {
            // The run of continues ends here, whether by decision or by pause
            self.continues = 0;
            self.reason = WakeReason::Mail;
        }
        if transition.to == AgentState::Idle {
            self.wake_if_pending();
        }

        StepResult::Reported
    }

    fn finish(self) {
        self.mailbox.close();
        self.lifecycle.apply(LifecycleEvent::Stop);
        self.deps
            .router
            .directory()
            .unregister_mailbox(&self.mailbox);

        info!(
            agent_id = %self.session.agent_id,
            steps = self.step,
            unread = self.mailbox.unread_count(),
            "Agent stopped"
        );
        self.deps.events.emit(RuntimeEvent::AgentStopped {
            agent_id: self.session.agent_id.clone(),
        });
    }
}
