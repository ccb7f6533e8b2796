//! Inference service interface
//!
//! The runtime never talks to a model directly. Each processing step hands an
//! [`AgentContext`] to an [`Inference`] implementation and gets back an
//! explicit [`Decision`] plus any mail to send and tools to run.

use super::retry::RetryHint;
use super::{RenderedPrompt, ToolOutcome, ToolRequest};
use crate::agent::Decision;
use crate::mail::{Address, Headers, Message, Priority};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Why a processing step is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeReason {
    /// New mail woke the agent
    Mail,
    /// The previous step decided to continue
    Continue,
}

impl WakeReason {
    /// The fixed prompt signal for this wake
    pub fn signal(&self) -> &'static str {
        match self {
            WakeReason::Mail => "you have mail",
            WakeReason::Continue => "continue",
        }
    }
}

/// Everything the inference service sees for one step
#[derive(Debug, Clone, Serialize)]
pub struct AgentContext {
    pub agent_id: String,
    pub project_id: String,
    pub address: Address,
    /// Opaque metadata from the agent session
    pub metadata: BTreeMap<String, Value>,
    pub prompt: RenderedPrompt,
    /// Mail taken from the mailbox for this step, delivery order
    pub inbox: Vec<Message>,
    /// Results of tools requested by the previous step
    pub tool_results: Vec<ToolOutcome>,
    /// Step counter for this agent, starting at 1
    pub step: u64,
    /// Version of the configuration snapshot in effect
    pub config_version: u64,
}

/// A message the agent wants to send
///
/// The runtime stamps `from` with the agent's own address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub to: Address,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub headers: Headers,
}

impl OutgoingMessage {
    pub fn new(to: Address, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to,
            subject: subject.into(),
            body: body.into(),
            priority: Priority::Normal,
            headers: Headers::new(),
        }
    }

    /// Answer `original`, carrying its correlation token or id in `in-reply-to`
    pub fn reply(original: &Message, subject: impl Into<String>, body: impl Into<String>) -> Self {
        let reply = Message::reply_to(original, subject, body);
        Self {
            to: reply.to,
            subject: reply.subject,
            body: reply.body,
            priority: original.priority,
            headers: reply.headers,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Build the message sent from `from`
    pub fn into_message(self, from: Address) -> Message {
        let mut message = Message::new(from, self.to, self.subject, self.body)
            .with_priority(self.priority);
        message.headers = self.headers;
        message
    }
}

/// Result of one inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutcome {
    pub decision: Decision,
    #[serde(default)]
    pub outgoing: Vec<OutgoingMessage>,
    #[serde(default)]
    pub tool_requests: Vec<ToolRequest>,
}

impl InferenceOutcome {
    /// Go back to waiting for mail
    pub fn stop() -> Self {
        Self::with_decision(Decision::Stop)
    }

    /// Run another step right away
    pub fn proceed() -> Self {
        Self::with_decision(Decision::Continue)
    }

    pub fn with_decision(decision: Decision) -> Self {
        Self {
            decision,
            outgoing: Vec::new(),
            tool_requests: Vec::new(),
        }
    }

    pub fn send(mut self, message: OutgoingMessage) -> Self {
        self.outgoing.push(message);
        self
    }

    pub fn call_tool(mut self, request: ToolRequest) -> Self {
        self.tool_requests.push(request);
        self
    }
}

/// Inference failures
///
/// Every variant is retryable; the runtime gives up only when the attempt
/// budget is spent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("inference service unavailable: {0}")]
    Unavailable(String),

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("inference rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("inference returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl RetryHint for InferenceError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            InferenceError::RateLimited(after) => Some(*after),
            _ => None,
        }
    }
}

/// The external inference collaborator
///
/// Implementations must be safe to call again with the same context: a
/// failed call is retried.
#[async_trait]
pub trait Inference: Send + Sync {
    async fn infer(
        &self,
        context: &AgentContext,
        reason: WakeReason,
    ) -> Result<InferenceOutcome, InferenceError>;
}
