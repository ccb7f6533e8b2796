//! Tool execution interface
//!
//! Tool bodies live outside the runtime. The processing loop runs each
//! requested tool through a [`ToolExecutor`] and folds the result into the
//! next step's context; a failing tool is reported to the agent, never fatal.

use crate::mail::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A tool invocation requested by inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

/// Who is running the tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionContext {
    pub agent_id: String,
    pub project_id: String,
    pub address: Address,
    pub step: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Output of one tool run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub payload: Value,
}

impl ToolResult {
    pub fn success(payload: Value) -> Self {
        Self {
            status: ToolStatus::Success,
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            payload: Value::String(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// A request paired with its result, as seen by the next inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub request: ToolRequest,
    pub result: ToolResult,
}

/// Tool execution failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

/// The external tool collaborator
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        parameters: &Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError>;
}

/// Executor for agents that have no tools
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    async fn execute(
        &self,
        name: &str,
        _parameters: &Value,
        _context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        Err(ToolError::UnknownTool(name.to_string()))
    }
}
