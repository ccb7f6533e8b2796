//! External collaborators
//!
//! The runtime core calls out to three services it does not implement:
//! inference, tool execution and prompt rendering. Each sits behind a trait
//! so callers inject their own implementation.
//!
//! Includes retry with exponential backoff for inference calls.

mod inference;
mod prompt;
pub mod retry;
mod tools;

pub use inference::{
    AgentContext, Inference, InferenceError, InferenceOutcome, OutgoingMessage, WakeReason,
};
pub use prompt::{PromptProvider, RenderedPrompt, StaticPrompt};
pub use retry::{retry, Exhausted, RetryHint, RetryPolicy};
pub use tools::{
    ExecutionContext, NoTools, ToolError, ToolExecutor, ToolOutcome, ToolRequest, ToolResult,
    ToolStatus,
};
