//! Error types for Mailroom
//!
//! Each subsystem has its own error enum; [`RuntimeError`] wraps them for
//! the public runtime API. Uses thiserror for ergonomic error handling.

use crate::integrations::{InferenceError, ToolError};
use crate::mail::{AddressError, CorrelationError, RouteError};
use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Comprehensive error type for runtime operations
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address parsing errors
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// Routing and delivery errors
    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    /// Correlation tracking errors
    #[error("Correlation error: {0}")]
    Correlation(#[from] CorrelationError),

    /// Inference service errors
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Tool execution errors
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// No agent with this id
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// An agent id was registered twice
    #[error("Agent already exists: {0}")]
    AgentExists(String),

    /// The runtime has been shut down
    #[error("Runtime is shut down")]
    ShutDown,

    /// Waiting for a response or state timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
