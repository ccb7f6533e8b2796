//! Configuration system
//!
//! Loads ~/.config/mailroom/config.yaml with support for:
//! - Inference retry budget and backoff
//! - Mailbox drain batch and optional capacity
//! - Correlation lifetime and sweep interval
//! - Versioned snapshots that can be swapped at runtime

mod runtime_config;
mod snapshot;
pub mod validation;

pub use runtime_config::{RetrySettings, RuntimeConfig};
pub use snapshot::{ConfigHandle, ConfigSnapshot};
pub use validation::{validate_config, validate_config_result, ValidationError};
