//! Configuration validation
//!
//! Catches settings that would leave the runtime unable to make progress:
//! - At least one inference attempt
//! - A non-empty drain batch and mailbox capacity
//! - Sane backoff bounds
//! - Non-zero correlation lifetime and sweep interval

use super::runtime_config::RuntimeConfig;
use crate::RuntimeError;

/// Validation error details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a runtime configuration
pub fn validate_config(config: &RuntimeConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.max_inference_attempts == 0 {
        errors.push(ValidationError::new(
            "max_inference_attempts",
            "At least one inference attempt is required",
        ));
    }

    if config.drain_batch == 0 {
        errors.push(ValidationError::new(
            "drain_batch",
            "Must take at least one message per step",
        ));
    }

    if config.mailbox_capacity == Some(0) {
        errors.push(ValidationError::new(
            "mailbox_capacity",
            "A capacity of 0 would reject all mail; omit it for unbounded mailboxes",
        ));
    }

    if config.retry.multiplier < 1.0 {
        errors.push(ValidationError::new(
            "retry.multiplier",
            format!("Must be at least 1.0, got {}", config.retry.multiplier),
        ));
    }

    if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
        errors.push(ValidationError::new(
            "retry.initial_backoff_ms",
            format!(
                "Initial backoff ({}ms) exceeds max backoff ({}ms)",
                config.retry.initial_backoff_ms, config.retry.max_backoff_ms
            ),
        ));
    }

    if config.correlation_ttl_secs == 0 {
        errors.push(ValidationError::new(
            "correlation_ttl_secs",
            "Correlations would expire immediately",
        ));
    }

    if config.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "sweep_interval_secs",
            "Sweep interval must be non-zero",
        ));
    }

    if config.max_continue_steps == 0 {
        errors.push(ValidationError::new(
            "max_continue_steps",
            "Must allow at least one step",
        ));
    }

    if config.event_channel_capacity == 0 {
        errors.push(ValidationError::new(
            "event_channel_capacity",
            "Event channel needs room for at least one event",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and convert to a crate error
pub fn validate_config_result(config: &RuntimeConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        RuntimeError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&RuntimeConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_attempts() {
        let config = RuntimeConfig::default().with_max_inference_attempts(0);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "max_inference_attempts");
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = RuntimeConfig::default().with_mailbox_capacity(0);
        config.drain_batch = 0;
        config.retry.initial_backoff_ms = 20_000;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["drain_batch", "mailbox_capacity", "retry.initial_backoff_ms"]
        );
    }

    #[test]
    fn test_result_message() {
        let config = RuntimeConfig::default().with_drain_batch(0);
        let err = validate_config_result(&config).unwrap_err();
        assert!(err.to_string().contains("drain_batch"));
    }
}
