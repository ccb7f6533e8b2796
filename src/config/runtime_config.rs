//! Runtime configuration
//!
//! Stored as YAML, by default at ~/.config/mailroom/config.yaml. Every field
//! has a default so a partial file (or none at all) is valid.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Inference attempts per processing step, including the first
    #[serde(default = "default_max_inference_attempts")]
    pub max_inference_attempts: u32,

    /// Backoff between inference attempts
    #[serde(default)]
    pub retry: RetrySettings,

    /// Messages taken from the mailbox per processing step
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,

    /// Per-mailbox cap; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailbox_capacity: Option<usize>,

    /// Lifetime of an outstanding request/response correlation
    #[serde(default = "default_correlation_ttl_secs")]
    pub correlation_ttl_secs: u64,

    /// How often expired correlations are swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Consecutive continue decisions before a step is forced back to idle
    #[serde(default = "default_max_continue_steps")]
    pub max_continue_steps: u32,

    /// Runtime events a slow subscriber may lag behind
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_inference_attempts() -> u32 {
    3
}

fn default_drain_batch() -> usize {
    32
}

fn default_correlation_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_max_continue_steps() -> u32 {
    64
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_inference_attempts: default_max_inference_attempts(),
            retry: RetrySettings::default(),
            drain_batch: default_drain_batch(),
            mailbox_capacity: None,
            correlation_ttl_secs: default_correlation_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_continue_steps: default_max_continue_steps(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the default path
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::RuntimeError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading runtime configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            max_inference_attempts = config.max_inference_attempts,
            drain_batch = config.drain_batch,
            mailbox_capacity = ?config.mailbox_capacity,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load the default file if it exists, otherwise use defaults
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving runtime configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/mailroom/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("mailroom");
        path.push("config.yaml");
        path
    }

    /// Check the configuration, collecting every problem
    pub fn validate(&self) -> Result<()> {
        super::validation::validate_config_result(self)
    }

    pub fn correlation_ttl(&self) -> Duration {
        Duration::from_secs(self.correlation_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn with_max_inference_attempts(mut self, attempts: u32) -> Self {
        self.max_inference_attempts = attempts;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    pub fn with_drain_batch(mut self, batch: usize) -> Self {
        self.drain_batch = batch;
        self
    }

    pub fn with_correlation_ttl(mut self, ttl: Duration) -> Self {
        self.correlation_ttl_secs = ttl.as_secs();
        self
    }

    /// Backoff suited to tests: millisecond waits, no jitter
    pub fn with_fast_retries(mut self) -> Self {
        self.retry = RetrySettings {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 2.0,
            jitter: false,
        };
        self
    }
}
