//! Versioned configuration snapshots
//!
//! A processing step reads one snapshot and keeps it for the whole step, so
//! a reload never changes settings halfway through. Swapping publishes a new
//! version atomically to every reader.

use super::RuntimeConfig;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// One immutable version of the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config: RuntimeConfig,
}

/// Shared handle to the current configuration
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    sender: Arc<watch::Sender<Arc<ConfigSnapshot>>>,
}

impl ConfigHandle {
    /// Start at version 1
    pub fn new(config: RuntimeConfig) -> Self {
        let (sender, _) = watch::channel(Arc::new(ConfigSnapshot { version: 1, config }));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// The snapshot in effect right now
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&*self.sender.borrow())
    }

    pub fn version(&self) -> u64 {
        self.sender.borrow().version
    }

    /// Publish `config` as the next version, returning that version
    pub fn swap(&self, config: RuntimeConfig) -> u64 {
        let mut version = 0;
        self.sender.send_modify(|current| {
            version = current.version + 1;
            *current = Arc::new(ConfigSnapshot { version, config });
        });
        info!(version, "Configuration swapped");
        version
    }

    /// Watch for new versions
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.sender.subscribe()
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
