//! Runtime
//!
//! Owns the directory, router, correlation tracker and every agent task.
//! Collaborators are injected through [`RuntimeBuilder`]; nothing is global
//! apart from metrics.
//!
//! ```ignore
//! let runtime = Runtime::builder()
//!     .inference(MyModel::new())
//!     .config(RuntimeConfig::load_default()?)
//!     .build()?;
//!
//! let planner = runtime.spawn_agent(AgentSession::new("planner", "apollo")?)?;
//! runtime.send(Message::try_new("alice@apollo.user", "planner@apollo.agent", "Plan", "...")?)?;
//! ```

use crate::agent::{AgentHandle, AgentSession, Lifecycle, Processor, ProcessorDeps};
use crate::config::{ConfigHandle, RuntimeConfig};
use crate::events::{EventBus, RuntimeEvent};
use crate::integrations::{Inference, NoTools, PromptProvider, StaticPrompt, ToolExecutor};
use crate::mail::{
    Address, CorrelationHandle, CorrelationTracker, Directory, Mailbox, Message, RouteResult,
    Router, WakeSignal,
};
use crate::{Result, RuntimeError};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Builder for [`Runtime`]
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    inference: Option<Arc<dyn Inference>>,
    tools: Option<Arc<dyn ToolExecutor>>,
    prompt: Option<Arc<dyn PromptProvider>>,
    events: Option<Arc<EventBus>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// The inference service (required)
    pub fn inference(self, inference: impl Inference + 'static) -> Self {
        self.inference_arc(Arc::new(inference))
    }

    pub fn inference_arc(mut self, inference: Arc<dyn Inference>) -> Self {
        self.inference = Some(inference);
        self
    }

    /// Tool executor; defaults to [`NoTools`]
    pub fn tools(mut self, tools: impl ToolExecutor + 'static) -> Self {
        self.tools = Some(Arc::new(tools));
        self
    }

    /// Prompt provider; defaults to an empty [`StaticPrompt`]
    pub fn prompt(mut self, prompt: impl PromptProvider + 'static) -> Self {
        self.prompt = Some(Arc::new(prompt));
        self
    }

    /// Share an existing event bus
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the runtime and start the correlation sweeper
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Runtime> {
        self.config.validate()?;

        let inference = self
            .inference
            .ok_or_else(|| RuntimeError::Config("No inference service configured".to_string()))?;
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(EventBus::new(self.config.event_channel_capacity)));

        let directory = Arc::new(Directory::new());
        let correlation = Arc::new(CorrelationTracker::new());
        let router = Arc::new(
            Router::new(Arc::clone(&directory), Arc::clone(&events))
                .with_correlation(Arc::clone(&correlation)),
        );
        let config = ConfigHandle::new(self.config);
        let shutdown = CancellationToken::new();

        let sweeper = tokio::spawn(sweep_correlations(
            Arc::clone(&correlation),
            config.clone(),
            Arc::clone(&events),
            shutdown.clone(),
        ));

        info!(version = config.version(), "Runtime started");

        Ok(Runtime {
            directory,
            router,
            correlation,
            config,
            events,
            inference,
            tools: self.tools.unwrap_or_else(|| Arc::new(NoTools)),
            prompt: self
                .prompt
                .unwrap_or_else(|| Arc::new(StaticPrompt::default())),
            agents: RwLock::new(HashMap::new()),
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }
}

/// The agent runtime
pub struct Runtime {
    directory: Arc<Directory>,
    router: Arc<Router>,
    correlation: Arc<CorrelationTracker>,
    config: ConfigHandle,
    events: Arc<EventBus>,
    inference: Arc<dyn Inference>,
    tools: Arc<dyn ToolExecutor>,
    prompt: Arc<dyn PromptProvider>,
    agents: RwLock<HashMap<Address, Arc<AgentHandle>>>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn correlation(&self) -> &Arc<CorrelationTracker> {
        &self.correlation
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Receive runtime events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            Err(RuntimeError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Register an agent's mailbox and start its processing loop
    ///
    /// The agent starts idle and wakes on its first mail. A stopped agent
    /// at the same address is replaced.
    pub fn spawn_agent(&self, session: AgentSession) -> Result<Arc<AgentHandle>> {
        self.ensure_running()?;

        let mut agents = self.agents.write();
        if let Some(existing) = agents.get(&session.address) {
            if !existing.is_stopped() {
                return Err(RuntimeError::AgentExists(session.address.to_string()));
            }
            // Its loop may not have unregistered the closed mailbox yet
            self.directory.unregister_mailbox(existing.mailbox());
            agents.remove(&session.address);
        }

        let snapshot = self.config.current();
        let lifecycle = Arc::new(Lifecycle::new(
            session.agent_id.clone(),
            Arc::clone(&self.events),
        ));
        let waker: Arc<dyn WakeSignal> = lifecycle.clone();
        let mailbox = self.directory.register(
            session.address.clone(),
            snapshot.config.mailbox_capacity,
            waker,
        )?;

        let session = Arc::new(session);
        let cancel = self.shutdown.child_token();
        let processor = Processor::new(
            Arc::clone(&session),
            Arc::clone(&lifecycle),
            Arc::clone(&mailbox),
            ProcessorDeps {
                router: Arc::clone(&self.router),
                inference: Arc::clone(&self.inference),
                tools: Arc::clone(&self.tools),
                prompt: Arc::clone(&self.prompt),
                config: self.config.clone(),
                events: Arc::clone(&self.events),
            },
            cancel.clone(),
        );
        let task = tokio::spawn(processor.run());

        let handle = Arc::new(AgentHandle::new(
            Arc::clone(&session),
            lifecycle,
            mailbox,
            cancel,
            task,
        ));
        agents.insert(session.address.clone(), Arc::clone(&handle));

        debug!(agent_id = %session.agent_id, address = %session.address, "Spawned agent");
        Ok(handle)
    }

    /// Register a user session sink
    ///
    /// Mail to the address queues up for the caller to drain; nothing is
    /// woken.
    pub fn register_user(&self, address: Address) -> Result<Arc<Mailbox>> {
        self.ensure_running()?;
        if !address.is_user() {
            return Err(RuntimeError::Other(format!(
                "{} is not a user address",
                address
            )));
        }

        let capacity = self.config.current().config.mailbox_capacity;
        Ok(self.directory.register_sink(address, capacity)?)
    }

    /// Remove a user session sink; its queued mail is dropped
    pub fn unregister_user(&self, address: &Address) -> Option<Arc<Mailbox>> {
        let mailbox = self.directory.unregister(address)?;
        mailbox.close();
        Some(mailbox)
    }

    /// Route a message
    ///
    /// Undeliverable messages are bounced to their sender and reported as
    /// an error.
    pub fn send(&self, message: Message) -> Result<RouteResult> {
        self.ensure_running()?;
        Ok(self.router.route(message)?)
    }

    /// Send a new message from a user session to a raw address
    pub fn send_as_user(
        &self,
        from: &Address,
        raw_to: &str,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<RouteResult> {
        self.ensure_running()?;
        if !from.is_user() {
            return Err(RuntimeError::Other(format!("{} is not a user address", from)));
        }
        Ok(self.router.route_to(from.clone(), raw_to, subject, body)?)
    }

    /// Send a request and get a handle to await its correlated response
    ///
    /// Uses the configured correlation lifetime unless `ttl` is given. If the
    /// request cannot be delivered the registration is withdrawn.
    pub fn request(&self, mut message: Message, ttl: Option<Duration>) -> Result<CorrelationHandle> {
        self.ensure_running()?;
        let ttl = ttl.unwrap_or_else(|| self.config.current().config.correlation_ttl());
        let handle = self.correlation.register_request(&mut message, ttl)?;

        if let Err(err) = self.router.route(message) {
            self.correlation.cancel(handle.token());
            return Err(err.into());
        }
        Ok(handle)
    }

    pub fn agent(&self, address: &Address) -> Option<Arc<AgentHandle>> {
        self.agents.read().get(address).cloned()
    }

    pub fn agents(&self) -> Vec<Arc<AgentHandle>> {
        self.agents.read().values().cloned().collect()
    }

    /// Stop one agent and wait for its loop to exit
    ///
    /// Idempotent: stopping a stopped agent succeeds. The handle stays
    /// listed, in `Stopped`, until the address is spawned again.
    pub async fn stop_agent(&self, address: &Address) -> Result<()> {
        let handle = self
            .agent(address)
            .ok_or_else(|| RuntimeError::AgentNotFound(address.to_string()))?;
        handle.stop();
        handle.join().await
    }

    /// Validate and publish a new configuration version
    ///
    /// Steps already running finish with the snapshot they started with.
    /// Mailbox capacity applies to mailboxes registered afterwards.
    pub fn reload(&self, config: RuntimeConfig) -> Result<u64> {
        config.validate()?;
        Ok(self.config.swap(config))
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every agent and the sweeper, waiting for their tasks
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let agents: Vec<Arc<AgentHandle>> = self.agents.write().drain().map(|(_, h)| h).collect();
        for handle in &agents {
            handle.stop();
        }
        for handle in agents {
            if let Err(e) = handle.join().await {
                warn!(agent_id = %handle.agent_id(), error = %e, "Agent did not shut down cleanly");
            }
        }

        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }
        info!("Runtime shut down");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("agents", &self.agents.read().len())
            .field("mailboxes", &self.directory.len())
            .field("config_version", &self.config.version())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Periodically drop expired correlations
async fn sweep_correlations(
    tracker: Arc<CorrelationTracker>,
    config: ConfigHandle,
    events: Arc<EventBus>,
    shutdown: CancellationToken,
) {
    loop {
        let interval = config.current().config.sweep_interval();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let count = tracker.expire_sweep(Utc::now());
                if count > 0 {
                    debug!(count, "Expired correlations");
                    events.emit(RuntimeEvent::CorrelationsExpired { count });
                }
            }
        }
    }
}
