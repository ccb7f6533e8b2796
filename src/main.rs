//! Mailroom - Mailbox-routed agent runtime
//!
//! Main entry point for the mailroom CLI.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use mailroom::agent::{AgentSession, AgentState};
use mailroom::config::RuntimeConfig;
use mailroom::integrations::{
    AgentContext, Inference, InferenceError, InferenceOutcome, OutgoingMessage, StaticPrompt,
    WakeReason,
};
use mailroom::mail::{resolve, Address, Message};
use mailroom::Runtime;
use std::path::PathBuf;
use std::time::Duration;

/// Mailroom - Run message-driven agents over addressed mailboxes
#[derive(Parser, Debug)]
#[command(name = "mailroom")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/mailroom/config.yaml)
    #[arg(short, long, env = "MAILROOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    CheckConfig,

    /// Parse an address and show its parts
    Resolve {
        /// Address such as planner@apollo.agent
        address: String,
    },

    /// Run echo agents and exchange a few messages with them
    Run {
        /// Number of agents to spawn
        #[arg(short, long, default_value = "3")]
        agents: usize,

        /// Project scope for the agents
        #[arg(short, long, default_value = "demo")]
        project: String,

        /// Seconds to wait for agents to settle
        #[arg(long, default_value = "5")]
        timeout: u64,

        /// Print Prometheus metrics when done
        #[arg(long)]
        metrics: bool,
    },
}

/// Replies to every message it is shown, except bounces and replies
struct EchoInference;

#[async_trait]
impl Inference for EchoInference {
    async fn infer(
        &self,
        context: &AgentContext,
        reason: WakeReason,
    ) -> std::result::Result<InferenceOutcome, InferenceError> {
        tracing::debug!(agent_id = %context.agent_id, signal = reason.signal(), "Echo step");

        let outcome = context
            .inbox
            .iter()
            .filter(|m| !m.is_bounce() && m.in_reply_to().is_none())
            .fold(InferenceOutcome::stop(), |outcome, message| {
                outcome.send(OutgoingMessage::reply(
                    message,
                    format!("Re: {}", message.subject),
                    format!("{} heard: {}", context.address, message.body),
                ))
            });
        Ok(outcome)
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::load_or_default()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() {
    if let Err(e) = mailroom::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(RuntimeConfig::default_path);
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            RuntimeConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        Commands::CheckConfig => {
            let config = load_config(&cli.config)?;
            config.validate()?;
            println!("Configuration is valid");
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Resolve { address } => {
            let address =
                resolve(&address).with_context(|| format!("Invalid address '{}'", address))?;
            println!("entity:  {}", address.entity_id());
            println!("scope:   {}", address.scope_id());
            println!("suffix:  {}", address.suffix().as_str());
            println!("target:  {}", address_target(&address));
        }
        Commands::Run {
            agents,
            project,
            timeout,
            metrics,
        } => {
            let config = load_config(&cli.config)?;
            run_demo(config, agents, &project, Duration::from_secs(timeout)).await?;
            if metrics {
                print!("{}", mailroom::metrics::gather());
            }
        }
    }
    Ok(())
}

fn address_target(address: &Address) -> &'static str {
    if address.is_user() {
        "user session"
    } else {
        "agent mailbox"
    }
}

async fn run_demo(
    config: RuntimeConfig,
    agent_count: usize,
    project: &str,
    timeout: Duration,
) -> Result<()> {
    if agent_count == 0 {
        bail!("At least one agent is required");
    }

    let runtime = Runtime::builder()
        .config(config)
        .inference(EchoInference)
        .prompt(StaticPrompt::new("You are {agent_id}, reachable at {address}."))
        .build()?;

    let user = Address::user("operator", project)?;
    let inbox = runtime.register_user(user.clone())?;

    let mut handles = Vec::with_capacity(agent_count);
    for i in 0..agent_count {
        let session = AgentSession::new(format!("agent-{}", i), project)?
            .with_metadata("index", i);
        handles.push(runtime.spawn_agent(session)?);
    }

    for handle in &handles {
        runtime.send(Message::new(
            user.clone(),
            handle.address().clone(),
            "Hello",
            format!("Hi {}", handle.agent_id()),
        ))?;
    }

    // Addressed to nobody; comes back as a bounce
    let missing = Address::agent("nobody", project)?;
    if let Err(e) = runtime.send(Message::new(user.clone(), missing, "Anyone?", "...")) {
        println!("send failed as expected: {}", e);
    }

    let pending = runtime.request(
        Message::new(user.clone(), handles[0].address().clone(), "Ping", "ping"),
        Some(timeout),
    )?;
    let token = pending.token().to_string();
    match tokio::time::timeout(timeout, pending.response()).await {
        Ok(Some(reply)) => println!("request {} answered by {}", token, reply.from),
        Ok(None) => println!("request {} expired", token),
        Err(_) => println!("request {} timed out", token),
    }

    for handle in &handles {
        handle
            .wait_for_state(AgentState::Idle, timeout)
            .await
            .with_context(|| format!("{} did not settle", handle.agent_id()))?;
    }

    println!("\n{} received:", user);
    for message in inbox.drain(usize::MAX) {
        println!(
            "  [{:?}] {} <- {}: {}",
            message.priority, message.subject, message.from, message.body
        );
    }

    println!("\nAgents:");
    for handle in &handles {
        println!(
            "  {:<24} {:<10} unread={}",
            handle.address().to_string(),
            handle.state().as_str(),
            handle.unread_count()
        );
    }

    runtime.shutdown().await;
    Ok(())
}
