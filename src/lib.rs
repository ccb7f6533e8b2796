//! Mailroom - Mailbox-routed runtime for message-driven AI agents
//!
//! Agents never call each other directly. Every interaction is a [`Message`]
//! routed to an addressed [`Mailbox`]; delivery wakes the owning agent, whose
//! lifecycle state machine releases a single processing loop that consults an
//! external inference service and sends more mail.
//!
//! # Architecture
//!
//! - **mail**: Addresses, messages, mailboxes, the directory and router,
//!   request/response correlation
//! - **agent**: Lifecycle state machine, sessions, the processing loop and
//!   agent handles
//! - **integrations**: Interfaces to external collaborators (inference,
//!   tools, prompts) and retry with backoff
//! - **runtime**: Wires everything together with explicit dependencies
//! - **config**: YAML configuration and versioned snapshots
//! - **events**, **metrics**, **logging**: Observability
//!
//! [`Message`]: mail::Message
//! [`Mailbox`]: mail::Mailbox

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod integrations;
pub mod logging;
pub mod mail;
pub mod metrics;
pub mod runtime;

// Re-exports
pub use error::{Result, RuntimeError};
pub use runtime::{Runtime, RuntimeBuilder};
