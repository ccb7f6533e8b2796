//! Agents
//!
//! Each agent owns one mailbox and one lifecycle. Mail delivery wakes the
//! lifecycle, which releases the agent's processing loop for one step at a
//! time.

mod handle;
mod lifecycle;
mod processor;
mod session;

pub use handle::AgentHandle;
pub use lifecycle::{
    AgentState, Decision, Lifecycle, LifecycleEvent, Outcome, StateMachine, Transition,
};
pub use session::AgentSession;

pub(crate) use processor::{Processor, ProcessorDeps};
