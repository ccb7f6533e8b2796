//! Agent mail
//!
//! Addressing, message envelopes, mailboxes and routing.
//!
//! # Overview
//!
//! Mail is the only channel between agents and users:
//! - **Addresses** name a mailbox: `entity@scope.agent` or `entity@scope.user`
//! - **Mailboxes** queue messages per priority band, FIFO within a band
//! - **The Router** delivers into registered mailboxes and wakes their owners
//! - **Bounces** return undeliverable mail to its sender
//! - **Correlation** pairs requests with responses by token

mod address;
mod correlation;
mod directory;
mod mailbox;
mod message;
mod router;

pub use address::{resolve, Address, AddressError, AddressSuffix, RoutingTarget};
pub use correlation::{CorrelationError, CorrelationHandle, CorrelationTracker};
pub use directory::{Directory, DirectoryEntry, WakeSignal};
pub use mailbox::{DeliveryReceipt, Drain, Mailbox, RejectReason};
pub use message::{header, BounceReason, Headers, Message, MessageId, Priority};
pub use router::{RouteError, RouteResult, Router};
