//! Router - message delivery between addressed mailboxes
//!
//! The Router is the only way mail moves. For each message it:
//!
//! - classifies the destination address
//! - looks the address up in the [`Directory`]
//! - delivers into the mailbox and signals the owner's wake hook
//! - bounces undeliverable mail back to the sender
//!
//! Delivery and wake happen together: a message that was accepted has also
//! woken its owner, and a rejected message wakes nobody.
//!
//! # Example
//!
//! ```
//! use mailroom::events::EventBus;
//! use mailroom::mail::{Address, Directory, Message, Router};
//! use std::sync::Arc;
//!
//! let directory = Arc::new(Directory::new());
//! let router = Router::new(Arc::clone(&directory), Arc::new(EventBus::default()));
//!
//! let alice = Address::user("alice", "proj").unwrap();
//! let inbox = directory.register_sink(alice.clone(), None).unwrap();
//!
//! let bot = Address::agent("bot", "proj").unwrap();
//! router.route(Message::new(bot, alice, "hi", "hello")).unwrap();
//! assert_eq!(inbox.unread_count(), 1);
//! ```

use super::{
    Address, AddressError, BounceReason, CorrelationTracker, Directory, Mailbox, Message,
    RejectReason,
};
use crate::events::{EventBus, RuntimeEvent};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Routing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("malformed address: {0}")]
    Malformed(#[from] AddressError),

    #[error("no mailbox registered for {0}")]
    UnknownAddress(Address),

    #[error("mailbox for {0} is closed")]
    MailboxClosed(Address),

    #[error("mailbox for {address} is full ({capacity} pending)")]
    MailboxFull { address: Address, capacity: usize },

    #[error("a mailbox is already registered for {0}")]
    AlreadyRegistered(Address),
}

impl RouteError {
    /// Bounce classification, if this failure produces a bounce
    pub fn bounce_reason(&self) -> Option<BounceReason> {
        match self {
            RouteError::UnknownAddress(_) => Some(BounceReason::UnknownAddress),
            RouteError::MailboxClosed(_) => Some(BounceReason::MailboxClosed),
            RouteError::MailboxFull { .. } => Some(BounceReason::MailboxFull),
            RouteError::Malformed(_) | RouteError::AlreadyRegistered(_) => None,
        }
    }
}

/// Result of a successful route
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub delivered: bool,
    pub mailbox: Arc<Mailbox>,
}

/// The message router
pub struct Router {
    directory: Arc<Directory>,
    correlation: Option<Arc<CorrelationTracker>>,
    events: Arc<EventBus>,
}

impl Router {
    pub fn new(directory: Arc<Directory>, events: Arc<EventBus>) -> Self {
        Self {
            directory,
            correlation: None,
            events,
        }
    }

    /// Resolve `in-reply-to` headers against `tracker` before delivery
    pub fn with_correlation(mut self, tracker: Arc<CorrelationTracker>) -> Self {
        self.correlation = Some(tracker);
        self
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn correlation(&self) -> Option<&Arc<CorrelationTracker>> {
        self.correlation.as_ref()
    }

    /// Route a message to its destination mailbox
    ///
    /// # Errors
    /// `UnknownAddress`, `MailboxClosed` and `MailboxFull` also bounce the
    /// message back to its sender.
    pub fn route(&self, message: Message) -> Result<RouteResult, RouteError> {
        let target = message.routing_target();
        debug!(
            id = %message.id,
            from = %message.from,
            to = %target.address(),
            priority = ?message.priority,
            "Routing message"
        );

        match self.deliver(message.clone()) {
            Ok(result) => {
                crate::metrics::record_routed("delivered");
                // Only a reply that reached the requester completes its request
                if let (Some(tracker), Some(token)) = (&self.correlation, message.in_reply_to()) {
                    tracker.resolve(token, &message);
                }
                Ok(result)
            }
            Err(err) => {
                crate::metrics::record_routed("failed");
                if let Some(reason) = err.bounce_reason() {
                    self.bounce(&message, reason);
                }
                Err(err)
            }
        }
    }

    /// Parse `raw_to` and route a new message to it
    pub fn route_to(
        &self,
        from: Address,
        raw_to: &str,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<RouteResult, RouteError> {
        let to = super::resolve(raw_to)?;
        self.route(Message::new(from, to, subject, body))
    }

    fn deliver(&self, message: Message) -> Result<RouteResult, RouteError> {
        let to = message.to.clone();
        let entry = self
            .directory
            .lookup(&to)
            .ok_or_else(|| RouteError::UnknownAddress(to.clone()))?;

        let receipt = entry.mailbox.deliver(message);
        match receipt.reason {
            None => {
                entry.wake();
                Ok(RouteResult {
                    delivered: receipt.accepted,
                    mailbox: entry.mailbox,
                })
            }
            Some(RejectReason::Closed) => Err(RouteError::MailboxClosed(to)),
            Some(RejectReason::Full { capacity }) => Err(RouteError::MailboxFull {
                address: to,
                capacity,
            }),
        }
    }

    /// Return an undeliverable message to its sender
    ///
    /// Bounces are never bounced; if the sender cannot receive mail the
    /// bounce is dropped with a warning.
    fn bounce(&self, original: &Message, reason: BounceReason) {
        crate::metrics::record_bounce(reason.as_str());
        self.events.emit(RuntimeEvent::Bounced {
            original_id: original.id.clone(),
            sender: original.from.clone(),
            recipient: original.to.clone(),
            reason,
        });

        if original.is_bounce() {
            warn!(id = %original.id, %reason, "Dropping undeliverable bounce");
            return;
        }

        let bounce = Message::bounce(original, reason);
        if let Err(err) = self.deliver(bounce) {
            warn!(
                id = %original.id,
                sender = %original.from,
                "Bounce could not be delivered: {}",
                err
            );
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("mailboxes", &self.directory.len())
            .field("correlation", &self.correlation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentState, Lifecycle};
    use crate::mail::{header, Priority};
    use std::time::Duration;

    struct Fixture {
        directory: Arc<Directory>,
        events: Arc<EventBus>,
        router: Router,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(Directory::new());
        let events = Arc::new(EventBus::new(64));
        let router = Router::new(Arc::clone(&directory), Arc::clone(&events));
        Fixture {
            directory,
            events,
            router,
        }
    }

    fn addr(raw: &str) -> Address {
        raw.parse().unwrap()
    }

    #[test]
    fn test_route_to_sink() {
        let f = fixture();
        let inbox = f.directory.register_sink(addr("alice@p.user"), None).unwrap();

        let msg = Message::new(addr("bot@p.agent"), addr("alice@p.user"), "hi", "hello");
        let id = msg.id.clone();
        let result = f.router.route(msg).unwrap();

        assert!(result.delivered);
        assert!(Arc::ptr_eq(&result.mailbox, &inbox));
        assert_eq!(inbox.peek().unwrap().id, id);
    }

    #[test]
    fn test_unknown_address_bounces_to_sender() {
        let f = fixture();
        let mut events = f.events.subscribe();
        let sender_box = f.directory.register_sink(addr("alice@p.user"), None).unwrap();

        let msg = Message::new(addr("alice@p.user"), addr("ghost@p.agent"), "hi", "?");
        let original_id = msg.id.clone();

        let err = f.router.route(msg).unwrap_err();
        assert_eq!(err, RouteError::UnknownAddress(addr("ghost@p.agent")));

        let bounce = sender_box.drain(1).next().unwrap();
        assert_eq!(bounce.bounce_of(), Some(original_id.as_str()));
        assert_eq!(
            bounce.headers.get(header::BOUNCE_REASON),
            Some("unknown_address")
        );

        match events.try_recv().unwrap() {
            RuntimeEvent::Bounced {
                original_id: id,
                reason,
                ..
            } => {
                assert_eq!(id, original_id);
                assert_eq!(reason, BounceReason::UnknownAddress);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_closed_mailbox_bounces() {
        let f = fixture();
        let sender_box = f.directory.register_sink(addr("alice@p.user"), None).unwrap();
        let target = f.directory.register_sink(addr("bot@p.agent"), None).unwrap();
        target.close();

        let err = f
            .router
            .route_to(addr("alice@p.user"), "bot@p.agent", "hi", "x")
            .unwrap_err();
        assert!(matches!(err, RouteError::MailboxClosed(_)));
        assert!(sender_box.peek().unwrap().is_bounce());
    }

    #[test]
    fn test_full_mailbox_bounces() {
        let f = fixture();
        let sender_box = f.directory.register_sink(addr("alice@p.user"), None).unwrap();
        f.directory.register_sink(addr("bot@p.agent"), Some(1)).unwrap();

        let from = addr("alice@p.user");
        f.router.route_to(from.clone(), "bot@p.agent", "1", "").unwrap();
        let err = f.router.route_to(from, "bot@p.agent", "2", "").unwrap_err();

        assert!(matches!(err, RouteError::MailboxFull { capacity: 1, .. }));
        assert_eq!(
            sender_box.peek().unwrap().headers.get(header::BOUNCE_REASON),
            Some("mailbox_full")
        );
    }

    #[test]
    fn test_bounce_is_never_bounced() {
        let f = fixture();
        // Neither side is registered; routing must not recurse
        let msg = Message::new(addr("a@p.agent"), addr("b@p.agent"), "x", "");
        assert!(f.router.route(msg).is_err());
        assert!(f.directory.is_empty());
    }

    #[test]
    fn test_malformed_raw_address() {
        let f = fixture();
        let err = f
            .router
            .route_to(addr("a@p.agent"), "not an address", "x", "")
            .unwrap_err();
        assert!(matches!(err, RouteError::Malformed(_)));
        assert_eq!(err.bounce_reason(), None);
    }

    #[test]
    fn test_delivery_wakes_idle_agent_once_per_burst() {
        let f = fixture();
        let address = addr("x@p.agent");
        let lifecycle = Arc::new(Lifecycle::new("x", Arc::clone(&f.events)));
        let mailbox = f
            .directory
            .register(address.clone(), None, lifecycle.clone())
            .unwrap();

        let mut events = f.events.subscribe();
        for i in 0..5 {
            let msg = Message::new(addr("y@p.agent"), address.clone(), "hi", format!("{i}"));
            f.router.route(msg).unwrap();
        }

        assert_eq!(lifecycle.state(), AgentState::Active);
        assert_eq!(mailbox.unread_count(), 5);

        let mut wakeups = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(
                event,
                RuntimeEvent::StateChanged {
                    from: AgentState::Idle,
                    to: AgentState::Active,
                    ..
                }
            ) {
                wakeups += 1;
            }
        }
        assert_eq!(wakeups, 1);
    }

    #[test]
    fn test_idle_agent_activates_with_one_unread() {
        let f = fixture();
        let x = addr("x@p.agent");
        let lifecycle = Arc::new(Lifecycle::new("x", Arc::clone(&f.events)));
        let mailbox = f.directory.register(x.clone(), None, lifecycle.clone()).unwrap();
        assert_eq!(lifecycle.state(), AgentState::Idle);

        f.router
            .route(Message::new(addr("y@p.agent"), x, "hi", "hello"))
            .unwrap();

        assert_eq!(lifecycle.state(), AgentState::Active);
        assert_eq!(mailbox.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_reply_resolves_correlation_and_is_delivered() {
        let directory = Arc::new(Directory::new());
        let tracker = Arc::new(CorrelationTracker::new());
        let router = Router::new(Arc::clone(&directory), Arc::new(EventBus::default()))
            .with_correlation(Arc::clone(&tracker));

        let boss_box = directory.register_sink(addr("boss@p.user"), None).unwrap();
        directory.register_sink(addr("worker@p.agent"), None).unwrap();

        let mut request = Message::new(addr("boss@p.user"), addr("worker@p.agent"), "do", "it");
        let handle = tracker
            .register_request(&mut request, Duration::from_secs(30))
            .unwrap();
        router.route(request.clone()).unwrap();

        let reply = Message::reply_to(&request, "done", "ok").with_priority(Priority::High);
        router.route(reply.clone()).unwrap();

        assert_eq!(handle.response().await.unwrap().id, reply.id);
        assert_eq!(boss_box.peek().unwrap().id, reply.id);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_undelivered_reply_leaves_request_open() {
        let directory = Arc::new(Directory::new());
        let tracker = Arc::new(CorrelationTracker::new());
        let router = Router::new(Arc::clone(&directory), Arc::new(EventBus::default()))
            .with_correlation(Arc::clone(&tracker));
        let boss_box = directory.register_sink(addr("boss@p.user"), None).unwrap();

        let mut request = Message::new(addr("boss@p.user"), addr("worker@p.agent"), "do", "it");
        let _handle = tracker
            .register_request(&mut request, Duration::from_secs(30))
            .unwrap();
        boss_box.close();

        let err = router
            .route(Message::reply_to(&request, "done", "ok"))
            .unwrap_err();
        assert!(matches!(err, RouteError::MailboxClosed(_)));
        assert_eq!(tracker.outstanding(), 1);
    }

    #[test]
    fn test_uncorrelated_reply_is_ordinary_mail() {
        let directory = Arc::new(Directory::new());
        let tracker = Arc::new(CorrelationTracker::new());
        let router = Router::new(Arc::clone(&directory), Arc::new(EventBus::default()))
            .with_correlation(tracker);
        let inbox = directory.register_sink(addr("boss@p.user"), None).unwrap();

        let stray = Message::new(addr("w@p.agent"), addr("boss@p.user"), "re", "late")
            .with_header(header::IN_REPLY_TO, "nobody-asked");
        assert!(router.route(stray).unwrap().delivered);
        assert_eq!(inbox.unread_count(), 1);
    }
}
