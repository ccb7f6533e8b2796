//! Per-address inbox
//!
//! A mailbox keeps one FIFO queue per priority band. Draining always takes
//! from the most urgent non-empty band, so urgent mail overtakes normal mail
//! but never other urgent mail.
//!
//! Deliveries arrive from many tasks while the owning agent drains; a single
//! mutex around the bands keeps every append atomic with respect to drains.

use super::{Address, Message, Priority};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Why a delivery was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RejectReason {
    /// The mailbox was closed because its owner stopped
    Closed,
    /// The mailbox holds `capacity` pending messages already
    Full { capacity: usize },
}

/// Outcome of [`Mailbox::deliver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub accepted: bool,
    pub reason: Option<RejectReason>,
}

impl DeliveryReceipt {
    fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    fn rejected(reason: RejectReason) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Default)]
struct Bands {
    queues: [VecDeque<Message>; 4],
    closed: bool,
}

impl Bands {
    fn pending(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    fn pop_next(&mut self) -> Option<Message> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }

    fn peek_next(&self) -> Option<&Message> {
        self.queues.iter().find_map(VecDeque::front)
    }
}

/// An ordered inbox owned by exactly one address
#[derive(Debug)]
pub struct Mailbox {
    address: Address,
    capacity: Option<usize>,
    bands: Mutex<Bands>,
    unread: AtomicUsize,
}

impl Mailbox {
    /// Create an unbounded mailbox
    pub fn new(address: Address) -> Self {
        Self::with_capacity(address, None)
    }

    /// Create a mailbox that refuses mail beyond `capacity` pending messages
    pub fn with_capacity(address: Address, capacity: Option<usize>) -> Self {
        Self {
            address,
            capacity,
            bands: Mutex::new(Bands::default()),
            unread: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Append a message to its priority band
    pub fn deliver(&self, message: Message) -> DeliveryReceipt {
        let mut bands = self.bands.lock();

        if bands.closed {
            return DeliveryReceipt::rejected(RejectReason::Closed);
        }
        if let Some(capacity) = self.capacity {
            if bands.pending() >= capacity {
                return DeliveryReceipt::rejected(RejectReason::Full { capacity });
            }
        }

        bands.queues[message.priority.band()].push_back(message);
        self.unread.fetch_add(1, Ordering::AcqRel);
        DeliveryReceipt::accepted()
    }

    /// Lazily take up to `max_count` pending messages, most urgent band first
    ///
    /// Each message is marked read as the iterator yields it; dropping the
    /// iterator early leaves the rest pending. Never blocks on new mail.
    pub fn drain(&self, max_count: usize) -> Drain<'_> {
        Drain {
            mailbox: self,
            remaining: max_count,
        }
    }

    /// Put messages taken by [`drain`](Self::drain) back at the head of
    /// their bands, preserving their order and ids
    ///
    /// Used when processing fails after the messages were taken. Ignores
    /// capacity and the closed flag since the messages were already accepted.
    pub fn restore(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        let count = messages.len();
        let mut bands = self.bands.lock();
        for message in messages.into_iter().rev() {
            bands.queues[message.priority.band()].push_front(message);
        }
        self.unread.fetch_add(count, Ordering::AcqRel);
    }

    /// Clone of the next message without consuming it
    pub fn peek(&self) -> Option<Message> {
        self.bands.lock().peek_next().cloned()
    }

    /// Number of pending messages
    pub fn unread_count(&self) -> usize {
        self.unread.load(Ordering::Acquire)
    }

    /// Pending messages in one priority band
    pub fn band_len(&self, priority: Priority) -> usize {
        self.bands.lock().queues[priority.band()].len()
    }

    /// Refuse all further deliveries
    ///
    /// Returns true if this call closed the mailbox. Pending messages stay
    /// drainable.
    pub fn close(&self) -> bool {
        let mut bands = self.bands.lock();
        !std::mem::replace(&mut bands.closed, true)
    }

    pub fn is_closed(&self) -> bool {
        self.bands.lock().closed
    }
}

/// Iterator returned by [`Mailbox::drain`]
pub struct Drain<'a> {
    mailbox: &'a Mailbox,
    remaining: usize,
}

impl Iterator for Drain<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        if self.remaining == 0 {
            return None;
        }

        let message = self.mailbox.bands.lock().pop_next()?;
        self.mailbox.unread.fetch_sub(1, Ordering::AcqRel);
        self.remaining -= 1;
        Some(message)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn owner() -> Address {
        Address::agent("owner", "test").unwrap()
    }

    fn msg(from: &str, body: impl Into<String>, priority: Priority) -> Message {
        Message::new(
            Address::agent(from, "test").unwrap(),
            owner(),
            "subject",
            body,
        )
        .with_priority(priority)
    }

    #[test]
    fn test_deliver_and_drain_fifo() {
        let mailbox = Mailbox::new(owner());
        for i in 0..3 {
            assert!(mailbox.deliver(msg("a", format!("{i}"), Priority::Normal)).accepted);
        }
        assert_eq!(mailbox.unread_count(), 3);

        let bodies: Vec<_> = mailbox.drain(10).map(|m| m.body).collect();
        assert_eq!(bodies, vec!["0", "1", "2"]);
        assert_eq!(mailbox.unread_count(), 0);
    }

    #[test]
    fn test_priority_bands() {
        let mailbox = Mailbox::new(owner());
        mailbox.deliver(msg("a", "low", Priority::Low));
        mailbox.deliver(msg("a", "normal-1", Priority::Normal));
        mailbox.deliver(msg("a", "urgent-1", Priority::Urgent));
        mailbox.deliver(msg("a", "normal-2", Priority::Normal));
        mailbox.deliver(msg("a", "urgent-2", Priority::Urgent));
        mailbox.deliver(msg("a", "high", Priority::High));

        let bodies: Vec<_> = mailbox.drain(usize::MAX).map(|m| m.body).collect();
        assert_eq!(
            bodies,
            vec!["urgent-1", "urgent-2", "high", "normal-1", "normal-2", "low"]
        );
    }

    #[test]
    fn test_drain_is_lazy_and_bounded() {
        let mailbox = Mailbox::new(owner());
        for i in 0..5 {
            mailbox.deliver(msg("a", format!("{i}"), Priority::Normal));
        }

        let mut drain = mailbox.drain(3);
        assert_eq!(drain.next().map(|m| m.body), Some("0".to_string()));
        assert_eq!(mailbox.unread_count(), 4);
        drop(drain);

        let rest: Vec<_> = mailbox.drain(3).map(|m| m.body).collect();
        assert_eq!(rest, vec!["1", "2", "3"]);
        assert_eq!(mailbox.unread_count(), 1);

        assert_eq!(mailbox.drain(0).count(), 0);
    }

    #[test]
    fn test_close_rejects_delivery() {
        let mailbox = Mailbox::new(owner());
        mailbox.deliver(msg("a", "kept", Priority::Normal));

        assert!(mailbox.close());
        assert!(!mailbox.close());
        assert!(mailbox.is_closed());

        let receipt = mailbox.deliver(msg("a", "late", Priority::Normal));
        assert!(!receipt.accepted);
        assert_eq!(receipt.reason, Some(RejectReason::Closed));

        // Already-accepted mail survives the close
        assert_eq!(mailbox.drain(10).count(), 1);
    }

    #[test]
    fn test_capacity() {
        let mailbox = Mailbox::with_capacity(owner(), Some(2));
        assert!(mailbox.deliver(msg("a", "1", Priority::Normal)).accepted);
        assert!(mailbox.deliver(msg("a", "2", Priority::Low)).accepted);

        let receipt = mailbox.deliver(msg("a", "3", Priority::Urgent));
        assert_eq!(receipt.reason, Some(RejectReason::Full { capacity: 2 }));

        mailbox.drain(1).for_each(drop);
        assert!(mailbox.deliver(msg("a", "3", Priority::Urgent)).accepted);
    }

    #[test]
    fn test_restore_preserves_ids_and_order() {
        let mailbox = Mailbox::new(owner());
        mailbox.deliver(msg("a", "1", Priority::Normal));
        mailbox.deliver(msg("a", "2", Priority::Normal));

        let taken: Vec<_> = mailbox.drain(10).collect();
        let ids: Vec<_> = taken.iter().map(|m| m.id.clone()).collect();
        mailbox.deliver(msg("a", "3", Priority::Normal));

        mailbox.restore(taken);
        assert_eq!(mailbox.unread_count(), 3);

        let again: Vec<_> = mailbox.drain(10).collect();
        assert_eq!(again[0].id, ids[0]);
        assert_eq!(again[1].id, ids[1]);
        assert_eq!(again[2].body, "3");
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mailbox = Mailbox::new(owner());
        assert!(mailbox.peek().is_none());
        mailbox.deliver(msg("a", "x", Priority::High));
        assert_eq!(mailbox.peek().map(|m| m.body), Some("x".to_string()));
        assert_eq!(mailbox.unread_count(), 1);
        assert_eq!(mailbox.band_len(Priority::High), 1);
    }

    #[test]
    fn test_concurrent_delivery_keeps_band_fifo() {
        let mailbox = Arc::new(Mailbox::new(owner()));
        let senders = 8;
        let per_sender = 200;

        std::thread::scope(|scope| {
            for s in 0..senders {
                let mailbox = Arc::clone(&mailbox);
                scope.spawn(move || {
                    for i in 0..per_sender {
                        let priority = Priority::DESCENDING[(s + i) % 4];
                        let from = format!("sender{s}");
                        assert!(mailbox.deliver(msg(&from, format!("{i}"), priority)).accepted);
                    }
                });
            }
        });

        let drained: Vec<_> = mailbox.drain(usize::MAX).collect();
        assert_eq!(drained.len(), senders * per_sender);
        assert_eq!(mailbox.unread_count(), 0);

        // Bands come out most urgent first
        let priorities: Vec<_> = drained.iter().map(|m| m.priority).collect();
        assert!(priorities.windows(2).all(|w| w[0] >= w[1]));

        // Within a band each sender's messages keep their send order
        for priority in Priority::DESCENDING {
            for s in 0..senders {
                let from = format!("sender{s}");
                let seq: Vec<usize> = drained
                    .iter()
                    .filter(|m| m.priority == priority && m.from.entity_id() == from)
                    .map(|m| m.body.parse().unwrap())
                    .collect();
                assert!(seq.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
