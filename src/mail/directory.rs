//! Process-wide address -> mailbox directory
//!
//! Lookups vastly outnumber registrations, so entries live behind a
//! read-write lock. Registration is insert-if-absent: a mailbox's identity
//! never changes once registered.

use super::{Address, Mailbox, RouteError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Wake hook signalled after mail is accepted into a mailbox
pub trait WakeSignal: Send + Sync {
    fn wake(&self);
}

/// A registered mailbox and the hook that wakes its owner
#[derive(Clone)]
pub struct DirectoryEntry {
    pub mailbox: Arc<Mailbox>,
    waker: Option<Arc<dyn WakeSignal>>,
}

impl DirectoryEntry {
    /// Signal the owner, if the entry has one
    pub fn wake(&self) {
        if let Some(waker) = &self.waker {
            waker.wake();
        }
    }

    /// Check if this is an external sink (no owning agent to wake)
    pub fn is_sink(&self) -> bool {
        self.waker.is_none()
    }
}

impl std::fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("address", self.mailbox.address())
            .field("sink", &self.is_sink())
            .finish()
    }
}

/// The address directory
#[derive(Debug, Default)]
pub struct Directory {
    entries: RwLock<HashMap<Address, DirectoryEntry>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent mailbox whose owner is woken through `waker`
    pub fn register(
        &self,
        address: Address,
        capacity: Option<usize>,
        waker: Arc<dyn WakeSignal>,
    ) -> Result<Arc<Mailbox>, RouteError> {
        self.insert(address, capacity, Some(waker))
    }

    /// Register a reserved external sink such as a user session
    pub fn register_sink(
        &self,
        address: Address,
        capacity: Option<usize>,
    ) -> Result<Arc<Mailbox>, RouteError> {
        self.insert(address, capacity, None)
    }

    fn insert(
        &self,
        address: Address,
        capacity: Option<usize>,
        waker: Option<Arc<dyn WakeSignal>>,
    ) -> Result<Arc<Mailbox>, RouteError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&address) {
            return Err(RouteError::AlreadyRegistered(address));
        }

        let mailbox = Arc::new(Mailbox::with_capacity(address.clone(), capacity));
        debug!(%address, sink = waker.is_none(), "Registered mailbox");
        entries.insert(
            address,
            DirectoryEntry {
                mailbox: Arc::clone(&mailbox),
                waker,
            },
        );
        crate::metrics::set_registered_mailboxes(entries.len());
        Ok(mailbox)
    }

    /// Remove an address, returning its mailbox
    pub fn unregister(&self, address: &Address) -> Option<Arc<Mailbox>> {
        let mut entries = self.entries.write();
        let removed = entries.remove(address).map(|entry| entry.mailbox);
        if removed.is_some() {
            debug!(%address, "Unregistered mailbox");
            crate::metrics::set_registered_mailboxes(entries.len());
        }
        removed
    }

    /// Remove `mailbox` only if it is still the one registered at its address
    ///
    /// A mailbox registered later at the same address is left alone.
    pub fn unregister_mailbox(&self, mailbox: &Arc<Mailbox>) -> bool {
        let mut entries = self.entries.write();
        let address = mailbox.address();
        let current = entries
            .get(address)
            .is_some_and(|entry| Arc::ptr_eq(&entry.mailbox, mailbox));
        if current {
            entries.remove(address);
            debug!(%address, "Unregistered mailbox");
            crate::metrics::set_registered_mailboxes(entries.len());
        }
        current
    }

    pub fn lookup(&self, address: &Address) -> Option<DirectoryEntry> {
        self.entries.read().get(address).cloned()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.entries.read().contains_key(address)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWaker(AtomicUsize);

    impl WakeSignal for CountingWaker {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let directory = Directory::new();
        let addr = Address::agent("bot", "proj").unwrap();
        let waker = Arc::new(CountingWaker::default());

        let mailbox = directory
            .register(addr.clone(), None, waker.clone())
            .unwrap();
        let entry = directory.lookup(&addr).unwrap();
        assert!(Arc::ptr_eq(&mailbox, &entry.mailbox));
        assert!(!entry.is_sink());

        entry.wake();
        assert_eq!(waker.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_is_insert_if_absent() {
        let directory = Directory::new();
        let addr = Address::user("alice", "proj").unwrap();
        let first = directory.register_sink(addr.clone(), None).unwrap();

        let dup = directory.register_sink(Address::user("ALICE", "proj").unwrap(), None);
        assert!(matches!(dup, Err(RouteError::AlreadyRegistered(_))));

        // The original mailbox is untouched
        let entry = directory.lookup(&addr).unwrap();
        assert!(Arc::ptr_eq(&first, &entry.mailbox));
        assert!(entry.is_sink());
    }

    #[test]
    fn test_unregister() {
        let directory = Directory::new();
        let addr = Address::agent("bot", "proj").unwrap();
        directory.register_sink(addr.clone(), Some(4)).unwrap();
        assert_eq!(directory.len(), 1);

        let mailbox = directory.unregister(&addr).unwrap();
        assert_eq!(mailbox.capacity(), Some(4));
        assert!(directory.lookup(&addr).is_none());
        assert!(directory.unregister(&addr).is_none());
        assert!(directory.is_empty());
    }

    #[test]
    fn test_unregister_mailbox_ignores_replacement() {
        let directory = Directory::new();
        let addr = Address::agent("bot", "proj").unwrap();
        let old = directory.register_sink(addr.clone(), None).unwrap();
        assert!(directory.unregister_mailbox(&old));

        let new = directory.register_sink(addr.clone(), None).unwrap();
        assert!(!directory.unregister_mailbox(&old));
        let entry = directory.lookup(&addr).unwrap();
        assert!(Arc::ptr_eq(&new, &entry.mailbox));
    }

    #[test]
    fn test_concurrent_registration_has_one_winner() {
        let directory = Arc::new(Directory::new());
        let addr = Address::agent("contested", "proj").unwrap();

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let directory = Arc::clone(&directory);
                    let addr = addr.clone();
                    scope.spawn(move || directory.register_sink(addr, None).is_ok() as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(winners, 1);
        assert_eq!(directory.len(), 1);
    }
}
