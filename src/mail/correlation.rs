//! Request/response correlation
//!
//! Tracks outstanding requests by correlation token with a time-to-live:
//! - Requesters register a token and get a [`CorrelationHandle`]
//! - A routed message whose `in-reply-to` matches resolves the handle
//! - Entries expire after their TTL whether or not a response arrived
//!
//! Correlation is an optimization layer: responses are always delivered to
//! their addressed mailbox as ordinary mail as well.
//!
//! # Example
//!
//! ```
//! use mailroom::mail::CorrelationTracker;
//! use std::time::Duration;
//!
//! let tracker = CorrelationTracker::new();
//! let handle = tracker.register("tok-1", Duration::from_secs(30)).unwrap();
//! assert_eq!(handle.token(), "tok-1");
//! assert_eq!(tracker.outstanding(), 1);
//! ```

use super::Message;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Correlation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("correlation token '{0}' is already outstanding")]
    DuplicateToken(String),
}

struct Pending {
    expires_at: DateTime<Utc>,
    responder: oneshot::Sender<Message>,
}

impl Pending {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Handle to one outstanding request
#[derive(Debug)]
pub struct CorrelationHandle {
    token: String,
    expires_at: DateTime<Utc>,
    receiver: oneshot::Receiver<Message>,
}

impl CorrelationHandle {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Wait for the response
    ///
    /// Returns `None` once the registration expires or is cancelled.
    pub async fn response(self) -> Option<Message> {
        self.receiver.await.ok()
    }

    /// Take the response if it has already arrived
    pub fn try_response(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}

/// In-memory correlation tracker
#[derive(Default)]
pub struct CorrelationTracker {
    pending: Mutex<HashMap<String, Pending>>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outstanding request under `token`
    ///
    /// An expired registration under the same token is replaced; a live one
    /// is an error.
    pub fn register(
        &self,
        token: impl Into<String>,
        ttl: Duration,
    ) -> Result<CorrelationHandle, CorrelationError> {
        let token = token.into();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::milliseconds(ttl.as_millis() as i64);

        let mut pending = self.pending.lock();
        if let Some(existing) = pending.get(&token) {
            if !existing.is_expired_at(now) {
                return Err(CorrelationError::DuplicateToken(token));
            }
        }

        let (responder, receiver) = oneshot::channel();
        pending.insert(
            token.clone(),
            Pending {
                expires_at,
                responder,
            },
        );
        crate::metrics::set_outstanding_correlations(pending.len());

        Ok(CorrelationHandle {
            token,
            expires_at,
            receiver,
        })
    }

    /// Stamp a fresh token into `message` and register it
    pub fn register_request(
        &self,
        message: &mut Message,
        ttl: Duration,
    ) -> Result<CorrelationHandle, CorrelationError> {
        let token = format!("corr-{}", Uuid::new_v4());
        let handle = self.register(token.clone(), ttl)?;
        message
            .headers
            .insert(super::message::header::CORRELATION_ID, token);
        Ok(handle)
    }

    /// Match a response against an outstanding registration
    ///
    /// Returns true if a live registration existed. The registration is
    /// consumed either way.
    pub fn resolve(&self, token: &str, response: &Message) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            let entry = pending.remove(token);
            crate::metrics::set_outstanding_correlations(pending.len());
            entry
        };

        match entry {
            Some(entry) if !entry.is_expired_at(Utc::now()) => {
                debug!(token, response_id = %response.id, "Correlated response");
                // The requester may have stopped waiting; the match still counts
                let _ = entry.responder.send(response.clone());
                true
            }
            _ => false,
        }
    }

    /// Drop a registration without a response
    pub fn cancel(&self, token: &str) -> bool {
        let mut pending = self.pending.lock();
        let removed = pending.remove(token).is_some();
        crate::metrics::set_outstanding_correlations(pending.len());
        removed
    }

    /// Remove every registration past its TTL at `now`
    ///
    /// Returns the number of registrations removed.
    pub fn expire_sweep(&self, now: DateTime<Utc>) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - pending.len();
        crate::metrics::set_outstanding_correlations(pending.len());
        removed
    }

    pub fn is_outstanding(&self, token: &str) -> bool {
        self.pending.lock().contains_key(token)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }
}

impl std::fmt::Debug for CorrelationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTracker")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> Message {
        Message::try_new("worker@proj.agent", "boss@proj.agent", "re", "done").unwrap()
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let tracker = CorrelationTracker::new();
        let handle = tracker.register("tok", Duration::from_secs(60)).unwrap();

        let reply = response();
        assert!(tracker.resolve("tok", &reply));
        assert_eq!(tracker.outstanding(), 0);

        let received = handle.response().await.unwrap();
        assert_eq!(received.id, reply.id);
    }

    #[test]
    fn test_resolve_unknown_token() {
        let tracker = CorrelationTracker::new();
        assert!(!tracker.resolve("missing", &response()));
    }

    #[test]
    fn test_resolve_only_once() {
        let tracker = CorrelationTracker::new();
        let _handle = tracker.register("tok", Duration::from_secs(60)).unwrap();
        assert!(tracker.resolve("tok", &response()));
        assert!(!tracker.resolve("tok", &response()));
    }

    #[test]
    fn test_duplicate_token() {
        let tracker = CorrelationTracker::new();
        let _handle = tracker.register("tok", Duration::from_secs(60)).unwrap();
        assert_eq!(
            tracker.register("tok", Duration::from_secs(60)).unwrap_err(),
            CorrelationError::DuplicateToken("tok".to_string())
        );
    }

    #[test]
    fn test_expired_token_can_be_reused() {
        let tracker = CorrelationTracker::new();
        let _old = tracker.register("tok", Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(tracker.register("tok", Duration::from_secs(60)).is_ok());
    }

    #[tokio::test]
    async fn test_expire_sweep() {
        let tracker = CorrelationTracker::new();
        let short = tracker.register("short", Duration::from_secs(1)).unwrap();
        let _long = tracker.register("long", Duration::from_secs(3600)).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(10);
        assert_eq!(tracker.expire_sweep(later), 1);
        assert!(!tracker.is_outstanding("short"));
        assert!(tracker.is_outstanding("long"));

        // Waiters on an expired registration see no response
        assert!(short.response().await.is_none());
    }

    #[test]
    fn test_resolve_after_expiry_is_false() {
        let tracker = CorrelationTracker::new();
        let _handle = tracker.register("tok", Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!tracker.resolve("tok", &response()));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_register_request_stamps_header() {
        let tracker = CorrelationTracker::new();
        let mut request = response();
        let mut handle = tracker
            .register_request(&mut request, Duration::from_secs(5))
            .unwrap();

        assert_eq!(request.correlation_id(), Some(handle.token()));
        assert!(handle.try_response().is_none());

        assert!(tracker.cancel(handle.token()));
        assert!(!tracker.is_outstanding(handle.token()));
    }
}
