//! Mail message types
//!
//! Defines the wire format for agent-to-agent and agent-to-user mail. The
//! runtime never interprets `subject` or `body`; only a reserved subset of
//! headers carries meaning (see [`header`]).

use super::Address;
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Reserved header names
pub mod header {
    /// Token linking a request to its eventual response
    pub const CORRELATION_ID: &str = "correlation-id";
    /// Reference to the request a message answers
    pub const IN_REPLY_TO: &str = "in-reply-to";
    /// Id of the message a bounce reports on
    pub const BOUNCE_OF: &str = "bounce-of";
    /// Machine-readable bounce reason
    pub const BOUNCE_REASON: &str = "bounce-reason";
}

/// Unique message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a new globally unique message ID
    pub fn new() -> Self {
        Self(format!("msg-{}", Uuid::new_v4()))
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery priority
///
/// Ordering is `Low < Normal < High < Urgent`. Priority selects the band a
/// message is queued in; within a band delivery is strictly FIFO.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// All priorities, most urgent first
    pub const DESCENDING: [Priority; 4] =
        [Priority::Urgent, Priority::High, Priority::Normal, Priority::Low];

    /// Band index, 0 being the most urgent
    pub(crate) fn band(self) -> usize {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

/// Ordered header map with unique keys
///
/// Inserting an existing key replaces its value in place, so the original
/// position is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of string headers")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    headers.insert(k, v);
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Why a message could not be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceReason {
    /// No mailbox is registered at the destination
    UnknownAddress,
    /// The destination mailbox belongs to a stopped agent
    MailboxClosed,
    /// The destination mailbox is at its configured capacity
    MailboxFull,
}

impl BounceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BounceReason::UnknownAddress => "unknown_address",
            BounceReason::MailboxClosed => "mailbox_closed",
            BounceReason::MailboxFull => "mailbox_full",
        }
    }
}

impl fmt::Display for BounceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete message envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID, preserved across re-delivery
    pub id: MessageId,

    /// Sender address (e.g., "planner@billing.agent")
    pub from: Address,

    /// Recipient address (e.g., "alice@billing.user")
    pub to: Address,

    pub subject: String,

    pub body: String,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,

    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message with normal priority
    pub fn new(
        from: Address,
        to: Address,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            from,
            to,
            subject: subject.into(),
            body: body.into(),
            priority: Priority::Normal,
            headers: Headers::new(),
            created_at: Utc::now(),
        }
    }

    /// Try to create a new message from raw string addresses
    pub fn try_new(
        from: impl AsRef<str>,
        to: impl AsRef<str>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, super::AddressError> {
        Ok(Self::new(
            from.as_ref().parse()?,
            to.as_ref().parse()?,
            subject,
            body,
        ))
    }

    /// Build a reply to `original`, addressed back to its sender
    ///
    /// The reply's `in-reply-to` header carries the original correlation
    /// token when present, otherwise the original message id.
    pub fn reply_to(
        original: &Message,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let reference = original
            .correlation_id()
            .map(str::to_string)
            .unwrap_or_else(|| original.id.as_str().to_string());

        Self::new(original.to.clone(), original.from.clone(), subject, body)
            .with_header(header::IN_REPLY_TO, reference)
    }

    /// Build the bounce for an undeliverable message
    ///
    /// Sent from the postmaster of the sender's scope back to the sender,
    /// referencing the original id in `bounce-of`.
    pub fn bounce(original: &Message, reason: BounceReason) -> Self {
        let body = format!(
            "Message {} to {} could not be delivered: {}",
            original.id, original.to, reason
        );

        Self::new(
            original.from.postmaster_of(),
            original.from.clone(),
            format!("Undeliverable: {}", original.subject),
            body,
        )
        .with_priority(original.priority)
        .with_header(header::BOUNCE_OF, original.id.as_str())
        .with_header(header::BOUNCE_REASON, reason.as_str())
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Set the correlation token
    pub fn with_correlation(self, token: impl Into<String>) -> Self {
        self.with_header(header::CORRELATION_ID, token)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get(header::CORRELATION_ID)
    }

    pub fn in_reply_to(&self) -> Option<&str> {
        self.headers.get(header::IN_REPLY_TO)
    }

    /// Id of the original message if this is a bounce
    pub fn bounce_of(&self) -> Option<&str> {
        self.headers.get(header::BOUNCE_OF)
    }

    pub fn is_bounce(&self) -> bool {
        self.headers.contains_key(header::BOUNCE_OF)
    }

    /// Check if this is addressed to a user session
    pub fn is_for_user(&self) -> bool {
        self.to.is_user()
    }

    /// Get the routing target for this message
    pub fn routing_target(&self) -> super::RoutingTarget {
        super::RoutingTarget::from_address(&self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::try_new("planner@billing.agent", "alice@billing.user", "hi", "hello").unwrap()
    }

    #[test]
    fn test_full_message_serialization() {
        let msg = sample()
            .with_priority(Priority::High)
            .with_header("x-trace", "abc")
            .with_correlation("tok-1");

        let json = serde_json::to_string_pretty(&msg).unwrap();
        assert!(json.contains("planner@billing.agent"));
        assert!(json.contains("alice@billing.user"));
        assert!(json.contains("\"high\""));

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
        assert!(parsed.is_for_user());
        assert_eq!(parsed.correlation_id(), Some("tok-1"));
    }

    #[test]
    fn test_headers_keep_insertion_order() {
        let mut headers = Headers::new();
        headers.insert("b", "1");
        headers.insert("a", "2");
        headers.insert("c", "3");
        assert_eq!(headers.insert("a", "4"), Some("2".to_string()));

        let keys: Vec<_> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(headers.get("a"), Some("4"));

        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"{"b":"1","a":"4","c":"3"}"#);
        let parsed: Headers = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, headers);
    }

    #[test]
    fn test_headers_remove() {
        let mut headers: Headers = [("x", "1"), ("y", "2")].into_iter().collect();
        assert_eq!(headers.remove("x"), Some("1".to_string()));
        assert_eq!(headers.remove("x"), None);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_message_id_generation() {
        let id1 = MessageId::new();
        let id2 = MessageId::new();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("msg-"));
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(Priority::DESCENDING[0].band(), 0);
    }

    #[test]
    fn test_reply_uses_correlation_token() {
        let request = sample().with_correlation("tok-9");
        let reply = Message::reply_to(&request, "re: hi", "ok");
        assert_eq!(reply.to, request.from);
        assert_eq!(reply.from, request.to);
        assert_eq!(reply.in_reply_to(), Some("tok-9"));

        let plain = sample();
        let reply = Message::reply_to(&plain, "re", "ok");
        assert_eq!(reply.in_reply_to(), Some(plain.id.as_str()));
    }

    #[test]
    fn test_bounce_references_original() {
        let original = sample().with_priority(Priority::Urgent);
        let bounce = Message::bounce(&original, BounceReason::UnknownAddress);

        assert!(bounce.is_bounce());
        assert_eq!(bounce.bounce_of(), Some(original.id.as_str()));
        assert_eq!(bounce.to, original.from);
        assert!(bounce.from.is_postmaster());
        assert_eq!(bounce.priority, Priority::Urgent);
        assert_eq!(
            bounce.headers.get(header::BOUNCE_REASON),
            Some("unknown_address")
        );
        assert_ne!(bounce.id, original.id);
    }
}
