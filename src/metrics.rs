//! Prometheus metrics for the agent runtime
//!
//! Counters and gauges are registered once in the default registry; scrape
//! them with [`gather`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};

lazy_static! {
    /// Counter: routed messages by outcome (delivered, failed)
    pub static ref MESSAGES_ROUTED: CounterVec = register_counter_vec!(
        "mailroom_messages_routed_total",
        "Messages routed by outcome",
        &["outcome"]
    )
    .expect("Failed to create messages_routed metric");

    /// Counter: bounces by reason
    pub static ref BOUNCES: CounterVec = register_counter_vec!(
        "mailroom_bounces_total",
        "Undeliverable messages bounced to their sender",
        &["reason"]
    )
    .expect("Failed to create bounces metric");

    /// Counter: lifecycle transitions
    pub static ref STATE_TRANSITIONS: CounterVec = register_counter_vec!(
        "mailroom_state_transitions_total",
        "Agent lifecycle transitions",
        &["from", "to"]
    )
    .expect("Failed to create state_transitions metric");

    /// Counter: processing steps whose inference retries ran out
    pub static ref INFERENCE_FAILURES: Counter = register_counter!(
        "mailroom_inference_failures_total",
        "Processing steps abandoned after inference retries ran out"
    )
    .expect("Failed to create inference_failures metric");

    /// Gauge: registered mailboxes
    pub static ref REGISTERED_MAILBOXES: Gauge = register_gauge!(
        "mailroom_registered_mailboxes",
        "Mailboxes currently registered in the directory"
    )
    .expect("Failed to create registered_mailboxes metric");

    /// Gauge: outstanding correlations
    pub static ref OUTSTANDING_CORRELATIONS: Gauge = register_gauge!(
        "mailroom_outstanding_correlations",
        "Requests waiting for a correlated response"
    )
    .expect("Failed to create outstanding_correlations metric");
}

/// Increment routed message counter
pub fn record_routed(outcome: &str) {
    MESSAGES_ROUTED.with_label_values(&[outcome]).inc();
}

/// Increment bounce counter
pub fn record_bounce(reason: &str) {
    BOUNCES.with_label_values(&[reason]).inc();
}

/// Record a lifecycle transition
pub fn record_transition(from: &str, to: &str) {
    STATE_TRANSITIONS.with_label_values(&[from, to]).inc();
}

/// Increment inference failure counter
pub fn record_inference_failure() {
    INFERENCE_FAILURES.inc();
}

/// Set registered mailbox count
pub fn set_registered_mailboxes(count: usize) {
    REGISTERED_MAILBOXES.set(count as f64);
}

/// Set outstanding correlation count
pub fn set_outstanding_correlations(count: usize) {
    OUTSTANDING_CORRELATIONS.set(count as f64);
}

/// Gather all metrics in Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
