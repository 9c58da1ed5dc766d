//! Prometheus metrics for the ChainSync relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

use crate::types::{ChainId, TransferStatus};

lazy_static! {
    // Block scanning metrics
    pub static ref BLOCKS_SCANNED: CounterVec = register_counter_vec!(
        "chainsync_blocks_scanned_total",
        "Total number of source-chain blocks scanned",
        &["chain"]
    ).unwrap();

    pub static ref WATCHER_CURSOR: GaugeVec = register_gauge_vec!(
        "chainsync_watcher_cursor",
        "Highest block fully handed to the relay coordinator",
        &["chain"]
    ).unwrap();

    pub static ref EVENTS_OBSERVED: CounterVec = register_counter_vec!(
        "chainsync_transfer_events_total",
        "TransferInitiated events observed",
        &["chain", "outcome"]
    ).unwrap();

    // Relay metrics
    pub static ref RELAYS: CounterVec = register_counter_vec!(
        "chainsync_relays_total",
        "Relay attempts by outcome",
        &["destination", "outcome"]
    ).unwrap();

    pub static ref RELAY_LATENCY: HistogramVec = register_histogram_vec!(
        "chainsync_relay_latency_seconds",
        "Time from relay start to confirmed destination receipt",
        &["destination"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    pub static ref RETRY_QUEUE_SIZE: Gauge = register_gauge!(
        "chainsync_relay_retry_queue",
        "Transfers waiting for a relay retry"
    ).unwrap();

    pub static ref PROCESSED_SET_SIZE: Gauge = register_gauge!(
        "chainsync_processed_set_size",
        "Transfer ids remembered as relayed"
    ).unwrap();

    // Ledger metrics
    pub static ref STATUS_TRANSITIONS: CounterVec = register_counter_vec!(
        "chainsync_status_transitions_total",
        "Transfer status transitions",
        &["from", "to", "result"]
    ).unwrap();

    // Proof metrics
    pub static ref PROOF_VERIFICATIONS: CounterVec = register_counter_vec!(
        "chainsync_proof_verifications_total",
        "Proof verifications by kind and result",
        &["kind", "result"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "chainsync_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "chainsync_up",
        "Whether the relayer is up and running"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: GaugeVec = register_gauge_vec!(
        "chainsync_last_successful_poll_timestamp",
        "Unix timestamp of last successful poll",
        &["chain"]
    ).unwrap();
}

/// Record a scanned block range
pub fn record_blocks_scanned(chain: ChainId, from_block: u64, to_block: u64) {
    let label = chain.to_string();
    BLOCKS_SCANNED
        .with_label_values(&[&label])
        .inc_by((to_block + 1 - from_block) as f64);
    WATCHER_CURSOR
        .with_label_values(&[&label])
        .set(to_block as f64);
}

/// Record an observed event
pub fn record_event(chain: ChainId, outcome: &str) {
    EVENTS_OBSERVED
        .with_label_values(&[&chain.to_string(), outcome])
        .inc();
}

/// Record a relay outcome
pub fn record_relay(destination: ChainId, outcome: &str) {
    RELAYS
        .with_label_values(&[&destination.to_string(), outcome])
        .inc();
}

/// Record relay latency
pub fn record_relay_latency(destination: ChainId, seconds: f64) {
    RELAY_LATENCY
        .with_label_values(&[&destination.to_string()])
        .observe(seconds);
}

/// Record a status transition attempt
pub fn record_transition(from: TransferStatus, to: TransferStatus, accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    STATUS_TRANSITIONS
        .with_label_values(&[from.as_str(), to.as_str(), result])
        .inc();
}

/// Record a proof verification
pub fn record_proof(kind: &str, result: &str) {
    PROOF_VERIFICATIONS.with_label_values(&[kind, result]).inc();
}

/// Record an error
pub fn record_error(chain: ChainId, error_type: &str) {
    ERRORS
        .with_label_values(&[&chain.to_string(), error_type])
        .inc();
}

/// Record last successful poll
pub fn record_successful_poll(chain: ChainId) {
    LAST_SUCCESSFUL_POLL
        .with_label_values(&[&chain.to_string()])
        .set(chrono::Utc::now().timestamp() as f64);
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
