//! Prometheus metrics for the relay and discovery tasks

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{AppError, AppResult};

pub const DATAGRAMS_RECEIVED: &str = "metric_relay_datagrams_received_total";
pub const DATAGRAMS_MALFORMED: &str = "metric_relay_datagrams_malformed_total";
pub const DUPLICATES_DROPPED: &str = "metric_relay_duplicates_dropped_total";
pub const FORWARDS_SENT: &str = "metric_relay_forwards_sent_total";
pub const FORWARDS_FAILED: &str = "metric_relay_forwards_failed_total";
pub const REGISTRATIONS: &str = "metric_relay_registrations_total";
pub const PEERS_EXPIRED: &str = "metric_relay_peers_expired_total";
pub const REGISTRY_PEERS: &str = "metric_relay_registry_peers";

/// Install the global Prometheus recorder and return its render handle
pub fn install_recorder() -> AppResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::invalid_config(&format!("failed to install metrics recorder: {}", e)))?;

    describe_counter!(DATAGRAMS_RECEIVED, "Datagrams received on the relay socket");
    describe_counter!(DATAGRAMS_MALFORMED, "Datagrams dropped because they could not be decoded");
    describe_counter!(DUPLICATES_DROPPED, "Metric payloads identical to the previous one from the same source");
    describe_counter!(FORWARDS_SENT, "Metric payloads sent to peers");
    describe_counter!(FORWARDS_FAILED, "Failed sends to peers");
    describe_counter!(REGISTRATIONS, "Register messages handled by discovery");
    describe_counter!(PEERS_EXPIRED, "Peers removed by the expiry sweep");
    describe_gauge!(REGISTRY_PEERS, "Peers currently registered");

    Ok(handle)
}

pub fn record_received(channel: &'static str) {
    counter!(DATAGRAMS_RECEIVED, 1, "channel" => channel);
}

pub fn record_malformed(channel: &'static str) {
    counter!(DATAGRAMS_MALFORMED, 1, "channel" => channel);
}

pub fn record_duplicate() {
    counter!(DUPLICATES_DROPPED, 1);
}

pub fn record_fanout(sent: usize, failed: usize) {
    counter!(FORWARDS_SENT, sent as u64);
    counter!(FORWARDS_FAILED, failed as u64);
}

pub fn record_registration() {
    counter!(REGISTRATIONS, 1);
}

pub fn record_expired(count: usize) {
    counter!(PEERS_EXPIRED, count as u64);
}

pub fn set_registry_size(size: usize) {
    gauge!(REGISTRY_PEERS, size as f64);
}
