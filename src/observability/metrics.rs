//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (decisions, denials, threats, violations)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track limiter and suspicious-table sizes
//!
//! # Metrics
//! - `shield_requests_total` (counter): security decisions by outcome
//! - `shield_denials_total` (counter): denials by reason
//! - `shield_threats_total` (counter): scanner findings by type and severity
//! - `shield_violations_total` (counter): violations recorded into the reputation store
//! - `shield_violations_dropped_total` (counter): violations shed because the writer queue was full
//! - `shield_auto_blacklist_total` (counter): automatic promotions to blacklist
//! - `shield_store_errors_total` (counter): reputation backend failures by operation
//! - `shield_rate_limit_entries` (gauge): tracked identifiers per limiter
//! - `shield_suspicious_entries` (gauge): DDoS suspicious table size
//! - `shield_check_duration_seconds` (histogram): pipeline latency
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed, so tests need no setup
//! - Label values are bounded enums, never client input

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::security::scanner::{Severity, ThreatType};

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_decision(decision: &'static str, start: Instant) {
    metrics::counter!("shield_requests_total", "decision" => decision).increment(1);
    metrics::histogram!("shield_check_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_denial(reason: &'static str) {
    metrics::counter!("shield_denials_total", "reason" => reason).increment(1);
}

pub fn record_threat(threat: ThreatType, severity: Severity) {
    metrics::counter!(
        "shield_threats_total",
        "type" => threat.as_str(),
        "severity" => severity.as_str()
    )
    .increment(1);
}

pub fn record_violation(violation_type: &str) {
    metrics::counter!("shield_violations_total", "type" => violation_type.to_string()).increment(1);
}

pub fn record_violation_dropped() {
    metrics::counter!("shield_violations_dropped_total").increment(1);
}

pub fn record_auto_blacklist() {
    metrics::counter!("shield_auto_blacklist_total").increment(1);
}

pub fn record_store_error(op: &'static str) {
    metrics::counter!("shield_store_errors_total", "op" => op).increment(1);
}

pub fn record_rate_limit_entries(limiter: &'static str, entries: usize) {
    metrics::gauge!("shield_rate_limit_entries", "limiter" => limiter).set(entries as f64);
}

pub fn record_suspicious_entries(entries: usize) {
    metrics::gauge!("shield_suspicious_entries").set(entries as f64);
}
