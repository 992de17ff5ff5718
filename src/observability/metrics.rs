//! Metrics collection.
//!
//! # Metrics
//! - `httpl_dispatch_total` (counter): dispatches by scheme, status
//! - `httpl_dispatch_duration_seconds` (histogram): dispatch latency by scheme
//! - `httpl_bridge_messages_total` (counter): channel messages by direction
//! - `httpl_bridge_terminations_total` (counter): bridges terminated

use std::time::Instant;

pub fn record_dispatch(scheme: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "httpl_dispatch_total",
        "scheme" => scheme.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("httpl_dispatch_duration_seconds", "scheme" => scheme.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_bridge_message(direction: &'static str) {
    ::metrics::counter!("httpl_bridge_messages_total", "direction" => direction).increment(1);
}

pub fn record_bridge_termination() {
    ::metrics::counter!("httpl_bridge_terminations_total").increment(1);
}
