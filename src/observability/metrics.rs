//! Request metrics.
//!
//! # Metrics
//! - `safe_fetch_requests_total` (counter): completed requests by outcome
//!   (`success` or the error kind)
//! - `safe_fetch_request_duration_seconds` (histogram): time to the terminal
//!   result
//! - `safe_fetch_bytes` (histogram): per-request byte counts by channel
//! - `safe_fetch_redirects_total` (counter): redirects followed
//!
//! # Design Decisions
//! - Recorded once per request, after the terminal result exists
//! - Without an installed recorder every call is a no-op

use std::time::Instant;

use crate::accounting::{ByteStats, Channel};

/// Record the outcome and latency of one request.
pub fn record_outcome(outcome: &'static str, start: Instant) {
    metrics::counter!("safe_fetch_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("safe_fetch_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// Record the final byte counts of one request.
pub fn record_bytes(stats: &ByteStats) {
    for (channel, value) in [
        (Channel::Network, stats.network),
        (Channel::Encoded, stats.encoded),
        (Channel::Decoded, stats.decoded),
    ] {
        metrics::histogram!("safe_fetch_bytes", "channel" => channel.as_str()).record(value as f64);
    }
}

pub fn record_redirects(count: usize) {
    if count > 0 {
        metrics::counter!("safe_fetch_redirects_total").increment(count as u64);
    }
}
