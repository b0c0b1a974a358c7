//! Request metrics
//!
//! Recorded through the `metrics` facade; without an installed recorder every
//! call is a no-op.
//!
//! - `queue_client_requests_total` (counter): labels `queue`, `outcome`
//! - `queue_client_request_duration_seconds` (histogram): label `queue`
//! - `queue_client_rotations_total` (counter): labels `queue`, `reason`
//! - `queue_client_transport_errors_total` (counter): labels `queue`, `kind`

/// Histogram name, exported so binaries can configure its buckets.
pub const REQUEST_DURATION_SECONDS: &str = "queue_client_request_duration_seconds";

/// Record how a `request` call ended and how long it took.
pub fn record_request(queue: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!("queue_client_requests_total", "queue" => queue.to_string(), "outcome" => outcome.to_string())
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "queue" => queue.to_string())
        .record(duration_secs);
}

/// Record a session leaving the client, labelled by how it was released.
pub fn record_rotation(queue: &str, reason: &str) {
    metrics::counter!("queue_client_rotations_total", "queue" => queue.to_string(), "reason" => reason.to_string())
        .increment(1);
}

/// Record a transport failure by kind.
pub fn record_transport_error(queue: &str, kind: &str) {
    metrics::counter!("queue_client_transport_errors_total", "queue" => queue.to_string(), "kind" => kind.to_string())
        .increment(1);
}
