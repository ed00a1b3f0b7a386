//! Prometheus metrics exposition
//!
//! - `eventsub_messages_total` (counter): labels `type`, `status`
//! - `eventsub_webhook_duration_seconds` (histogram): label `type`
//! - `eventsub_signature_failures_total` (counter)
//! - `relay_forwarded_total` (counter): label `outcome` (`delivered`, `dropped`)
//! - `eventsub_reconcile_runs_total` (counter): label `outcome`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const WEBHOOK_DURATION: &str = "eventsub_webhook_duration_seconds";
const DURATION_BUCKETS: &[f64] = &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(WEBHOOK_DURATION.to_string()), DURATION_BUCKETS)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The webhook duration renders as a histogram (`_bucket` lines) rather than
/// the exporter's default summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record one inbound webhook delivery.
pub fn record_message(kind: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "eventsub_messages_total",
        "type" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(WEBHOOK_DURATION, "type" => kind.to_string()).record(duration_secs);
}

pub fn record_signature_failure() {
    metrics::counter!("eventsub_signature_failures_total").increment(1);
}

/// Record whether a notification reached the relay consumer.
pub fn record_forward(delivered: bool) {
    let outcome = if delivered { "delivered" } else { "dropped" };
    metrics::counter!("relay_forwarded_total", "outcome" => outcome).increment(1);
}

/// Record a finished reconciliation run: `clean`, `partial` or `failed`.
pub fn record_reconcile(outcome: &'static str) {
    metrics::counter!("eventsub_reconcile_runs_total", "outcome" => outcome).increment(1);
}
