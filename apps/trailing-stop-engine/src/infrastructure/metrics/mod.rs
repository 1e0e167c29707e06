//! Prometheus Metrics Module
//!
//! Exposes engine metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: ticks received, decode failures, reconnects, connection state
//! - **Stops**: trails and triggers
//! - **Exits**: submission outcomes and latency
//! - **Reconciliation**: corrected orders and lookup failures
//! - **Subscriptions**: subscribed instruments per broker
//!
//! Every series carries a `broker` label. Recording functions are no-ops
//! until `init_metrics` installs the recorder.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::order::Broker;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Errors installing the metrics exporter.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be built (e.g. listener bind failure).
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] BuildError),

    /// A global recorder is already installed.
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
}

/// Install the Prometheus recorder and serve `/metrics` on `port`.
///
/// Must be called from within the tokio runtime. Calling it again returns
/// the existing handle.
pub fn init_metrics(port: u16) -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "Prometheus exporter stopped");
        }
    });

    register_metrics();
    tracing::info!(port, "Prometheus metrics listening");
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed
    describe_counter!(
        "trailing_stop_ticks_received_total",
        "Total ticks decoded from broker feeds"
    );
    describe_counter!(
        "trailing_stop_tick_decode_errors_total",
        "Total feed messages dropped because they could not be decoded"
    );
    describe_counter!(
        "trailing_stop_feed_reconnects_total",
        "Total feed reconnection attempts"
    );
    describe_gauge!(
        "trailing_stop_feed_connected",
        "1 while the broker feed is connected"
    );

    // Stops
    describe_counter!(
        "trailing_stop_stops_trailed_total",
        "Total stop ratchets persisted"
    );
    describe_counter!(
        "trailing_stop_stops_triggered_total",
        "Total stop breaches that queued an exit order"
    );

    // Exits
    describe_counter!(
        "trailing_stop_exit_orders_total",
        "Exit order outcomes by result"
    );
    describe_histogram!(
        "trailing_stop_exit_submission_seconds",
        "Time from dequeue to final submission outcome"
    );

    // Reconciliation
    describe_counter!(
        "trailing_stop_reconciliation_updates_total",
        "Orders whose status was corrected from the broker"
    );
    describe_counter!(
        "trailing_stop_reconciliation_errors_total",
        "Per-order reconciliation lookup failures"
    );

    // Price refresh
    describe_counter!(
        "trailing_stop_price_polls_total",
        "Last-price quotes fetched over REST while a feed was down"
    );
    describe_counter!(
        "trailing_stop_price_poll_errors_total",
        "Per-order last-price poll failures"
    );

    // Subscriptions
    describe_gauge!(
        "trailing_stop_subscribed_instruments",
        "Instruments subscribed on the broker feed"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for exit order outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Broker accepted the exit order.
    Submitted,
    /// All attempts failed; order left `TRIGGERED`.
    Failed,
    /// No broker session; request discarded.
    Dropped,
}

impl ExitOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Failed => "failed",
            Self::Dropped => "dropped",
        }
    }
}

/// Record a decoded tick.
pub fn record_tick(broker: Broker) {
    counter!("trailing_stop_ticks_received_total", "broker" => broker.as_str()).increment(1);
}

/// Record a feed message that failed to decode.
pub fn record_decode_error(broker: Broker) {
    counter!("trailing_stop_tick_decode_errors_total", "broker" => broker.as_str()).increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_reconnect(broker: Broker) {
    counter!("trailing_stop_feed_reconnects_total", "broker" => broker.as_str()).increment(1);
}

/// Update the feed connection gauge.
pub fn set_feed_connected(broker: Broker, connected: bool) {
    gauge!("trailing_stop_feed_connected", "broker" => broker.as_str())
        .set(if connected { 1.0 } else { 0.0 });
}

/// Record a persisted stop ratchet.
pub fn record_trail(broker: Broker) {
    counter!("trailing_stop_stops_trailed_total", "broker" => broker.as_str()).increment(1);
}

/// Record a stop breach.
pub fn record_trigger(broker: Broker) {
    counter!("trailing_stop_stops_triggered_total", "broker" => broker.as_str()).increment(1);
}

/// Record the final outcome of an exit order.
pub fn record_exit(broker: Broker, outcome: ExitOutcome, elapsed: Duration) {
    counter!(
        "trailing_stop_exit_orders_total",
        "broker" => broker.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "trailing_stop_exit_submission_seconds",
        "broker" => broker.as_str()
    )
    .record(elapsed.as_secs_f64());
}

/// Record reconciliation results.
pub fn record_reconciliation(broker: Broker, updated: usize, errors: usize) {
    counter!("trailing_stop_reconciliation_updates_total", "broker" => broker.as_str())
        .increment(u64::try_from(updated).unwrap_or(u64::MAX));
    counter!("trailing_stop_reconciliation_errors_total", "broker" => broker.as_str())
        .increment(u64::try_from(errors).unwrap_or(u64::MAX));
}

/// Record one price refresh pass.
pub fn record_price_poll(broker: Broker, priced: usize, errors: usize) {
    counter!("trailing_stop_price_polls_total", "broker" => broker.as_str())
        .increment(u64::try_from(priced).unwrap_or(u64::MAX));
    counter!("trailing_stop_price_poll_errors_total", "broker" => broker.as_str())
        .increment(u64::try_from(errors).unwrap_or(u64::MAX));
}

/// Update the subscribed instrument count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(broker: Broker, count: usize) {
    gauge!("trailing_stop_subscribed_instruments", "broker" => broker.as_str()).set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_outcome_as_str() {
        assert_eq!(ExitOutcome::Submitted.as_str(), "submitted");
        assert_eq!(ExitOutcome::Failed.as_str(), "failed");
        assert_eq!(ExitOutcome::Dropped.as_str(), "dropped");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick(Broker::Zerodha);
        record_exit(Broker::Upstox, ExitOutcome::Failed, Duration::from_millis(5));
        set_subscriptions(Broker::Upstox, 3);
        assert!(get_metrics_handle().is_none());
    }
}
