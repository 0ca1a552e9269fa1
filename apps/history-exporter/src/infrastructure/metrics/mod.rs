//! Prometheus Metrics Module
//!
//! Application metrics exposed in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames by state, malformed frames
//! - **Subscriptions**: subscriptions opened by kind, unmatched payloads
//! - **Events**: events published and handler failures by topic; pages
//!   fetched are the events published on the `timeline.transactions` topic
//!
//! # Integration
//!
//! When a port is configured the exporter serves `/metrics` over HTTP for the
//! lifetime of the process. Recording without an installed recorder is a no-op.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::events::Topic;
use crate::domain::subscription::SubscriptionKind;
use crate::infrastructure::stream::FrameState;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder with an HTTP scrape listener on `port`.
///
/// A port of 0 disables the exporter. Calling this more than once is a no-op.
///
/// # Errors
///
/// Returns an error if the recorder or the listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    if port == 0 || INSTALLED.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()?;

    register_metrics();
    let _ = INSTALLED.set(());
    tracing::info!(port, "Prometheus exporter listening");
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "history_exporter_frames_received_total",
        "Inbound frames by state"
    );
    describe_counter!(
        "history_exporter_malformed_frames_total",
        "Inbound frames that failed to decode"
    );
    describe_counter!(
        "history_exporter_subscriptions_total",
        "Subscriptions opened by kind"
    );
    describe_counter!(
        "history_exporter_unmatched_payloads_total",
        "Payloads dropped because no subscription was registered"
    );
    describe_counter!(
        "history_exporter_events_published_total",
        "Events published on the event bus by topic"
    );
    describe_counter!(
        "history_exporter_handler_failures_total",
        "Event handler failures by topic"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an inbound frame.
pub fn record_frame_received(state: &FrameState) {
    counter!(
        "history_exporter_frames_received_total",
        "state" => state.as_str()
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_malformed_frame() {
    counter!("history_exporter_malformed_frames_total").increment(1);
}

/// Record a subscription sent to the server.
pub fn record_subscription_opened(kind: SubscriptionKind) {
    counter!(
        "history_exporter_subscriptions_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a payload dropped for lack of a subscriber.
pub fn record_unmatched_payload() {
    counter!("history_exporter_unmatched_payloads_total").increment(1);
}

/// Record an event published on the bus.
pub fn record_event_published(topic: Topic) {
    counter!(
        "history_exporter_events_published_total",
        "topic" => topic.as_str()
    )
    .increment(1);
}

/// Record a failed event handler invocation.
pub fn record_handler_failure(topic: Topic) {
    counter!(
        "history_exporter_handler_failures_total",
        "topic" => topic.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_port_installs_nothing() {
        assert!(init_metrics(0).is_ok());
        assert!(INSTALLED.get().is_none());
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received(&FrameState::Data);
        record_frame_received(&FrameState::Unknown("Z".to_string()));
        record_malformed_frame();
        record_subscription_opened(SubscriptionKind::Instrument);
        record_event_published(Topic::Instrument);
        record_handler_failure(Topic::TransactionDetail);
    }
}
