//! Prometheus metrics

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder; idempotent
pub fn init_metrics() -> Option<PrometheusHandle> {
    let handle = PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;

        describe_counter!("voicebridge_offers_total", "Offers accepted or rejected");
        describe_counter!(
            "voicebridge_candidates_total",
            "Remote ICE candidates applied or skipped"
        );
        describe_gauge!("voicebridge_connections", "Live connection count");
        describe_histogram!(
            "voicebridge_offer_duration_seconds",
            "Offer handling latency including ICE gathering"
        );

        Ok::<_, metrics_exporter_prometheus::BuildError>(handle)
    });

    match handle {
        Ok(h) => Some(h.clone()),
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    }
}

/// Serve the metrics text format
pub async fn metrics_handler() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_default()
}

pub fn record_offer(accepted: bool, duration_secs: f64, live_connections: usize) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    counter!("voicebridge_offers_total", "outcome" => outcome).increment(1);
    histogram!("voicebridge_offer_duration_seconds").record(duration_secs);
    gauge!("voicebridge_connections").set(live_connections as f64);
}

pub fn record_candidate_batch(applied: u64, skipped: u64) {
    counter!("voicebridge_candidates_total", "outcome" => "applied").increment(applied);
    counter!("voicebridge_candidates_total", "outcome" => "skipped").increment(skipped);
}
