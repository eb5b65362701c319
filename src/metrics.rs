//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a start request and how it ended
pub fn record_service_start(service: &str, outcome: &'static str) {
    metrics::counter!("vllm_manager_service_starts_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a stop request and how it ended
pub fn record_service_stop(service: &str, outcome: &'static str) {
    metrics::counter!("vllm_manager_service_stops_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a status query that ended in the error state
pub fn record_status_error(service: &str) {
    metrics::counter!("vllm_manager_status_errors_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Update the number of services observed running
pub fn update_running_count(count: usize) {
    metrics::gauge!("vllm_manager_services_running").set(count as f64);
}
