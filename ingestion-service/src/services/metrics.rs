//! Prometheus export for the `metrics` facade.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Installs the Prometheus recorder and returns the handle used to render
/// `/metrics`. Call once at startup, before anything records a metric.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    ::metrics::describe_counter!(
        "messages_processed_total",
        "Inbound emails resolved, by final status"
    );
    ::metrics::describe_counter!(
        "movements_created_total",
        "Movements stored, by source"
    );
    ::metrics::describe_counter!(
        "mail_get_message_attempts_total",
        "Calls to the mail provider for a single message, including retries"
    );
    ::metrics::describe_histogram!(
        "message_processing_duration_seconds",
        "Time spent resolving one inbound email"
    );
    ::metrics::describe_histogram!(
        "notification_batch_duration_seconds",
        "Time spent dispatching one notification batch"
    );

    Ok(handle)
}
