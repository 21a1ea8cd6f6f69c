//! Prometheus metrics for the bus and the queue.

use crate::error::MessagingError;
use crate::job::JobStatus;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), MessagingError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            MessagingError::Config(format!("failed to install Prometheus recorder: {}", e))
        })?;
        info!("Prometheus metrics initialized");
        Ok::<_, MessagingError>(handle)
    })?;
    Ok(())
}

/// Render metrics in Prometheus text format, empty before [`init_metrics`].
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_default()
}

pub(crate) fn message_published(channel: &str) {
    counter!("messaging_messages_published_total", "channel" => channel.to_string()).increment(1);
}

pub(crate) fn deliveries(channel: &str, delivered: usize, failed: usize) {
    counter!("messaging_deliveries_total", "channel" => channel.to_string())
        .increment(delivered as u64);
    if failed > 0 {
        counter!("messaging_delivery_failures_total", "channel" => channel.to_string())
            .increment(failed as u64);
    }
}

pub(crate) fn job_enqueued(job_type: &str) {
    counter!("messaging_jobs_enqueued_total", "job_type" => job_type.to_string()).increment(1);
}

pub(crate) fn job_finished(job_type: &str, status: JobStatus, duration: Option<Duration>) {
    counter!(
        "messaging_jobs_finished_total",
        "job_type" => job_type.to_string(),
        "status" => status.as_str()
    )
    .increment(1);

    if let Some(duration) = duration {
        histogram!("messaging_job_duration_seconds", "job_type" => job_type.to_string())
            .record(duration.as_secs_f64());
    }
}

pub(crate) fn queue_depth(prefix: &str, depth: usize) {
    gauge!("messaging_queue_depth", "queue" => prefix.to_string()).set(depth as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        message_published("ALX channel");
        deliveries("ALX channel", 2, 1);
        job_enqueued("push_notification_code");
        job_finished("push_notification_code", JobStatus::Completed, Some(Duration::from_millis(3)));
        queue_depth("q", 0);
    }

    #[test]
    fn test_render_before_init_is_empty() {
        if PROMETHEUS_HANDLE.get().is_none() {
            assert!(render_metrics().is_empty());
        }
    }
}
