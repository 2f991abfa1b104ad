//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the per-connection recorder contract used by the pipeline
//! - Record TLS handshake time, connect time and payload bytes
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `tlsgate_tls_handshake_time_seconds` (histogram): by remote_address, status
//! - `tlsgate_connect_time_seconds` (histogram): by remote_address, status
//! - `tlsgate_data_received_bytes` (counter): by remote_address
//! - `tlsgate_data_sent_bytes` (counter): by remote_address
//! - `tlsgate_pool_*` (gauges): see `pool::registrar`
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; nothing is recorded
//!   until an exporter is installed
//! - Handshake status is `success` or `error`

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::RemoteAddress;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

pub const TLS_HANDSHAKE_TIME: &str = "tlsgate_tls_handshake_time_seconds";
pub const CONNECT_TIME: &str = "tlsgate_connect_time_seconds";
pub const DATA_RECEIVED: &str = "tlsgate_data_received_bytes";
pub const DATA_SENT: &str = "tlsgate_data_sent_bytes";

/// Sink for per-connection measurements.
pub trait ChannelMetricsRecorder: Send + Sync {
    /// `status` is [`STATUS_SUCCESS`] or [`STATUS_ERROR`].
    fn record_tls_handshake_time(&self, remote: &RemoteAddress, elapsed: Duration, status: &str);

    fn record_connect_time(&self, _remote: &RemoteAddress, _elapsed: Duration, _status: &str) {}

    fn record_data_received(&self, _remote: &RemoteAddress, _bytes: usize) {}

    fn record_data_sent(&self, _remote: &RemoteAddress, _bytes: usize) {}
}

/// [`ChannelMetricsRecorder`] backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl ChannelMetricsRecorder for MetricsRecorder {
    fn record_tls_handshake_time(&self, remote: &RemoteAddress, elapsed: Duration, status: &str) {
        metrics::histogram!(
            TLS_HANDSHAKE_TIME,
            "remote_address" => remote.to_string(),
            "status" => status.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    fn record_connect_time(&self, remote: &RemoteAddress, elapsed: Duration, status: &str) {
        metrics::histogram!(
            CONNECT_TIME,
            "remote_address" => remote.to_string(),
            "status" => status.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    fn record_data_received(&self, remote: &RemoteAddress, bytes: usize) {
        metrics::counter!(DATA_RECEIVED, "remote_address" => remote.to_string()).increment(bytes as u64);
    }

    fn record_data_sent(&self, remote: &RemoteAddress, bytes: usize) {
        metrics::counter!(DATA_SENT, "remote_address" => remote.to_string()).increment(bytes as u64);
    }
}

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}
