//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms via the metrics facade)
//!
//! Per connection:
//!     ChannelMetricsHandler (pipeline) → ChannelMetricsRecorder
//!     HandshakeTimingObserver → ChannelMetricsRecorder::record_tls_handshake_time
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Connection id flows through all log events of a connection
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use self::metrics::{init_metrics, ChannelMetricsRecorder, MetricsRecorder};
