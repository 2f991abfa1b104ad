//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// TLS context, profile and timeouts.
    pub tls: TlsSettings,

    /// Client connection pool.
    pub pool: PoolConfig,

    /// Server-side listener (`serve`).
    pub listener: ListenerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Remote endpoints contacted by `probe`.
    pub targets: Vec<TargetConfig>,
}

/// Side of the handshake this process plays.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoleSetting {
    #[default]
    Client,
    Server,
}

/// Profile applied to the TLS context builder.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSetting {
    None,
    #[default]
    Tcp,
    H2,
}

/// TLS settings.
///
/// Timeouts are signed so that negative values reach validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsSettings {
    pub role: RoleSetting,

    pub profile: ProfileSetting,

    /// Handshake timeout in milliseconds. Unset uses the process default.
    pub handshake_timeout_ms: Option<i64>,

    pub close_notify_flush_timeout_ms: i64,

    pub close_notify_read_timeout_ms: i64,

    /// Trust anchors (PEM) for the client role.
    pub ca_path: Option<String>,

    /// Certificate chain (PEM) for the server role.
    pub cert_path: Option<String>,

    /// Private key (PEM) for the server role.
    pub key_path: Option<String>,

    /// Name to verify and send as SNI instead of the target host.
    pub server_name: Option<String>,

    /// Install wire logging in every pipeline.
    pub wiretap: bool,

    /// Add TLS record logging next to wire logging.
    pub debug: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            role: RoleSetting::Client,
            profile: ProfileSetting::Tcp,
            handshake_timeout_ms: None,
            close_notify_flush_timeout_ms: 3_000,
            close_notify_read_timeout_ms: 0,
            ca_path: None,
            cert_path: None,
            key_path: None,
            server_name: None,
            wiretap: false,
            debug: false,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool name used in metrics.
    pub name: String,

    /// Maximum connections per remote address.
    pub max_connections: usize,

    /// Maximum queued acquires per remote address; -1 for no limit.
    pub pending_acquire_max: i64,

    /// How long an acquire may wait for a free slot, in milliseconds.
    pub pending_acquire_timeout_ms: u64,

    /// Connect timeout (TCP + TLS) in milliseconds.
    pub connect_timeout_ms: u64,

    /// Register pool gauges.
    pub metrics_enabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "tlsgate".to_string(),
            max_connections: 16,
            pending_acquire_max: 32,
            pending_acquire_timeout_ms: 45_000,
            connect_timeout_ms: 30_000,
            metrics_enabled: false,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8443".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// `pretty` or `json`.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Remote endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Identifier for reports.
    pub name: String,

    /// `host:port`.
    pub address: String,
}
