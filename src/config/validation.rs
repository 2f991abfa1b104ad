//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts >= 0, limits > 0, addresses parse)
//! - Check that the PEM material required by the TLS role is configured
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{GatewayConfig, RoleSetting};
use crate::net::RemoteAddress;

/// A single semantic problem, tagged with the offending field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let tls = &config.tls;
    let timeouts = [
        ("tls.handshake_timeout_ms", tls.handshake_timeout_ms),
        ("tls.close_notify_flush_timeout_ms", Some(tls.close_notify_flush_timeout_ms)),
        ("tls.close_notify_read_timeout_ms", Some(tls.close_notify_read_timeout_ms)),
    ];
    for (field, value) in timeouts {
        if let Some(ms) = value.filter(|ms| *ms < 0) {
            errors.push(ValidationError::new(field, format!("must be >= 0, got {}", ms)));
        }
    }

    match tls.role {
        RoleSetting::Client => {
            if tls.ca_path.is_none() {
                errors.push(ValidationError::new("tls.ca_path", "required for the client role"));
            }
        }
        RoleSetting::Server => {
            if tls.cert_path.is_none() {
                errors.push(ValidationError::new("tls.cert_path", "required for the server role"));
            }
            if tls.key_path.is_none() {
                errors.push(ValidationError::new("tls.key_path", "required for the server role"));
            }
        }
    }

    let pool = &config.pool;
    if pool.name.trim().is_empty() {
        errors.push(ValidationError::new("pool.name", "must not be empty"));
    }
    if pool.max_connections == 0 {
        errors.push(ValidationError::new("pool.max_connections", "must be > 0"));
    }
    if pool.pending_acquire_max == 0 || pool.pending_acquire_max < -1 {
        errors.push(ValidationError::new(
            "pool.pending_acquire_max",
            format!("must be > 0 or -1 for no limit, got {}", pool.pending_acquire_max),
        ));
    }
    if pool.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("pool.connect_timeout_ms", "must be > 0"));
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }
    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {:?}", config.listener.bind_address),
        ));
    }

    let obs = &config.observability;
    if !matches!(obs.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("expected \"pretty\" or \"json\", got {:?}", obs.log_format),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", obs.metrics_address),
        ));
    }

    for (i, target) in config.targets.iter().enumerate() {
        if target.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("targets[{}].name", i), "must not be empty"));
        }
        if let RemoteAddress::Opaque(_) = RemoteAddress::parse(&target.address) {
            errors.push(ValidationError::new(
                format!("targets[{}].address", i),
                format!("expected host:port, got {:?}", target.address),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TargetConfig;

    fn valid() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.tls.ca_path = Some("ca.pem".into());
        config
    }

    fn fields(config: &GatewayConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect()
    }

    #[test]
    fn defaults_with_roots_are_valid() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn all_errors_are_reported() {
        let mut config = valid();
        config.tls.handshake_timeout_ms = Some(-1);
        config.tls.close_notify_read_timeout_ms = -2;
        config.pool.max_connections = 0;
        config.listener.bind_address = "nowhere".into();

        assert_eq!(
            fields(&config),
            vec![
                "tls.handshake_timeout_ms",
                "tls.close_notify_read_timeout_ms",
                "pool.max_connections",
                "listener.bind_address",
            ]
        );
    }

    #[test]
    fn server_role_needs_cert_and_key() {
        let mut config = valid();
        config.tls.role = RoleSetting::Server;
        assert_eq!(fields(&config), vec!["tls.cert_path", "tls.key_path"]);
    }

    #[test]
    fn pending_limit_accepts_minus_one() {
        let mut config = valid();
        config.pool.pending_acquire_max = -1;
        assert!(validate_config(&config).is_ok());

        config.pool.pending_acquire_max = -5;
        assert_eq!(fields(&config), vec!["pool.pending_acquire_max"]);
    }

    #[test]
    fn targets_need_host_and_port() {
        let mut config = valid();
        config.targets.push(TargetConfig {
            name: "a".into(),
            address: "localhost".into(),
        });
        assert_eq!(fields(&config), vec!["targets[0].address"]);
    }
}
