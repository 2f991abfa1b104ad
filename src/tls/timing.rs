//! Handshake and close-notify timeouts.
//!
//! # Design Decisions
//! - Millisecond inputs are signed so that a negative value from a config file
//!   is reported as such instead of wrapping
//! - The process-wide handshake default is read once into [`TlsDefaults`] and
//!   passed explicitly to builders

use std::time::Duration;

use crate::tls::{HandshakeHandler, TlsError};

/// Environment variable overriding the default handshake timeout (milliseconds).
pub const HANDSHAKE_TIMEOUT_ENV: &str = "TLSGATE_SSL_HANDSHAKE_TIMEOUT";

pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CLOSE_NOTIFY_FLUSH_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_CLOSE_NOTIFY_READ_TIMEOUT_MS: u64 = 0;

/// Validated timeout triple applied to every handshake handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimingPolicy {
    handshake_timeout: Duration,
    close_notify_flush_timeout: Duration,
    close_notify_read_timeout: Duration,
}

impl TimingPolicy {
    /// Build from millisecond counts. Each must be `>= 0`.
    pub fn new(handshake_ms: i64, flush_ms: i64, read_ms: i64) -> Result<Self, TlsError> {
        Ok(Self {
            handshake_timeout: non_negative("handshake_timeout", handshake_ms)?,
            close_notify_flush_timeout: non_negative("close_notify_flush_timeout", flush_ms)?,
            close_notify_read_timeout: non_negative("close_notify_read_timeout", read_ms)?,
        })
    }

    pub fn from_durations(handshake: Duration, flush: Duration, read: Duration) -> Self {
        Self {
            handshake_timeout: handshake,
            close_notify_flush_timeout: flush,
            close_notify_read_timeout: read,
        }
    }

    /// Library defaults with the handshake timeout taken from `defaults`.
    pub fn with_defaults(defaults: TlsDefaults) -> Self {
        Self::from_durations(
            defaults.handshake_timeout,
            Duration::from_millis(DEFAULT_CLOSE_NOTIFY_FLUSH_TIMEOUT_MS),
            Duration::from_millis(DEFAULT_CLOSE_NOTIFY_READ_TIMEOUT_MS),
        )
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn close_notify_flush_timeout(&self) -> Duration {
        self.close_notify_flush_timeout
    }

    pub fn close_notify_read_timeout(&self) -> Duration {
        self.close_notify_read_timeout
    }

    /// Set all three timeouts on a handshake handler.
    pub fn apply(&self, handler: &mut dyn HandshakeHandler) {
        handler.set_handshake_timeout(self.handshake_timeout);
        handler.set_close_notify_flush_timeout(self.close_notify_flush_timeout);
        handler.set_close_notify_read_timeout(self.close_notify_read_timeout);
    }
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self::with_defaults(TlsDefaults::default())
    }
}

pub(crate) fn non_negative(field: &str, millis: i64) -> Result<Duration, TlsError> {
    u64::try_from(millis)
        .map(Duration::from_millis)
        .map_err(|_| TlsError::invalid(format!("{} must be >= 0 ms, got {}", field, millis)))
}

/// Process-wide defaults, captured once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsDefaults {
    pub handshake_timeout: Duration,
}

impl TlsDefaults {
    /// Read [`HANDSHAKE_TIMEOUT_ENV`] from the process environment.
    pub fn from_env() -> Result<Self, TlsError> {
        Self::from_override(std::env::var(HANDSHAKE_TIMEOUT_ENV).ok().as_deref())
    }

    /// Parse an optional override value. `None` or blank means library default.
    pub fn from_override(value: Option<&str>) -> Result<Self, TlsError> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(Self::default());
        };
        let millis: i64 = raw.parse().map_err(|_| {
            TlsError::invalid(format!("{} must be an integer millisecond count, got {:?}", HANDSHAKE_TIMEOUT_ENV, raw))
        })?;
        Ok(Self {
            handshake_timeout: non_negative(HANDSHAKE_TIMEOUT_ENV, millis)?,
        })
    }
}

impl Default for TlsDefaults {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(err: TlsError) -> String {
        match err {
            TlsError::InvalidConfiguration { reason } => reason,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_negative_triples_are_accepted() {
        let timing = TimingPolicy::new(0, 0, 0).unwrap();
        assert_eq!(timing.handshake_timeout(), Duration::ZERO);

        let timing = TimingPolicy::new(10_000, 3_000, 0).unwrap();
        assert_eq!(timing.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(timing.close_notify_flush_timeout(), Duration::from_secs(3));
        assert_eq!(timing.close_notify_read_timeout(), Duration::ZERO);
    }

    #[test]
    fn each_negative_member_is_rejected_by_name() {
        let r = reason(TimingPolicy::new(-1, 0, 0).unwrap_err());
        assert!(r.contains("handshake_timeout") && r.contains("-1"), "{r}");

        let r = reason(TimingPolicy::new(0, -5, 0).unwrap_err());
        assert!(r.contains("close_notify_flush_timeout") && r.contains("-5"), "{r}");

        let r = reason(TimingPolicy::new(0, 0, -7).unwrap_err());
        assert!(r.contains("close_notify_read_timeout") && r.contains("-7"), "{r}");
    }

    #[test]
    fn default_policy() {
        let timing = TimingPolicy::default();
        assert_eq!(timing.handshake_timeout(), Duration::from_millis(10_000));
        assert_eq!(timing.close_notify_flush_timeout(), Duration::from_millis(3_000));
        assert_eq!(timing.close_notify_read_timeout(), Duration::ZERO);
    }

    #[test]
    fn override_parsing() {
        assert_eq!(TlsDefaults::from_override(None).unwrap(), TlsDefaults::default());
        assert_eq!(TlsDefaults::from_override(Some("  ")).unwrap(), TlsDefaults::default());
        assert_eq!(
            TlsDefaults::from_override(Some("2500")).unwrap().handshake_timeout,
            Duration::from_millis(2500)
        );
        assert!(TlsDefaults::from_override(Some("-1")).is_err());
        assert!(TlsDefaults::from_override(Some("soon")).is_err());
    }

    #[test]
    fn with_defaults_uses_override() {
        let defaults = TlsDefaults { handshake_timeout: Duration::from_millis(42) };
        let timing = TimingPolicy::with_defaults(defaults);
        assert_eq!(timing.handshake_timeout(), Duration::from_millis(42));
        assert_eq!(timing.close_notify_flush_timeout(), Duration::from_millis(3_000));
    }
}
