//! Stage names.
//!
//! Stages are addressed by a closed set of names so that a misspelled marker
//! cannot silently turn an insertion into a no-op.

use std::fmt;

/// Name of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    /// Proxy protocol handler (SOCKS/HTTP CONNECT), always closest to the wire.
    ProxyHandler,
    /// TLS handshake handler.
    SslHandler,
    /// One-shot handshake timing observer.
    SslReader,
    /// TLS-level debug logging, only installed next to wire logging.
    SslLoggingHandler,
    /// Wire logging.
    LoggingHandler,
    /// Connection metrics; holds the metrics recorder.
    ChannelMetricsHandler,
    /// Application protocol codec.
    Codec,
    /// Application handler at the end of the chain.
    Application,
}

impl StageName {
    /// Stable identifier used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::ProxyHandler => "proxy",
            StageName::SslHandler => "ssl",
            StageName::SslReader => "ssl-reader",
            StageName::SslLoggingHandler => "ssl-logging",
            StageName::LoggingHandler => "logging",
            StageName::ChannelMetricsHandler => "channel-metrics",
            StageName::Codec => "codec",
            StageName::Application => "application",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
