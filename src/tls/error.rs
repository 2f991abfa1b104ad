//! TLS error type.

use std::time::Duration;

use crate::pipeline::PipelineError;

/// Errors raised while building a TLS configuration or establishing a session.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Builder misuse or out-of-range value. Not retryable.
    #[error("invalid TLS configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The TLS engine could not materialize a context.
    #[error("failed to resolve TLS context: {0}")]
    ContextResolution(String),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[from] rustls::Error),

    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("connection closed during TLS handshake")]
    ClosedDuringHandshake,

    /// Client context used for a peer without a host name and no fallback configured.
    #[error("no server name available for TLS client")]
    MissingServerName,

    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("TLS I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl TlsError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        TlsError::InvalidConfiguration { reason: reason.into() }
    }
}
