//! TLS engine boundary and connection profiles.
//!
//! # Responsibilities
//! - Define the engine-facing traits (`ContextBuilder`, `TlsContext`, `HandshakeHandler`)
//! - Define the default profiles and how they rewrite a context builder
//!
//! # Design Decisions
//! - Profiles mutate a copy of the builder, never the caller's instance
//! - Builders expose a `fingerprint` so configurations built from equal
//!   inputs compare equal without comparing trait objects

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::net::SniTarget;
use crate::pipeline::Handler;
use crate::tls::TlsError;

/// Crypto backend of the TLS engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsBackend {
    /// Always compiled in (`ring`).
    Default,
    /// Platform-native backend (`aws-lc-rs`), present with the `aws-lc` feature.
    Native,
}

impl TlsBackend {
    pub fn is_available(self) -> bool {
        match self {
            TlsBackend::Default => true,
            TlsBackend::Native => cfg!(feature = "aws-lc"),
        }
    }

    /// ALPN is handled by the protocol layer, so any available backend supports it.
    pub fn supports_alpn(self) -> bool {
        self.is_available()
    }
}

/// How a requested cipher list is reconciled with what the backend supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherFilter {
    /// Use the list as given; unknown names fail context resolution.
    Identity,
    /// Keep only the names the backend supports.
    Supported,
}

/// Behavior when the protocol selector finds no common protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorFailureBehavior {
    NoAdvertise,
    ChooseMyLastProtocol,
    FatalAlert,
}

/// Behavior when the peer selects a protocol this side did not offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectedListenerFailureBehavior {
    Accept,
    ChooseMyLastProtocol,
    FatalAlert,
}

/// Application-layer protocol negotiation settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlpnConfig {
    pub protocols: Vec<String>,
    pub selector_failure: SelectorFailureBehavior,
    pub listener_failure: SelectedListenerFailureBehavior,
}

impl AlpnConfig {
    /// `h2` preferred, `http/1.1` as fallback.
    pub fn h2() -> Self {
        Self {
            protocols: vec![ALPN_H2.to_string(), ALPN_HTTP_1_1.to_string()],
            selector_failure: SelectorFailureBehavior::NoAdvertise,
            listener_failure: SelectedListenerFailureBehavior::Accept,
        }
    }
}

pub const ALPN_H2: &str = "h2";
pub const ALPN_HTTP_1_1: &str = "http/1.1";

/// TLS 1.2 suites acceptable for HTTP/2 (RFC 7540 section 9.2.2).
pub const H2_CIPHERS: [&str; 6] = [
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
];

/// Preset applied to a context builder before the context is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DefaultProfile {
    /// Leave the builder untouched.
    #[default]
    None,
    Tcp,
    H2,
}

impl DefaultProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefaultProfile::None => "none",
            DefaultProfile::Tcp => "tcp",
            DefaultProfile::H2 => "h2",
        }
    }

    /// Rewrite `builder` according to this profile.
    pub fn apply(self, builder: &mut dyn ContextBuilder) {
        match self {
            DefaultProfile::None => {}
            DefaultProfile::Tcp => {
                builder.backend(preferred_backend(TlsBackend::is_available));
                builder.ciphers(None, CipherFilter::Identity);
                builder.application_protocol_config(None);
            }
            DefaultProfile::H2 => {
                builder.backend(preferred_backend(TlsBackend::supports_alpn));
                builder.ciphers(
                    Some(H2_CIPHERS.iter().map(|s| s.to_string()).collect()),
                    CipherFilter::Supported,
                );
                builder.application_protocol_config(Some(AlpnConfig::h2()));
            }
        }
    }
}

impl fmt::Display for DefaultProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn preferred_backend(usable: impl Fn(TlsBackend) -> bool) -> TlsBackend {
    if usable(TlsBackend::Native) {
        TlsBackend::Native
    } else {
        TlsBackend::Default
    }
}

/// Mutable recipe for a [`TlsContext`].
pub trait ContextBuilder: fmt::Debug + Send + Sync + 'static {
    fn backend(&mut self, backend: TlsBackend);

    fn ciphers(&mut self, ciphers: Option<Vec<String>>, filter: CipherFilter);

    fn application_protocol_config(&mut self, alpn: Option<AlpnConfig>);

    /// Materialize the context. Engine failures map to [`TlsError::ContextResolution`].
    fn build(&self) -> Result<Arc<dyn TlsContext>, TlsError>;

    fn clone_box(&self) -> Box<dyn ContextBuilder>;

    /// Stable hash of every field that influences [`build`](Self::build).
    fn fingerprint(&self) -> u64;
}

impl Clone for Box<dyn ContextBuilder> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Resolved, shareable TLS context.
pub trait TlsContext: fmt::Debug + Send + Sync + 'static {
    /// Create a handler for one connection. `sni` carries the peer host for clients.
    fn new_handler(&self, sni: Option<&SniTarget>) -> Result<Box<dyn HandshakeHandler>, TlsError>;

    fn engine_name(&self) -> &'static str;
}

/// Per-connection pipeline handler performing the TLS handshake.
pub trait HandshakeHandler: Handler {
    fn set_handshake_timeout(&mut self, timeout: Duration);

    fn set_close_notify_flush_timeout(&mut self, timeout: Duration);

    fn set_close_notify_read_timeout(&mut self, timeout: Duration);

    fn handshake_timeout(&self) -> Duration;

    fn close_notify_flush_timeout(&self) -> Duration;

    fn close_notify_read_timeout(&self) -> Duration;

    fn engine_name(&self) -> &'static str;

    /// Engine-specific access for customizers.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_handler(self: Box<Self>) -> Box<dyn Handler>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Recipe {
        backend: Option<TlsBackend>,
        ciphers: Option<(Option<Vec<String>>, CipherFilter)>,
        alpn: Option<Option<AlpnConfig>>,
    }

    impl ContextBuilder for Recipe {
        fn backend(&mut self, backend: TlsBackend) {
            self.backend = Some(backend);
        }

        fn ciphers(&mut self, ciphers: Option<Vec<String>>, filter: CipherFilter) {
            self.ciphers = Some((ciphers, filter));
        }

        fn application_protocol_config(&mut self, alpn: Option<AlpnConfig>) {
            self.alpn = Some(alpn);
        }

        fn build(&self) -> Result<Arc<dyn TlsContext>, TlsError> {
            Err(TlsError::ContextResolution("recipe only".into()))
        }

        fn clone_box(&self) -> Box<dyn ContextBuilder> {
            Box::new(self.clone())
        }

        fn fingerprint(&self) -> u64 {
            0
        }
    }

    #[test]
    fn h2_profile() {
        let mut recipe = Recipe::default();
        DefaultProfile::H2.apply(&mut recipe);

        let expected = if TlsBackend::Native.supports_alpn() { TlsBackend::Native } else { TlsBackend::Default };
        assert_eq!(recipe.backend, Some(expected));

        let (ciphers, filter) = recipe.ciphers.unwrap();
        assert_eq!(filter, CipherFilter::Supported);
        assert_eq!(ciphers.unwrap(), H2_CIPHERS.to_vec());

        let alpn = recipe.alpn.unwrap().unwrap();
        assert_eq!(alpn.protocols, vec!["h2", "http/1.1"]);
        assert_eq!(alpn.selector_failure, SelectorFailureBehavior::NoAdvertise);
        assert_eq!(alpn.listener_failure, SelectedListenerFailureBehavior::Accept);
    }

    #[test]
    fn tcp_profile() {
        let mut recipe = Recipe::default();
        DefaultProfile::Tcp.apply(&mut recipe);

        let expected = if TlsBackend::Native.is_available() { TlsBackend::Native } else { TlsBackend::Default };
        assert_eq!(recipe.backend, Some(expected));
        assert_eq!(recipe.ciphers, Some((None, CipherFilter::Identity)));
        assert_eq!(recipe.alpn, Some(None));
    }

    #[test]
    fn none_profile_leaves_builder_alone() {
        let mut recipe = Recipe::default();
        DefaultProfile::None.apply(&mut recipe);
        assert!(recipe.backend.is_none() && recipe.ciphers.is_none() && recipe.alpn.is_none());
    }

    #[test]
    fn default_backend_always_available() {
        assert!(TlsBackend::Default.is_available());
        assert!(TlsBackend::Default.supports_alpn());
        assert_eq!(TlsBackend::Native.is_available(), cfg!(feature = "aws-lc"));
    }
}
