//! Rustls-backed TLS engine.
//!
//! # Responsibilities
//! - Turn PEM material and profile settings into rustls client/server configs
//! - Reconcile requested cipher names with the selected crypto provider
//! - Drive a sans-IO `rustls::Connection` as a pipeline handler
//!
//! # Design Decisions
//! - The handler never touches a socket: ciphertext arrives as `read`, leaves as `write`
//! - Handshake timeout is checked on `tick`, so a stalled peer fails even with no traffic
//! - Failures are reported once, through `HandshakeCompleted(Failure)`, then the channel is closed

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, Connection, RootCertStore, ServerConfig, ServerConnection, SupportedCipherSuite};

use crate::net::SniTarget;
use crate::pipeline::{Context, Handler, HandshakeCompletion, UserEvent};
use crate::tls::{AlpnConfig, CipherFilter, ContextBuilder, HandshakeHandler, TlsBackend, TlsContext, TlsError};

pub const ENGINE_NAME: &str = "rustls";

/// Which side of the handshake a context serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsRole {
    Client,
    Server,
}

/// [`ContextBuilder`] for rustls.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RustlsContextBuilder {
    role: TlsRole,
    /// Trust anchors (client role).
    roots_pem: Vec<u8>,
    /// Certificate chain and key (server role).
    cert_chain_pem: Vec<u8>,
    key_pem: Vec<u8>,
    /// Overrides the peer host sent as SNI and used for verification.
    server_name: Option<String>,
    backend: TlsBackend,
    ciphers: Option<Vec<String>>,
    cipher_filter: CipherFilter,
    alpn: Option<AlpnConfig>,
}

impl RustlsContextBuilder {
    /// Client builder with an empty trust store.
    pub fn client() -> Self {
        Self {
            role: TlsRole::Client,
            roots_pem: Vec::new(),
            cert_chain_pem: Vec::new(),
            key_pem: Vec::new(),
            server_name: None,
            backend: TlsBackend::Default,
            ciphers: None,
            cipher_filter: CipherFilter::Identity,
            alpn: None,
        }
    }

    /// Server builder presenting `cert_chain_pem` with `key_pem`.
    pub fn server(cert_chain_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            role: TlsRole::Server,
            cert_chain_pem: cert_chain_pem.into(),
            key_pem: key_pem.into(),
            ..Self::client()
        }
    }

    /// Add PEM-encoded trust anchors.
    pub fn with_root_certificates_pem(mut self, pem: impl AsRef<[u8]>) -> Self {
        self.roots_pem.extend_from_slice(pem.as_ref());
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn role(&self) -> TlsRole {
        self.role
    }

    pub fn selected_backend(&self) -> TlsBackend {
        self.backend
    }

    pub fn selected_ciphers(&self) -> (Option<&[String]>, CipherFilter) {
        (self.ciphers.as_deref(), self.cipher_filter)
    }

    pub fn selected_alpn(&self) -> Option<&AlpnConfig> {
        self.alpn.as_ref()
    }

    fn crypto_provider(&self) -> Result<CryptoProvider, TlsError> {
        let base = match self.backend {
            TlsBackend::Default => rustls::crypto::ring::default_provider(),
            TlsBackend::Native => native_provider()?,
        };
        let cipher_suites = select_cipher_suites(&base.cipher_suites, self.ciphers.as_deref(), self.cipher_filter)?;
        Ok(CryptoProvider { cipher_suites, ..base })
    }

    fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        self.alpn
            .iter()
            .flat_map(|alpn| alpn.protocols.iter())
            .map(|p| p.as_bytes().to_vec())
            .collect()
    }
}

impl fmt::Debug for RustlsContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("RustlsContextBuilder")
            .field("role", &self.role)
            .field("server_name", &self.server_name)
            .field("backend", &self.backend)
            .field("ciphers", &self.ciphers)
            .field("cipher_filter", &self.cipher_filter)
            .field("alpn", &self.alpn)
            .finish_non_exhaustive()
    }
}

impl ContextBuilder for RustlsContextBuilder {
    fn backend(&mut self, backend: TlsBackend) {
        self.backend = backend;
    }

    fn ciphers(&mut self, ciphers: Option<Vec<String>>, filter: CipherFilter) {
        self.ciphers = ciphers;
        self.cipher_filter = filter;
    }

    fn application_protocol_config(&mut self, alpn: Option<AlpnConfig>) {
        self.alpn = alpn;
    }

    fn build(&self) -> Result<Arc<dyn TlsContext>, TlsError> {
        let provider = Arc::new(self.crypto_provider()?);
        let config = match self.role {
            TlsRole::Client => {
                let mut roots = RootCertStore::empty();
                for cert in parse_certificates(&self.roots_pem)? {
                    roots.add(cert).map_err(resolution)?;
                }
                let mut config = ClientConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()
                    .map_err(resolution)?
                    .with_root_certificates(roots)
                    .with_no_client_auth();
                config.alpn_protocols = self.alpn_protocols();
                EngineConfig::Client(Arc::new(config))
            }
            TlsRole::Server => {
                let chain = parse_certificates(&self.cert_chain_pem)?;
                if chain.is_empty() {
                    return Err(TlsError::ContextResolution("server certificate chain is empty".into()));
                }
                let key = parse_private_key(&self.key_pem)?;
                let mut config = ServerConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()
                    .map_err(resolution)?
                    .with_no_client_auth()
                    .with_single_cert(chain, key)
                    .map_err(resolution)?;
                config.alpn_protocols = self.alpn_protocols();
                EngineConfig::Server(Arc::new(config))
            }
        };

        tracing::debug!(
            role = ?self.role,
            backend = ?self.backend,
            alpn = ?self.alpn.as_ref().map(|a| &a.protocols),
            "TLS context resolved"
        );

        Ok(Arc::new(RustlsContext {
            config,
            server_name: self.server_name.clone(),
        }))
    }

    fn clone_box(&self) -> Box<dyn ContextBuilder> {
        Box::new(self.clone())
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

fn resolution(err: impl fmt::Display) -> TlsError {
    TlsError::ContextResolution(err.to_string())
}

#[cfg(feature = "aws-lc")]
fn native_provider() -> Result<CryptoProvider, TlsError> {
    Ok(rustls::crypto::aws_lc_rs::default_provider())
}

#[cfg(not(feature = "aws-lc"))]
fn native_provider() -> Result<CryptoProvider, TlsError> {
    Err(TlsError::ContextResolution("native TLS backend is not compiled in".into()))
}

/// IANA-style name of a suite, e.g. `TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256`.
pub fn cipher_suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

/// Apply a requested cipher list to the suites a provider offers.
///
/// TLS 1.3 suites are not configurable through the list and are always kept by
/// [`CipherFilter::Supported`].
pub fn select_cipher_suites(
    available: &[SupportedCipherSuite],
    requested: Option<&[String]>,
    filter: CipherFilter,
) -> Result<Vec<SupportedCipherSuite>, TlsError> {
    let Some(requested) = requested else {
        return Ok(available.to_vec());
    };
    let find = |name: &str| available.iter().copied().find(|s| cipher_suite_name(s) == name);

    match filter {
        CipherFilter::Identity => requested
            .iter()
            .map(|name| {
                find(name).ok_or_else(|| TlsError::ContextResolution(format!("unsupported cipher suite: {}", name)))
            })
            .collect(),
        CipherFilter::Supported => {
            let mut kept: Vec<SupportedCipherSuite> = available
                .iter()
                .copied()
                .filter(|s| matches!(s, SupportedCipherSuite::Tls13(_)))
                .collect();
            kept.extend(
                requested
                    .iter()
                    .filter_map(|name| find(name))
                    .filter(|s| !matches!(s, SupportedCipherSuite::Tls13(_))),
            );
            Ok(kept)
        }
    }
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::ContextResolution(format!("invalid certificate PEM: {}", e)))
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| TlsError::ContextResolution(format!("invalid private key PEM: {}", e)))?
        .ok_or_else(|| TlsError::ContextResolution("no private key found in PEM".into()))
}

#[derive(Debug, Clone)]
enum EngineConfig {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

/// Resolved rustls context; cheap to share.
#[derive(Debug)]
pub struct RustlsContext {
    config: EngineConfig,
    server_name: Option<String>,
}

impl RustlsContext {
    pub fn role(&self) -> TlsRole {
        match self.config {
            EngineConfig::Client(_) => TlsRole::Client,
            EngineConfig::Server(_) => TlsRole::Server,
        }
    }

    /// Build the concrete handler, for callers that need more than the trait object.
    pub fn new_rustls_handler(&self, sni: Option<&SniTarget>) -> Result<RustlsHandler, TlsError> {
        let conn: Connection = match &self.config {
            EngineConfig::Client(config) => {
                let host = self
                    .server_name
                    .clone()
                    .or_else(|| sni.map(|t| t.host.clone()))
                    .ok_or(TlsError::MissingServerName)?;
                let name = ServerName::try_from(host.clone()).map_err(|_| TlsError::InvalidServerName(host))?;
                ClientConnection::new(Arc::clone(config), name)?.into()
            }
            EngineConfig::Server(config) => ServerConnection::new(Arc::clone(config))?.into(),
        };
        Ok(RustlsHandler::new(conn))
    }
}

impl TlsContext for RustlsContext {
    fn new_handler(&self, sni: Option<&SniTarget>) -> Result<Box<dyn HandshakeHandler>, TlsError> {
        Ok(Box::new(self.new_rustls_handler(sni)?))
    }

    fn engine_name(&self) -> &'static str {
        ENGINE_NAME
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Waiting for `channel_active`.
    Idle,
    Handshaking { deadline: Option<Instant> },
    Established,
    Failed,
}

/// Pipeline handler wrapping a rustls connection.
pub struct RustlsHandler {
    conn: Connection,
    state: HandshakeState,
    handshake_timeout: Duration,
    close_notify_flush_timeout: Duration,
    close_notify_read_timeout: Duration,
    close_notify_received: bool,
}

impl RustlsHandler {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            state: HandshakeState::Idle,
            handshake_timeout: Duration::ZERO,
            close_notify_flush_timeout: Duration::ZERO,
            close_notify_read_timeout: Duration::ZERO,
            close_notify_received: false,
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    pub fn is_close_notify_received(&self) -> bool {
        self.close_notify_received
    }

    /// Protocol selected by ALPN, if any.
    pub fn alpn_protocol(&self) -> Option<String> {
        self.conn
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned())
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.conn.protocol_version().map(|v| format!("{:?}", v))
    }

    pub fn cipher_suite(&self) -> Option<String> {
        self.conn.negotiated_cipher_suite().map(|s| cipher_suite_name(&s))
    }

    fn handshaking(&self) -> bool {
        matches!(self.state, HandshakeState::Handshaking { .. })
    }

    /// Move pending TLS records to the outbound side.
    fn flush(&mut self, ctx: &mut Context<'_>) -> io::Result<()> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            self.conn.write_tls(&mut out)?;
        }
        if !out.is_empty() {
            ctx.write(Bytes::from(out));
        }
        Ok(())
    }

    fn fail(&mut self, ctx: &mut Context<'_>, err: TlsError) {
        // Alerts queued by rustls are best effort.
        let _ = self.flush(ctx);
        if self.handshaking() {
            self.state = HandshakeState::Failed;
            tracing::debug!(connection_id = %ctx.channel_id(), error = %err, "TLS handshake failed");
            ctx.fire_user_event(UserEvent::HandshakeCompleted(HandshakeCompletion::Failure(Arc::new(err))));
            ctx.close();
        } else {
            self.state = HandshakeState::Failed;
            ctx.fire_exception_caught(Arc::new(err));
        }
    }

    /// Feed ciphertext to rustls, returning decrypted plaintext.
    fn ingest(&mut self, mut ciphertext: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut plaintext = Vec::new();
        while !ciphertext.is_empty() {
            if self.conn.read_tls(&mut ciphertext)? == 0 {
                break;
            }
            self.conn.process_new_packets()?;
            self.drain_plaintext(&mut plaintext)?;
        }
        Ok(plaintext)
    }

    fn drain_plaintext(&mut self, into: &mut Vec<u8>) -> Result<(), TlsError> {
        let mut buf = [0u8; 16 * 1024];
        loop {
            match self.conn.reader().read(&mut buf) {
                Ok(0) => {
                    self.close_notify_received = true;
                    return Ok(());
                }
                Ok(n) => into.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Handler for RustlsHandler {
    fn on_channel_active(&mut self, ctx: &mut Context<'_>) {
        if self.state == HandshakeState::Idle {
            let deadline = (!self.handshake_timeout.is_zero()).then(|| Instant::now() + self.handshake_timeout);
            self.state = HandshakeState::Handshaking { deadline };
            if let Err(e) = self.flush(ctx) {
                self.fail(ctx, e.into());
                return;
            }
        }
        ctx.fire_channel_active();
    }

    fn on_read(&mut self, ctx: &mut Context<'_>, msg: Bytes) {
        if self.state == HandshakeState::Failed {
            return;
        }
        let had_close_notify = self.close_notify_received;
        let plaintext = match self.ingest(&msg) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                self.fail(ctx, err);
                return;
            }
        };
        if let Err(e) = self.flush(ctx) {
            self.fail(ctx, e.into());
            return;
        }

        if self.handshaking() && !self.conn.is_handshaking() {
            self.state = HandshakeState::Established;
            tracing::debug!(
                connection_id = %ctx.channel_id(),
                alpn = ?self.alpn_protocol(),
                version = ?self.protocol_version(),
                "TLS handshake completed"
            );
            ctx.fire_user_event(UserEvent::HandshakeCompleted(HandshakeCompletion::Success));
        } else if self.handshaking() {
            ctx.read();
        }

        if !plaintext.is_empty() {
            ctx.fire_read(Bytes::from(plaintext));
        }
        if self.close_notify_received && !had_close_notify {
            ctx.fire_user_event(UserEvent::CloseNotifyReceived);
        }
    }

    fn on_inactive(&mut self, ctx: &mut Context<'_>) {
        if self.handshaking() {
            self.fail(ctx, TlsError::ClosedDuringHandshake);
        }
        ctx.fire_inactive();
    }

    fn on_tick(&mut self, ctx: &mut Context<'_>, now: Instant) {
        if let HandshakeState::Handshaking { deadline: Some(deadline) } = self.state {
            if now >= deadline {
                self.fail(ctx, TlsError::HandshakeTimeout(self.handshake_timeout));
            }
        }
        ctx.fire_tick(now);
    }

    fn on_write(&mut self, ctx: &mut Context<'_>, msg: Bytes) {
        if let Err(e) = self.conn.writer().write_all(&msg) {
            self.fail(ctx, e.into());
            return;
        }
        if let Err(e) = self.flush(ctx) {
            self.fail(ctx, e.into());
        }
    }

    fn on_close(&mut self, ctx: &mut Context<'_>) {
        if self.state == HandshakeState::Established {
            self.conn.send_close_notify();
            let _ = self.flush(ctx);
        }
        ctx.close();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HandshakeHandler for RustlsHandler {
    fn set_handshake_timeout(&mut self, timeout: Duration) {
        self.handshake_timeout = timeout;
    }

    fn set_close_notify_flush_timeout(&mut self, timeout: Duration) {
        self.close_notify_flush_timeout = timeout;
    }

    fn set_close_notify_read_timeout(&mut self, timeout: Duration) {
        self.close_notify_read_timeout = timeout;
    }

    fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    fn close_notify_flush_timeout(&self) -> Duration {
        self.close_notify_flush_timeout
    }

    fn close_notify_read_timeout(&self) -> Duration {
        self.close_notify_read_timeout
    }

    fn engine_name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_handler(self: Box<Self>) -> Box<dyn Handler> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::{DefaultProfile, H2_CIPHERS};

    const CA: &[u8] = include_bytes!("../../tests/fixtures/ca.pem");
    const CERT: &[u8] = include_bytes!("../../tests/fixtures/server.pem");
    const KEY: &[u8] = include_bytes!("../../tests/fixtures/server.key");

    fn ring_suites() -> Vec<SupportedCipherSuite> {
        rustls::crypto::ring::default_provider().cipher_suites
    }

    #[test]
    fn identity_without_list_keeps_engine_defaults() {
        let suites = select_cipher_suites(&ring_suites(), None, CipherFilter::Identity).unwrap();
        assert_eq!(suites.len(), ring_suites().len());
    }

    #[test]
    fn identity_rejects_unknown_names() {
        let requested = vec!["TLS_RSA_WITH_NULL_MD5".to_string()];
        let err = select_cipher_suites(&ring_suites(), Some(&requested), CipherFilter::Identity).unwrap_err();
        assert!(matches!(err, TlsError::ContextResolution(ref m) if m.contains("TLS_RSA_WITH_NULL_MD5")));
    }

    #[test]
    fn supported_filter_keeps_tls13_and_known_tls12() {
        let requested = vec![
            "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256".to_string(),
            "TLS_RSA_WITH_NULL_MD5".to_string(),
        ];
        let suites = select_cipher_suites(&ring_suites(), Some(&requested), CipherFilter::Supported).unwrap();
        let names: Vec<String> = suites.iter().map(cipher_suite_name).collect();

        assert!(names.contains(&"TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256".to_string()));
        assert!(!names.iter().any(|n| n.contains("NULL")));
        assert!(suites.iter().any(|s| matches!(s, SupportedCipherSuite::Tls13(_))));
        assert_eq!(
            suites.iter().filter(|s| !matches!(s, SupportedCipherSuite::Tls13(_))).count(),
            1
        );
    }

    #[test]
    fn fingerprint_tracks_fields() {
        let a = RustlsContextBuilder::client().with_root_certificates_pem(CA);
        let b = RustlsContextBuilder::client().with_root_certificates_pem(CA);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = b.clone();
        c.application_protocol_config(Some(AlpnConfig::h2()));
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn server_context_builds_from_fixtures() {
        let ctx = RustlsContextBuilder::server(CERT, KEY).build().unwrap();
        assert_eq!(ctx.engine_name(), ENGINE_NAME);
        assert!(ctx.new_handler(None).is_ok());
    }

    #[test]
    fn server_without_key_fails_resolution() {
        let err = RustlsContextBuilder::server(CERT, Vec::<u8>::new()).build().unwrap_err();
        assert!(matches!(err, TlsError::ContextResolution(_)));
    }

    #[test]
    fn client_needs_a_server_name() {
        let ctx = RustlsContextBuilder::client().with_root_certificates_pem(CA).build().unwrap();
        assert!(matches!(ctx.new_handler(None), Err(TlsError::MissingServerName)));

        let sni = SniTarget { host: "localhost".into(), port: 443 };
        assert!(ctx.new_handler(Some(&sni)).is_ok());

        let bad = SniTarget { host: "not a host!".into(), port: 443 };
        assert!(matches!(ctx.new_handler(Some(&bad)), Err(TlsError::InvalidServerName(_))));
    }

    #[test]
    fn configured_server_name_is_a_fallback_for_opaque_peers() {
        let ctx = RustlsContextBuilder::client()
            .with_root_certificates_pem(CA)
            .with_server_name("localhost")
            .build()
            .unwrap();
        assert!(ctx.new_handler(None).is_ok());
    }

    #[test]
    fn profiles_rewrite_the_builder() {
        let mut builder = RustlsContextBuilder::client().with_root_certificates_pem(CA);
        assert_eq!(builder.selected_backend(), TlsBackend::Default);
        assert_eq!(builder.selected_ciphers(), (None, CipherFilter::Identity));
        assert!(builder.selected_alpn().is_none());

        DefaultProfile::H2.apply(&mut builder);
        let expected_backend = if cfg!(feature = "aws-lc") { TlsBackend::Native } else { TlsBackend::Default };
        assert_eq!(builder.selected_backend(), expected_backend);
        let (ciphers, filter) = builder.selected_ciphers();
        assert_eq!(ciphers.map(<[String]>::len), Some(H2_CIPHERS.len()));
        assert_eq!(filter, CipherFilter::Supported);
        assert_eq!(builder.selected_alpn(), Some(&AlpnConfig::h2()));

        DefaultProfile::Tcp.apply(&mut builder);
        assert_eq!(builder.selected_backend(), expected_backend);
        assert_eq!(builder.selected_ciphers(), (None, CipherFilter::Identity));
        assert!(builder.selected_alpn().is_none());
        assert!(builder.build().is_ok());
    }

    #[test]
    fn native_backend_matches_feature() {
        let mut builder = RustlsContextBuilder::server(CERT, KEY);
        builder.backend(TlsBackend::Native);
        assert_eq!(builder.build().is_ok(), cfg!(feature = "aws-lc"));
    }
}
