//! Immutable, derivable TLS configuration.
//!
//! # Responsibilities
//! - Validate and freeze timing, profile and customizer settings
//! - Resolve the TLS context once, from a pre-built context or a builder + profile
//! - Derive new configurations without touching the source
//!
//! # Design Decisions
//! - Equality and hashing use an identity computed from the builder inputs,
//!   so two configurations built from equal inputs compare equal
//! - Derived configurations keep the identity of their source
//! - A profile on a pre-built context is recorded but cannot change the context

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::tls::engine::RustlsContextBuilder;
use crate::tls::timing::non_negative;
use crate::tls::{ContextBuilder, DefaultProfile, HandshakeHandler, TimingPolicy, TlsContext, TlsDefaults, TlsError};

/// Callback run on every new handshake handler, after the timeouts are applied.
pub type HandlerCustomizer = Arc<dyn Fn(&mut dyn HandshakeHandler) + Send + Sync>;

/// Shareable TLS settings for many connections.
#[derive(Clone)]
pub struct SslConfiguration {
    context: Arc<dyn TlsContext>,
    /// Caller's builder, before any profile was applied.
    context_builder: Option<Arc<dyn ContextBuilder>>,
    profile: Option<DefaultProfile>,
    timing: TimingPolicy,
    customizer: Option<HandlerCustomizer>,
    identity: u64,
}

impl SslConfiguration {
    /// Start a staged builder with library defaults.
    pub fn builder() -> ContextSpec {
        Self::builder_with_defaults(TlsDefaults::default())
    }

    pub fn builder_with_defaults(defaults: TlsDefaults) -> ContextSpec {
        ContextSpec {
            inner: SslConfigurationBuilder::new(defaults),
        }
    }

    /// Rustls client trusting `roots_pem`, with the TCP profile.
    pub fn default_client(defaults: TlsDefaults, roots_pem: impl AsRef<[u8]>) -> Result<Self, TlsError> {
        Self::builder_with_defaults(defaults)
            .context_builder(RustlsContextBuilder::client().with_root_certificates_pem(roots_pem))
            .default_configuration(DefaultProfile::Tcp)
            .build()
    }

    pub fn context(&self) -> &Arc<dyn TlsContext> {
        &self.context
    }

    pub fn context_builder(&self) -> Option<&Arc<dyn ContextBuilder>> {
        self.context_builder.as_ref()
    }

    pub fn profile(&self) -> Option<DefaultProfile> {
        self.profile
    }

    pub fn timing(&self) -> &TimingPolicy {
        &self.timing
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.timing.handshake_timeout()
    }

    pub fn has_customizer(&self) -> bool {
        self.customizer.is_some()
    }

    /// Apply timeouts, then the customizer chain, to a fresh handler.
    pub fn configure(&self, handler: &mut dyn HandshakeHandler) {
        self.timing.apply(handler);
        if let Some(customizer) = &self.customizer {
            customizer(handler);
        }
    }

    /// Copy with `customizer` added. The newest customizer runs first.
    pub fn with_extra_customizer<F>(&self, customizer: F) -> Self
    where
        F: Fn(&mut dyn HandshakeHandler) + Send + Sync + 'static,
    {
        let combined: HandlerCustomizer = match &self.customizer {
            None => Arc::new(customizer),
            Some(prior) => {
                let prior = Arc::clone(prior);
                Arc::new(move |handler: &mut dyn HandshakeHandler| {
                    customizer(&mut *handler);
                    prior(handler);
                })
            }
        };
        Self {
            customizer: Some(combined),
            ..self.clone()
        }
    }

    /// Copy with a different profile.
    ///
    /// With a context builder the context is re-resolved from a copy of it.
    /// With only a pre-built context the same context is kept.
    pub fn with_profile(&self, profile: DefaultProfile) -> Result<Self, TlsError> {
        let context = match &self.context_builder {
            Some(builder) => resolve(builder.as_ref(), Some(profile))?,
            None => Arc::clone(&self.context),
        };
        Ok(Self {
            context,
            profile: Some(profile),
            ..self.clone()
        })
    }
}

impl PartialEq for SslConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for SslConfiguration {}

impl Hash for SslConfiguration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Display for SslConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SslConfiguration{{engine={}, profile={}, handshake_timeout={}ms, close_notify_flush_timeout={}ms, close_notify_read_timeout={}ms}}",
            self.context.engine_name(),
            self.profile.unwrap_or_default(),
            self.timing.handshake_timeout().as_millis(),
            self.timing.close_notify_flush_timeout().as_millis(),
            self.timing.close_notify_read_timeout().as_millis(),
        )
    }
}

impl fmt::Debug for SslConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SslConfiguration")
            .field("context", &self.context)
            .field("context_builder", &self.context_builder)
            .field("profile", &self.profile)
            .field("timing", &self.timing)
            .field("customizer", &self.customizer.is_some())
            .finish()
    }
}

/// Apply `profile` to a copy of `builder` and build it.
fn resolve(builder: &dyn ContextBuilder, profile: Option<DefaultProfile>) -> Result<Arc<dyn TlsContext>, TlsError> {
    let mut copy = builder.clone_box();
    if let Some(profile) = profile {
        profile.apply(copy.as_mut());
    }
    copy.build().map_err(|e| match e {
        TlsError::ContextResolution(_) => e,
        other => TlsError::ContextResolution(other.to_string()),
    })
}

enum ContextSource {
    Prebuilt(Arc<dyn TlsContext>),
    Builder(Arc<dyn ContextBuilder>),
}

/// First stage: choose where the context comes from.
pub struct ContextSpec {
    inner: SslConfigurationBuilder,
}

impl ContextSpec {
    pub fn tls_context(self, context: Arc<dyn TlsContext>) -> SslConfigurationBuilder {
        self.inner.tls_context(context)
    }

    pub fn context_builder(self, builder: impl ContextBuilder) -> DefaultProfileSpec {
        DefaultProfileSpec {
            inner: self.inner.context_builder(builder),
        }
    }
}

/// Second stage after a context builder: pick the profile.
pub struct DefaultProfileSpec {
    inner: SslConfigurationBuilder,
}

impl DefaultProfileSpec {
    pub fn default_configuration(self, profile: DefaultProfile) -> SslConfigurationBuilder {
        self.inner.default_configuration(profile)
    }
}

/// Collects settings for an [`SslConfiguration`].
pub struct SslConfigurationBuilder {
    source: Option<ContextSource>,
    profile: Option<DefaultProfile>,
    handshake_timeout: Duration,
    close_notify_flush_timeout: Duration,
    close_notify_read_timeout: Duration,
    customizer: Option<HandlerCustomizer>,
    /// First invalid value seen; reported by `build`.
    error: Option<TlsError>,
}

impl SslConfigurationBuilder {
    /// Unstaged builder. `build` fails unless a context or context builder is set.
    pub fn new(defaults: TlsDefaults) -> Self {
        let timing = TimingPolicy::with_defaults(defaults);
        Self {
            source: None,
            profile: None,
            handshake_timeout: timing.handshake_timeout(),
            close_notify_flush_timeout: timing.close_notify_flush_timeout(),
            close_notify_read_timeout: timing.close_notify_read_timeout(),
            customizer: None,
            error: None,
        }
    }

    pub fn tls_context(mut self, context: Arc<dyn TlsContext>) -> Self {
        self.source = Some(ContextSource::Prebuilt(context));
        self
    }

    pub fn context_builder(mut self, builder: impl ContextBuilder) -> Self {
        self.source = Some(ContextSource::Builder(Arc::new(builder)));
        self
    }

    pub fn default_configuration(mut self, profile: DefaultProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn handshake_timeout_millis(mut self, millis: i64) -> Self {
        if let Some(timeout) = self.checked("handshake_timeout", millis) {
            self.handshake_timeout = timeout;
        }
        self
    }

    pub fn close_notify_flush_timeout(mut self, timeout: Duration) -> Self {
        self.close_notify_flush_timeout = timeout;
        self
    }

    pub fn close_notify_flush_timeout_millis(mut self, millis: i64) -> Self {
        if let Some(timeout) = self.checked("close_notify_flush_timeout", millis) {
            self.close_notify_flush_timeout = timeout;
        }
        self
    }

    pub fn close_notify_read_timeout(mut self, timeout: Duration) -> Self {
        self.close_notify_read_timeout = timeout;
        self
    }

    pub fn close_notify_read_timeout_millis(mut self, millis: i64) -> Self {
        if let Some(timeout) = self.checked("close_notify_read_timeout", millis) {
            self.close_notify_read_timeout = timeout;
        }
        self
    }

    /// Set the primary customizer, replacing any previous one.
    pub fn handler_customizer<F>(mut self, customizer: F) -> Self
    where
        F: Fn(&mut dyn HandshakeHandler) + Send + Sync + 'static,
    {
        self.customizer = Some(Arc::new(customizer));
        self
    }

    fn checked(&mut self, field: &str, millis: i64) -> Option<Duration> {
        match non_negative(field, millis) {
            Ok(timeout) => Some(timeout),
            Err(err) => {
                self.error.get_or_insert(err);
                None
            }
        }
    }

    pub fn build(self) -> Result<SslConfiguration, TlsError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let timing = TimingPolicy::from_durations(
            self.handshake_timeout,
            self.close_notify_flush_timeout,
            self.close_notify_read_timeout,
        );

        let mut hasher = DefaultHasher::new();
        let (context, context_builder) = match self.source {
            None => {
                return Err(TlsError::invalid(
                    "either a TLS context or a context builder must be provided",
                ))
            }
            Some(ContextSource::Prebuilt(context)) => {
                0u8.hash(&mut hasher);
                (Arc::as_ptr(&context) as *const () as usize).hash(&mut hasher);
                (context, None)
            }
            Some(ContextSource::Builder(builder)) => {
                1u8.hash(&mut hasher);
                builder.fingerprint().hash(&mut hasher);
                (resolve(builder.as_ref(), self.profile)?, Some(builder))
            }
        };
        self.profile.hash(&mut hasher);
        timing.hash(&mut hasher);
        self.customizer
            .as_ref()
            .map(|c| Arc::as_ptr(c) as *const () as usize)
            .hash(&mut hasher);

        Ok(SslConfiguration {
            context,
            context_builder,
            profile: self.profile,
            timing,
            customizer: self.customizer,
            identity: hasher.finish(),
        })
    }
}
