//! TLS session establishment.
//!
//! # Data Flow
//! ```text
//! TlsSettings / builder calls
//!     → provider.rs (SslConfiguration: timing + profile + customizers)
//!     → context.rs (profile applied to a copy of the ContextBuilder)
//!     → engine.rs (rustls context, one handler per connection)
//!
//! Per connection:
//!     → handshake.rs (insert handler + observer into the pipeline)
//!     → observer.rs (time the handshake, report once, remove itself)
//! ```
//!
//! # Design Decisions
//! - Configuration is immutable after build; derivations return new values
//! - The handshake handler is sans-IO; the connection driver moves bytes
//! - Startup defaults are passed in as `TlsDefaults`, never read lazily

pub mod context;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod observer;
pub mod provider;
pub mod settings;
pub mod timing;

pub use context::{
    AlpnConfig, CipherFilter, ContextBuilder, DefaultProfile, HandshakeHandler, SelectedListenerFailureBehavior,
    SelectorFailureBehavior, TlsBackend, TlsContext, H2_CIPHERS,
};
pub use engine::{RustlsContext, RustlsContextBuilder, RustlsHandler, TlsRole};
pub use error::TlsError;
pub use handshake::install;
pub use observer::HandshakeTimingObserver;
pub use provider::{ContextSpec, DefaultProfileSpec, HandlerCustomizer, SslConfiguration, SslConfigurationBuilder};
pub use timing::{TimingPolicy, TlsDefaults};
