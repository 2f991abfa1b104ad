//! TLS session establishment with handshake timing and pool metrics.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod pool;
pub mod tls;

pub use config::schema::GatewayConfig;
pub use lifecycle::Shutdown;
pub use pool::ConnectionProvider;
pub use tls::{SslConfiguration, TlsDefaults};
