//! Connection pooling subsystem.
//!
//! # Data Flow
//! ```text
//! ConnectionProvider::acquire(remote)
//!     → pool for remote (created on first use, registered with the MeterRegistrar)
//!     → idle connection | new Connection::establish | wait as pending
//!     → PooledConnection (returns to idle on drop)
//! ```
//!
//! # Design Decisions
//! - Counters are plain atomics; metrics views read them live
//! - `usize::MAX` stands for an unbounded limit in every metrics view

pub mod connection_pool;
pub mod metrics;
pub mod provider;
pub mod registrar;

use std::time::Duration;

use thiserror::Error;

use crate::net::ConnectError;

pub use connection_pool::{ConnectionPool, PoolLimits, PooledConnection};
pub use metrics::{ConnectionPoolMetrics, ConnectionPoolWrapper, PoolMetrics, PoolMetricsSnapshot};
pub use provider::{ConnectionProvider, ConnectionProviderBuilder, RegistrarSupplier};
pub use registrar::{GaugeRegistrar, MeterRegistrar};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("too many pending acquires (max {max})")]
    PendingAcquireLimit { max: usize },

    #[error("pending acquire timed out after {0:?}")]
    PendingAcquireTimeout(Duration),

    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("connection provider disposed")]
    Disposed,
}
