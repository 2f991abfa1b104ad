//! Connection provider: one pool per remote address.
//!
//! # Responsibilities
//! - Create pools lazily on first acquire
//! - Register new pools with a meter registrar when metrics are enabled
//! - Dispose every pool on shutdown

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::PoolConfig;
use crate::net::{ConnectOptions, RemoteAddress};
use crate::pool::{
    ConnectionPool, ConnectionPoolMetrics, ConnectionPoolWrapper, MeterRegistrar, PoolError, PoolLimits,
    PooledConnection,
};

/// Produces the registrar for a newly created pool.
pub type RegistrarSupplier = Arc<dyn Fn() -> Arc<dyn MeterRegistrar> + Send + Sync>;

/// Builder for [`ConnectionProvider`].
pub struct ConnectionProviderBuilder {
    name: String,
    limits: PoolLimits,
    metrics_enabled: bool,
    registrar: Option<RegistrarSupplier>,
}

impl ConnectionProviderBuilder {
    /// `None` allows any number of connections per remote.
    pub fn max_connections(mut self, max: Option<usize>) -> Self {
        self.limits.max_connections = max;
        self
    }

    /// `None` allows any number of waiting acquires.
    pub fn pending_acquire_max(mut self, max: Option<usize>) -> Self {
        self.limits.pending_acquire_max = max;
        self
    }

    pub fn pending_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.limits.pending_acquire_timeout = timeout;
        self
    }

    /// Enable pool metrics. The supplier is only called when `enabled` is set,
    /// once per created pool.
    pub fn metrics<F>(mut self, enabled: bool, supplier: F) -> Self
    where
        F: Fn() -> Arc<dyn MeterRegistrar> + Send + Sync + 'static,
    {
        self.metrics_enabled = enabled;
        self.registrar = Some(Arc::new(supplier));
        self
    }

    pub fn build(self) -> ConnectionProvider {
        tracing::debug!(
            name = %self.name,
            max_connections = ?self.limits.max_connections,
            pending_acquire_max = ?self.limits.pending_acquire_max,
            metrics = self.metrics_enabled,
            "Connection provider created"
        );
        ConnectionProvider {
            name: self.name,
            limits: self.limits,
            registrar: if self.metrics_enabled { self.registrar } else { None },
            pools: DashMap::new(),
            disposed: AtomicBool::new(false),
        }
    }
}

/// Pools connections per remote address.
pub struct ConnectionProvider {
    name: String,
    limits: PoolLimits,
    registrar: Option<RegistrarSupplier>,
    pools: DashMap<RemoteAddress, Arc<ConnectionPool>>,
    disposed: AtomicBool,
}

impl ConnectionProvider {
    pub fn builder(name: impl Into<String>) -> ConnectionProviderBuilder {
        ConnectionProviderBuilder {
            name: name.into(),
            limits: PoolLimits::default(),
            metrics_enabled: false,
            registrar: None,
        }
    }

    /// Builder preloaded from the `[pool]` config section.
    ///
    /// A negative `pending_acquire_max` means unbounded.
    pub fn builder_from(config: &PoolConfig) -> ConnectionProviderBuilder {
        Self::builder(config.name.clone())
            .max_connections(Some(config.max_connections))
            .pending_acquire_max(usize::try_from(config.pending_acquire_max).ok())
            .pending_acquire_timeout(Duration::from_millis(config.pending_acquire_timeout_ms))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Acquire a connection to `remote`, creating its pool if needed.
    pub async fn acquire(&self, remote: &RemoteAddress, options: &ConnectOptions) -> Result<PooledConnection, PoolError> {
        let pool = self.pool_for(remote)?;
        pool.acquire(options).await
    }

    /// Metrics view of the pool for `remote`, if one exists.
    pub fn metrics(&self, remote: &RemoteAddress) -> Option<Arc<dyn ConnectionPoolMetrics>> {
        self.pools
            .get(remote)
            .map(|pool| Arc::new(ConnectionPoolWrapper::new(pool.value().clone())) as Arc<dyn ConnectionPoolMetrics>)
    }

    /// Dispose every pool; later acquires fail with [`PoolError::Disposed`].
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        let remotes: Vec<RemoteAddress> = self.pools.iter().map(|e| e.key().clone()).collect();
        for remote in remotes {
            if let Some((_, pool)) = self.pools.remove(&remote) {
                pool.dispose();
            }
        }
        tracing::info!(name = %self.name, "Connection provider disposed");
    }

    fn pool_for(&self, remote: &RemoteAddress) -> Result<Arc<ConnectionPool>, PoolError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }
        if let Some(pool) = self.pools.get(remote) {
            return Ok(pool.value().clone());
        }

        let (pool, created) = match self.pools.entry(remote.clone()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let pool = Arc::new(ConnectionPool::new(remote.clone(), self.limits));
                e.insert(pool.clone());
                (pool, true)
            }
        };

        if created {
            tracing::debug!(name = %self.name, pool_id = pool.id(), remote_address = %remote, "Pool created");
            if let Some(supplier) = &self.registrar {
                let registrar = supplier();
                registrar.register_metrics(
                    &self.name,
                    pool.id(),
                    remote,
                    Arc::new(ConnectionPoolWrapper::new(pool.clone())),
                );
            }
        }
        Ok(pool)
    }
}

impl fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("name", &self.name)
            .field("limits", &self.limits)
            .field("metrics", &self.registrar.is_some())
            .field("pools", &self.pools.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_registrar(calls: Arc<AtomicUsize>) -> impl Fn() -> Arc<dyn MeterRegistrar> + Send + Sync {
        move || {
            let calls = calls.clone();
            Arc::new(move |_: &str, _: &str, _: &RemoteAddress, _: Arc<dyn ConnectionPoolMetrics>| {
                calls.fetch_add(1, Ordering::SeqCst);
            }) as Arc<dyn MeterRegistrar>
        }
    }

    #[tokio::test]
    async fn one_pool_per_remote() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = ConnectionProvider::builder("test")
            .metrics(true, counting_registrar(calls.clone()))
            .build();
        let remote = RemoteAddress::inet("localhost", 0);

        assert!(provider.acquire(&remote, &ConnectOptions::new()).await.is_err());
        assert!(provider.acquire(&remote, &ConnectOptions::new()).await.is_err());

        assert_eq!(provider.pool_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(provider.metrics(&remote).is_some());
    }

    #[test]
    fn builder_from_config_maps_negative_pending_to_unbounded() {
        let config = PoolConfig {
            pending_acquire_max: -1,
            ..PoolConfig::default()
        };
        let provider = ConnectionProvider::builder_from(&config).build();
        assert_eq!(provider.limits.pending_acquire_max, None);
        assert_eq!(provider.limits.max_connections, Some(config.max_connections));
        assert_eq!(provider.name(), config.name);
    }

    #[tokio::test]
    async fn disposed_provider_refuses_acquire() {
        let provider = ConnectionProvider::builder("test").build();
        provider.dispose();
        let err = provider
            .acquire(&RemoteAddress::inet("localhost", 0), &ConnectOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Disposed));
        assert_eq!(provider.pool_count(), 0);
    }
}
