//! Meter registration for connection pools.

use std::sync::Arc;

use dashmap::DashMap;

use crate::net::RemoteAddress;
use crate::pool::ConnectionPoolMetrics;

/// Receives a metrics view for every pool the provider creates.
pub trait MeterRegistrar: Send + Sync {
    fn register_metrics(
        &self,
        pool_name: &str,
        id: &str,
        remote: &RemoteAddress,
        metrics: Arc<dyn ConnectionPoolMetrics>,
    );
}

impl<F> MeterRegistrar for F
where
    F: Fn(&str, &str, &RemoteAddress, Arc<dyn ConnectionPoolMetrics>) + Send + Sync,
{
    fn register_metrics(
        &self,
        pool_name: &str,
        id: &str,
        remote: &RemoteAddress,
        metrics: Arc<dyn ConnectionPoolMetrics>,
    ) {
        self(pool_name, id, remote, metrics)
    }
}

struct Registration {
    pool_name: String,
    remote: RemoteAddress,
    metrics: Arc<dyn ConnectionPoolMetrics>,
}

/// Publishes registered pools as `tlsgate_pool_*` gauges.
///
/// Gauges are refreshed by [`publish`](Self::publish), typically on a timer.
#[derive(Default)]
pub struct GaugeRegistrar {
    pools: DashMap<String, Registration>,
}

impl GaugeRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Set every gauge from the current pool counters.
    pub fn publish(&self) {
        for entry in self.pools.iter() {
            let id = entry.key().clone();
            let reg = entry.value();
            let labels = [
                ("name", reg.pool_name.clone()),
                ("id", id),
                ("remote_address", reg.remote.to_string()),
            ];
            let snapshot = reg.metrics.snapshot();
            metrics::gauge!("tlsgate_pool_acquired_connections", &labels).set(snapshot.acquired as f64);
            metrics::gauge!("tlsgate_pool_allocated_connections", &labels).set(snapshot.allocated as f64);
            metrics::gauge!("tlsgate_pool_idle_connections", &labels).set(snapshot.idle as f64);
            metrics::gauge!("tlsgate_pool_pending_acquire", &labels).set(snapshot.pending_acquire as f64);
            metrics::gauge!("tlsgate_pool_max_connections", &labels).set(snapshot.max_allocated as f64);
            metrics::gauge!("tlsgate_pool_max_pending_acquire", &labels).set(snapshot.max_pending_acquire as f64);
        }
    }
}

impl MeterRegistrar for GaugeRegistrar {
    fn register_metrics(
        &self,
        pool_name: &str,
        id: &str,
        remote: &RemoteAddress,
        metrics: Arc<dyn ConnectionPoolMetrics>,
    ) {
        tracing::debug!(pool = pool_name, id, remote_address = %remote, "Registering pool gauges");
        self.pools.insert(
            id.to_string(),
            Registration {
                pool_name: pool_name.to_string(),
                remote: remote.clone(),
                metrics,
            },
        );
    }
}
