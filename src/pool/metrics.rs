//! Live pool counters exposed to meter registries.
//!
//! Every call reads the underlying atomics again; nothing is cached, and the
//! six values are not an atomic snapshot of one another. Unbounded maxima are
//! reported as `usize::MAX`.

use std::sync::Arc;

use serde::Serialize;

/// Counters maintained by a pool implementation.
pub trait PoolMetrics: Send + Sync {
    /// Connections handed out and not yet released.
    fn acquired_size(&self) -> usize;

    /// Live connections, acquired or idle.
    fn allocated_size(&self) -> usize;

    fn idle_size(&self) -> usize;

    /// Acquires waiting for a connection.
    fn pending_acquire_size(&self) -> usize;

    fn max_allocated_size(&self) -> usize;

    fn max_pending_acquire_size(&self) -> usize;
}

/// Metrics view handed to a [`MeterRegistrar`](crate::pool::MeterRegistrar).
pub trait ConnectionPoolMetrics: Send + Sync {
    fn acquired_size(&self) -> usize;

    fn allocated_size(&self) -> usize;

    fn idle_size(&self) -> usize;

    fn pending_acquire_size(&self) -> usize;

    fn max_allocated_size(&self) -> usize;

    fn max_pending_acquire_size(&self) -> usize;

    fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            acquired: self.acquired_size(),
            allocated: self.allocated_size(),
            idle: self.idle_size(),
            pending_acquire: self.pending_acquire_size(),
            max_allocated: self.max_allocated_size(),
            max_pending_acquire: self.max_pending_acquire_size(),
        }
    }
}

/// Point-in-time copy of the six counters, for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolMetricsSnapshot {
    pub acquired: usize,
    pub allocated: usize,
    pub idle: usize,
    pub pending_acquire: usize,
    pub max_allocated: usize,
    pub max_pending_acquire: usize,
}

/// Pass-through from a pool's own counters to [`ConnectionPoolMetrics`].
#[derive(Clone)]
pub struct ConnectionPoolWrapper {
    delegate: Arc<dyn PoolMetrics>,
}

impl ConnectionPoolWrapper {
    pub fn new(delegate: Arc<dyn PoolMetrics>) -> Self {
        Self { delegate }
    }
}

impl ConnectionPoolMetrics for ConnectionPoolWrapper {
    fn acquired_size(&self) -> usize {
        self.delegate.acquired_size()
    }

    fn allocated_size(&self) -> usize {
        self.delegate.allocated_size()
    }

    fn idle_size(&self) -> usize {
        self.delegate.idle_size()
    }

    fn pending_acquire_size(&self) -> usize {
        self.delegate.pending_acquire_size()
    }

    fn max_allocated_size(&self) -> usize {
        self.delegate.max_allocated_size()
    }

    fn max_pending_acquire_size(&self) -> usize {
        self.delegate.max_pending_acquire_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        acquired: AtomicUsize,
        idle: AtomicUsize,
    }

    impl PoolMetrics for Counters {
        fn acquired_size(&self) -> usize {
            self.acquired.load(Ordering::Relaxed)
        }

        fn allocated_size(&self) -> usize {
            self.acquired_size() + self.idle_size()
        }

        fn idle_size(&self) -> usize {
            self.idle.load(Ordering::Relaxed)
        }

        fn pending_acquire_size(&self) -> usize {
            0
        }

        fn max_allocated_size(&self) -> usize {
            usize::MAX
        }

        fn max_pending_acquire_size(&self) -> usize {
            8
        }
    }

    #[test]
    fn wrapper_reads_live_values() {
        let counters = Arc::new(Counters::default());
        let view = ConnectionPoolWrapper::new(counters.clone());

        assert_eq!(view.acquired_size(), 0);
        counters.acquired.store(3, Ordering::Relaxed);
        counters.idle.store(2, Ordering::Relaxed);

        assert_eq!(view.acquired_size(), 3);
        assert_eq!(view.idle_size(), 2);
        assert_eq!(view.allocated_size(), 5);
        assert_eq!(view.max_allocated_size(), usize::MAX);
        assert_eq!(view.max_pending_acquire_size(), 8);
    }

    #[test]
    fn snapshot_copies_all_six() {
        let counters = Arc::new(Counters::default());
        counters.acquired.store(1, Ordering::Relaxed);
        let snapshot = ConnectionPoolWrapper::new(counters).snapshot();
        assert_eq!(
            snapshot,
            PoolMetricsSnapshot {
                acquired: 1,
                allocated: 1,
                idle: 0,
                pending_acquire: 0,
                max_allocated: usize::MAX,
                max_pending_acquire: 8,
            }
        );
    }
}
