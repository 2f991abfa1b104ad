//! Per-remote connection pool.
//!
//! # Responsibilities
//! - Hand out idle connections before opening new ones
//! - Bound live connections and waiting acquires
//! - Keep the counters behind [`PoolMetrics`]
//!
//! # Design Decisions
//! - Slots are reserved with a compare-exchange loop on the allocated count
//! - Waiters park on a `Notify` and retry whenever a slot or idle connection frees up
//! - A reserved slot is held by a guard until its connection is handed out, so an
//!   acquire dropped mid-connect gives the slot back
//! - No eviction: an idle connection stays until it is reused or the pool is disposed

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::net::{ConnectError, ConnectOptions, Connection, ConnectionId, RemoteAddress};
use crate::observability::metrics::{STATUS_ERROR, STATUS_SUCCESS};
use crate::pool::{PoolError, PoolMetrics};

static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Limits applied to every pool of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// `None` means unbounded.
    pub max_connections: Option<usize>,
    /// `None` means unbounded.
    pub pending_acquire_max: Option<usize>,
    pub pending_acquire_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_connections: Some(16),
            pending_acquire_max: None,
            pending_acquire_timeout: Duration::from_secs(45),
        }
    }
}

enum Slot {
    Idle(Connection<TcpStream>),
    Fresh,
}

/// Connections to a single remote address.
pub struct ConnectionPool {
    id: String,
    remote: RemoteAddress,
    limits: PoolLimits,
    allocated: AtomicUsize,
    acquired: AtomicUsize,
    idle_count: AtomicUsize,
    pending: AtomicUsize,
    idle: Mutex<VecDeque<Connection<TcpStream>>>,
    released: Notify,
    disposed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(remote: RemoteAddress, limits: PoolLimits) -> Self {
        let id = format!("{:x}", POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed));
        Self {
            id,
            remote,
            limits,
            allocated: AtomicUsize::new(0),
            acquired: AtomicUsize::new(0),
            idle_count: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            idle: Mutex::new(VecDeque::new()),
            released: Notify::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Identifier reported to meter registrars.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote(&self) -> &RemoteAddress {
        &self.remote
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Get a connection: an idle one, a new one within the limit, or wait.
    pub async fn acquire(self: &Arc<Self>, options: &ConnectOptions) -> Result<PooledConnection, PoolError> {
        self.ensure_live()?;
        let slot = match self.try_slot() {
            Some(slot) => slot,
            None => self.wait_for_slot().await?,
        };

        match slot {
            Slot::Idle(conn) => {
                tracing::trace!(pool_id = %self.id, connection_id = %conn.id(), "Reusing idle connection");
                Ok(PooledConnection::new(Arc::clone(self), conn, true))
            }
            Slot::Fresh => self.allocate(options).await,
        }
    }

    /// Close idle connections and refuse further acquires.
    ///
    /// Acquired connections are closed when they are released.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<_> = self.lock_idle().drain(..).collect();
        self.idle_count.fetch_sub(drained.len(), Ordering::AcqRel);
        self.allocated.fetch_sub(drained.len(), Ordering::AcqRel);
        self.released.notify_waiters();
        tracing::debug!(pool_id = %self.id, remote_address = %self.remote, closed = drained.len(), "Pool disposed");
    }

    fn ensure_live(&self) -> Result<(), PoolError> {
        if self.is_disposed() {
            Err(PoolError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Counts the slot as acquired on success.
    fn try_slot(&self) -> Option<Slot> {
        if let Some(conn) = self.pop_idle() {
            self.acquired.fetch_add(1, Ordering::AcqRel);
            return Some(Slot::Idle(conn));
        }
        if self.try_reserve() {
            self.acquired.fetch_add(1, Ordering::AcqRel);
            return Some(Slot::Fresh);
        }
        None
    }

    fn try_reserve(&self) -> bool {
        let Some(max) = self.limits.max_connections else {
            self.allocated.fetch_add(1, Ordering::AcqRel);
            return true;
        };
        let mut prev = self.allocated.load(Ordering::Acquire);
        loop {
            if prev >= max {
                return false;
            }
            match self
                .allocated
                .compare_exchange_weak(prev, prev + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => prev = actual,
            }
        }
    }

    fn enter_pending(&self) -> Result<PendingGuard<'_>, PoolError> {
        let mut prev = self.pending.load(Ordering::Acquire);
        loop {
            if let Some(max) = self.limits.pending_acquire_max {
                if prev >= max {
                    return Err(PoolError::PendingAcquireLimit { max });
                }
            }
            match self
                .pending
                .compare_exchange_weak(prev, prev + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(PendingGuard { pending: &self.pending }),
                Err(actual) => prev = actual,
            }
        }
    }

    async fn wait_for_slot(&self) -> Result<Slot, PoolError> {
        let _pending = self.enter_pending()?;
        let timeout = self.limits.pending_acquire_timeout;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_live()?;
            if let Some(slot) = self.try_slot() {
                return Ok(slot);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::debug!(pool_id = %self.id, remote_address = %self.remote, "Pending acquire timed out");
                return Err(PoolError::PendingAcquireTimeout(timeout));
            }
        }
    }

    async fn allocate(self: &Arc<Self>, options: &ConnectOptions) -> Result<PooledConnection, PoolError> {
        let guard = SlotGuard {
            pool: Arc::clone(self),
            armed: true,
        };
        let conn = open(&self.remote, options).await?;
        Ok(guard.into_connection(conn))
    }

    /// Return a slot; `Some` parks the connection as idle.
    fn release(&self, conn: Option<Connection<TcpStream>>) {
        self.acquired.fetch_sub(1, Ordering::AcqRel);
        match conn {
            Some(conn) if !self.is_disposed() => {
                self.lock_idle().push_back(conn);
                self.idle_count.fetch_add(1, Ordering::AcqRel);
            }
            _ => {
                self.allocated.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.released.notify_one();
    }

    fn pop_idle(&self) -> Option<Connection<TcpStream>> {
        let conn = self.lock_idle().pop_front()?;
        self.idle_count.fetch_sub(1, Ordering::AcqRel);
        Some(conn)
    }

    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<Connection<TcpStream>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PoolMetrics for ConnectionPool {
    fn acquired_size(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    fn allocated_size(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    fn idle_size(&self) -> usize {
        self.idle_count.load(Ordering::Acquire)
    }

    fn pending_acquire_size(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn max_allocated_size(&self) -> usize {
        self.limits.max_connections.unwrap_or(usize::MAX)
    }

    fn max_pending_acquire_size(&self) -> usize {
        self.limits.pending_acquire_max.unwrap_or(usize::MAX)
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("allocated", &self.allocated_size())
            .field("acquired", &self.acquired_size())
            .field("idle", &self.idle_size())
            .field("pending", &self.pending_acquire_size())
            .finish()
    }
}

struct PendingGuard<'a> {
    pending: &'a AtomicUsize,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Reserved slot that is given back unless it becomes a [`PooledConnection`].
struct SlotGuard {
    pool: Arc<ConnectionPool>,
    armed: bool,
}

impl SlotGuard {
    fn into_connection(mut self, conn: Connection<TcpStream>) -> PooledConnection {
        self.armed = false;
        PooledConnection::new(Arc::clone(&self.pool), conn, false)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::trace!(pool_id = %self.pool.id, "Returning unused slot");
            self.pool.release(None);
        }
    }
}

/// Open a TCP connection to `remote` and establish its pipeline.
async fn open(remote: &RemoteAddress, options: &ConnectOptions) -> Result<Connection<TcpStream>, ConnectError> {
    let (host, port) = remote.host_port().ok_or_else(|| {
        ConnectError::from(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot connect to non-inet address {}", remote),
        ))
    })?;

    let started = Instant::now();
    let connected = match tokio::time::timeout(options.connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ConnectError::from(e)),
        Err(_) => Err(ConnectError::Timeout(options.connect_timeout)),
    };
    if let Some(recorder) = &options.metrics {
        let status = if connected.is_ok() { STATUS_SUCCESS } else { STATUS_ERROR };
        recorder.record_connect_time(remote, started.elapsed(), status);
    }

    let stream = connected?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(remote_address = %remote, error = %e, "Failed to set TCP_NODELAY");
    }
    Connection::establish(stream, remote.clone(), options).await
}

/// A connection borrowed from a [`ConnectionPool`].
///
/// Dropping it parks the connection as idle. After an I/O error, end of
/// stream or [`invalidate`](Self::invalidate) it is closed instead.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Connection<TcpStream>>,
    id: ConnectionId,
    reused: bool,
    reusable: bool,
}

impl PooledConnection {
    fn new(pool: Arc<ConnectionPool>, conn: Connection<TcpStream>, reused: bool) -> Self {
        Self {
            pool,
            id: conn.id(),
            conn: Some(conn),
            reused,
            reusable: true,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> &RemoteAddress {
        self.pool.remote()
    }

    /// Whether this connection came from the idle queue.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn alpn_protocol(&self) -> Option<String> {
        self.conn.as_ref().and_then(Connection::alpn_protocol)
    }

    pub fn tls_version(&self) -> Option<String> {
        self.conn.as_ref().and_then(Connection::tls_version)
    }

    pub fn cipher_suite(&self) -> Option<String> {
        self.conn.as_ref().and_then(Connection::cipher_suite)
    }

    pub async fn write(&mut self, data: Bytes) -> Result<(), ConnectError> {
        let conn = self.conn.as_mut().ok_or(ConnectError::Closed)?;
        let result = conn.write(data).await;
        if result.is_err() {
            self.reusable = false;
        }
        result
    }

    /// Read plaintext; `None` once the peer has closed.
    pub async fn read(&mut self) -> Result<Option<Bytes>, ConnectError> {
        let conn = self.conn.as_mut().ok_or(ConnectError::Closed)?;
        let result = conn.read().await;
        if !matches!(result, Ok(Some(_))) {
            self.reusable = false;
        }
        result
    }

    /// Do not return this connection to the pool.
    pub fn invalidate(&mut self) {
        self.reusable = false;
    }

    /// Close the connection gracefully and free its slot.
    pub async fn close(mut self) -> Result<(), ConnectError> {
        let conn = self.conn.take().ok_or(ConnectError::Closed)?;
        self.pool.release(None);
        conn.close().await
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let keep = self.reusable.then_some(conn);
            self.pool.release(keep);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("pool_id", &self.pool.id())
            .field("reused", &self.reused)
            .field("reusable", &self.reusable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: Option<usize>, pending: Option<usize>) -> PoolLimits {
        PoolLimits {
            max_connections: max,
            pending_acquire_max: pending,
            pending_acquire_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn unbounded_limits_report_max() {
        let pool = ConnectionPool::new(RemoteAddress::inet("localhost", 1), limits(None, None));
        assert_eq!(pool.max_allocated_size(), usize::MAX);
        assert_eq!(pool.max_pending_acquire_size(), usize::MAX);
        assert_eq!(pool.allocated_size(), 0);
    }

    #[test]
    fn pool_ids_are_unique() {
        let a = ConnectionPool::new(RemoteAddress::inet("h", 1), PoolLimits::default());
        let b = ConnectionPool::new(RemoteAddress::inet("h", 1), PoolLimits::default());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn reserve_respects_max() {
        let pool = ConnectionPool::new(RemoteAddress::inet("h", 1), limits(Some(2), None));
        assert!(pool.try_reserve());
        assert!(pool.try_reserve());
        assert!(!pool.try_reserve());
        assert_eq!(pool.allocated_size(), 2);
    }

    #[test]
    fn pending_limit_is_enforced_and_released() {
        let pool = ConnectionPool::new(RemoteAddress::inet("h", 1), limits(Some(1), Some(1)));
        let guard = pool.enter_pending().unwrap();
        assert_eq!(pool.pending_acquire_size(), 1);
        assert!(matches!(pool.enter_pending(), Err(PoolError::PendingAcquireLimit { max: 1 })));
        drop(guard);
        assert_eq!(pool.pending_acquire_size(), 0);
    }

    #[tokio::test]
    async fn failed_connect_frees_the_slot() {
        let pool = Arc::new(ConnectionPool::new(RemoteAddress::inet("localhost", 0), limits(Some(1), None)));
        let err = pool.acquire(&ConnectOptions::new()).await.unwrap_err();
        assert!(matches!(err, PoolError::Connect(_)));
        assert_eq!(pool.allocated_size(), 0);
        assert_eq!(pool.acquired_size(), 0);
    }

    #[tokio::test]
    async fn opaque_remote_cannot_connect() {
        let pool = Arc::new(ConnectionPool::new(RemoteAddress::Opaque("local".into()), limits(None, None)));
        let err = pool.acquire(&ConnectOptions::new()).await.unwrap_err();
        assert!(matches!(err, PoolError::Connect(ConnectError::Io(_))));
    }

    #[tokio::test]
    async fn full_pool_times_out_pending_acquire() {
        let pool = Arc::new(ConnectionPool::new(RemoteAddress::inet("localhost", 0), limits(Some(1), None)));
        assert!(pool.try_reserve());

        let err = pool.acquire(&ConnectOptions::new()).await.unwrap_err();
        assert!(matches!(err, PoolError::PendingAcquireTimeout(_)));
        assert_eq!(pool.pending_acquire_size(), 0);
    }

    #[tokio::test]
    async fn disposed_pool_refuses_acquire() {
        let pool = Arc::new(ConnectionPool::new(RemoteAddress::inet("localhost", 0), limits(None, None)));
        pool.dispose();
        pool.dispose();
        assert!(matches!(pool.acquire(&ConnectOptions::new()).await, Err(PoolError::Disposed)));
    }
}
