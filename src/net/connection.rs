//! Connection driver.
//!
//! # Responsibilities
//! - Build the per-connection pipeline (metrics, wire logging, TLS)
//! - Move bytes between the socket and the pipeline
//! - Drive handshake timeouts with periodic ticks
//! - Generate unique connection IDs for tracing
//!
//! # Design Decisions
//! - The pipeline is owned by the task that owns the socket; nothing is shared
//! - The socket is only read when a stage asked for a read
//! - Handshake outcome is observed at the tail: `channel_active` or `exception_caught`

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;

use crate::net::RemoteAddress;
use crate::observability::ChannelMetricsRecorder;
use crate::pipeline::{Cause, ChannelMetricsHandler, Inbound, LoggingHandler, Pipeline, StageName, UserEvent};
use crate::tls::{self, RustlsHandler, SslConfiguration, TimingPolicy, TlsError};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Interval between `tick` events while a handshake is in flight.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Error type for connection establishment and I/O.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Handshake or pipeline failure; carries the original cause.
    #[error("TLS error: {0}")]
    Tls(Cause),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,
}

impl From<io::Error> for ConnectError {
    fn from(e: io::Error) -> Self {
        ConnectError::Io(Arc::new(e))
    }
}

impl From<TlsError> for ConnectError {
    fn from(e: TlsError) -> Self {
        ConnectError::Tls(Arc::new(e))
    }
}

impl ConnectError {
    /// The underlying TLS error, if this failure came from the TLS layer.
    pub fn tls_error(&self) -> Option<&TlsError> {
        match self {
            ConnectError::Tls(cause) => cause.downcast_ref::<TlsError>(),
            _ => None,
        }
    }
}

/// What to install on a new connection.
#[derive(Clone)]
pub struct ConnectOptions {
    pub ssl: Option<SslConfiguration>,
    pub metrics: Option<Arc<dyn ChannelMetricsRecorder>>,
    /// Add wire logging.
    pub wiretap: bool,
    /// Add TLS record logging (only with `wiretap`).
    pub ssl_debug: bool,
    /// Bound on TCP connect plus handshake.
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self {
            ssl: None,
            metrics: None,
            wiretap: false,
            ssl_debug: false,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_ssl(mut self, ssl: SslConfiguration) -> Self {
        self.ssl = Some(ssl);
        self
    }

    pub fn with_metrics(mut self, recorder: Arc<dyn ChannelMetricsRecorder>) -> Self {
        self.metrics = Some(recorder);
        self
    }

    pub fn with_wiretap(mut self, wiretap: bool, ssl_debug: bool) -> Self {
        self.wiretap = wiretap;
        self.ssl_debug = ssl_debug;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("ssl", &self.ssl.as_ref().map(|s| s.to_string()))
            .field("metrics", &self.metrics.is_some())
            .field("wiretap", &self.wiretap)
            .field("ssl_debug", &self.ssl_debug)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// An established connection: socket plus pipeline.
pub struct Connection<S> {
    id: ConnectionId,
    remote: RemoteAddress,
    stream: S,
    pipeline: Pipeline,
    /// Tail signals not consumed yet.
    pending: VecDeque<Inbound>,
    read_pending: bool,
    eof: bool,
    close_timing: Option<TimingPolicy>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Build the pipeline over `stream` and run it until the connection is
    /// active (handshake done) or has failed.
    pub async fn establish(stream: S, remote: RemoteAddress, options: &ConnectOptions) -> Result<Self, ConnectError> {
        let id = ConnectionId::new();
        let mut pipeline = Pipeline::new(id, Some(remote.clone()));

        if let Some(recorder) = &options.metrics {
            pipeline
                .add_last(StageName::ChannelMetricsHandler, ChannelMetricsHandler::new(Arc::clone(recorder)))
                .map_err(TlsError::from)?;
        }
        if options.wiretap {
            pipeline
                .add_first(StageName::LoggingHandler, LoggingHandler::new())
                .map_err(TlsError::from)?;
        }
        if let Some(ssl) = &options.ssl {
            tls::install(&mut pipeline, Some(&remote), ssl, options.ssl_debug)?;
        }

        tracing::debug!(
            connection_id = %id,
            remote_address = %remote,
            stages = ?pipeline.names(),
            "Connection pipeline ready"
        );

        let mut conn = Self {
            id,
            remote,
            stream,
            pipeline,
            pending: VecDeque::new(),
            read_pending: false,
            eof: false,
            close_timing: options.ssl.as_ref().map(|s| *s.timing()),
        };
        conn.pipeline.fire_registered();
        conn.pipeline.fire_channel_active();

        match tokio::time::timeout(options.connect_timeout, conn.drive_until_active()).await {
            Ok(Ok(())) => {
                tracing::debug!(connection_id = %id, alpn = ?conn.alpn_protocol(), "Connection active");
                Ok(conn)
            }
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "Connection failed");
                let _ = conn.stream.shutdown().await;
                Err(e)
            }
            Err(_) => Err(ConnectError::Timeout(options.connect_timeout)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> &RemoteAddress {
        &self.remote
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// ALPN protocol negotiated by the TLS handler, if any.
    pub fn alpn_protocol(&self) -> Option<String> {
        self.tls_handler().and_then(RustlsHandler::alpn_protocol)
    }

    pub fn tls_version(&self) -> Option<String> {
        self.tls_handler().and_then(RustlsHandler::protocol_version)
    }

    pub fn cipher_suite(&self) -> Option<String> {
        self.tls_handler().and_then(RustlsHandler::cipher_suite)
    }

    fn tls_handler(&self) -> Option<&RustlsHandler> {
        self.pipeline.get::<RustlsHandler>(StageName::SslHandler)
    }

    /// Send application data through the pipeline.
    pub async fn write(&mut self, data: Bytes) -> Result<(), ConnectError> {
        self.check_failed()?;
        self.pipeline.write(data);
        self.flush().await?;
        self.check_failed()
    }

    /// Next chunk of application data; `None` once the peer has closed.
    pub async fn read(&mut self) -> Result<Option<Bytes>, ConnectError> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            self.collect_tail();
            while let Some(signal) = self.pending.pop_front() {
                match signal {
                    Inbound::Read(data) => return Ok(Some(data)),
                    Inbound::ExceptionCaught(cause) => return Err(ConnectError::Tls(cause)),
                    Inbound::Inactive | Inbound::UserEvent(UserEvent::CloseNotifyReceived) => return Ok(None),
                    _ => {}
                }
            }
            if self.eof {
                return Ok(None);
            }
            self.pipeline.read();
            self.read_pending |= self.pipeline.take_read_request();
            self.read_once(&mut buf).await?;
            self.flush().await?;
        }
    }

    /// Send close_notify and shut the socket down.
    ///
    /// The flush is bounded by the close-notify flush timeout; with a non-zero
    /// read timeout the peer's close_notify is awaited for that long.
    pub async fn close(mut self) -> Result<(), ConnectError> {
        self.pipeline.close();
        let timing = self.close_timing;

        let flush_timeout = timing.map(|t| t.close_notify_flush_timeout()).unwrap_or_default();
        if flush_timeout.is_zero() {
            self.flush().await?;
        } else if tokio::time::timeout(flush_timeout, self.flush()).await.is_err() {
            tracing::debug!(connection_id = %self.id, timeout = ?flush_timeout, "close_notify flush timed out");
        }

        let read_timeout = timing.map(|t| t.close_notify_read_timeout()).unwrap_or_default();
        if !read_timeout.is_zero() && !self.close_notify_received() {
            if tokio::time::timeout(read_timeout, self.await_peer_close()).await.is_err() {
                tracing::debug!(connection_id = %self.id, timeout = ?read_timeout, "close_notify read timed out");
            }
        }

        let _ = self.stream.shutdown().await;
        tracing::trace!(connection_id = %self.id, "Connection closed");
        Ok(())
    }

    fn close_notify_received(&self) -> bool {
        self.tls_handler().is_some_and(RustlsHandler::is_close_notify_received)
    }

    async fn await_peer_close(&mut self) {
        loop {
            match self.read().await {
                Ok(Some(_)) => continue,
                _ => return,
            }
        }
    }

    async fn drive_until_active(&mut self) -> Result<(), ConnectError> {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            self.flush().await?;
            self.collect_tail();
            while let Some(signal) = self.pending.pop_front() {
                match signal {
                    Inbound::Active => return Ok(()),
                    Inbound::ExceptionCaught(cause) => return Err(ConnectError::Tls(cause)),
                    Inbound::Inactive => return Err(ConnectError::Closed),
                    _ => {}
                }
            }
            if self.pipeline.is_close_requested() || self.eof {
                return Err(ConnectError::Closed);
            }

            self.read_pending |= self.pipeline.take_read_request();
            let read_pending = self.read_pending;
            tokio::select! {
                result = self.stream.read(&mut buf), if read_pending => {
                    self.on_socket_read(result, &buf)?;
                }
                now = ticker.tick() => {
                    self.pipeline.fire_tick(now.into_std());
                }
            }
        }
    }

    async fn read_once(&mut self, buf: &mut [u8]) -> Result<(), ConnectError> {
        let result = self.stream.read(buf).await;
        self.on_socket_read(result, buf)
    }

    fn on_socket_read(&mut self, result: io::Result<usize>, buf: &[u8]) -> Result<(), ConnectError> {
        self.read_pending = false;
        match result? {
            0 => {
                self.eof = true;
                self.pipeline.fire_inactive();
            }
            n => {
                self.pipeline.fire_read(Bytes::copy_from_slice(&buf[..n]));
                self.pipeline.fire_read_complete();
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ConnectError> {
        let chunks = self.pipeline.take_outbound();
        if chunks.is_empty() {
            return Ok(());
        }
        for chunk in chunks {
            self.stream.write_all(&chunk).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    fn collect_tail(&mut self) {
        self.pending.extend(self.pipeline.take_inbound());
    }

    fn check_failed(&mut self) -> Result<(), ConnectError> {
        self.collect_tail();
        let failure = self.pending.iter().find_map(|s| match s {
            Inbound::ExceptionCaught(cause) => Some(Arc::clone(cause)),
            _ => None,
        });
        match failure {
            Some(cause) => Err(ConnectError::Tls(cause)),
            None => Ok(()),
        }
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
