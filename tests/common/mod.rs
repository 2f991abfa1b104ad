//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tlsgate::net::{ConnectOptions, Connection, RemoteAddress};
use tlsgate::observability::ChannelMetricsRecorder;
use tlsgate::pipeline::{Inbound, Pipeline};
use tlsgate::tls::{DefaultProfile, RustlsContextBuilder, SslConfiguration};

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name)
}

pub fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture_path(name)).unwrap()
}

pub fn server_ssl(profile: DefaultProfile) -> SslConfiguration {
    SslConfiguration::builder()
        .context_builder(RustlsContextBuilder::server(fixture("server.pem"), fixture("server.key")))
        .default_configuration(profile)
        .build()
        .unwrap()
}

pub fn client_ssl(ca: &str, profile: DefaultProfile, handshake_timeout: Duration) -> SslConfiguration {
    SslConfiguration::builder()
        .context_builder(RustlsContextBuilder::client().with_root_certificates_pem(fixture(ca)))
        .default_configuration(profile)
        .handshake_timeout(handshake_timeout)
        .build()
        .unwrap()
}

/// One recorded metric call.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub remote: RemoteAddress,
    pub status: String,
    pub elapsed: Duration,
}

/// Recorder that keeps every call for later assertions.
#[derive(Default)]
pub struct CapturingRecorder {
    pub handshakes: Mutex<Vec<Record>>,
    pub connects: Mutex<Vec<Record>>,
    pub received: Mutex<usize>,
    pub sent: Mutex<usize>,
}

impl CapturingRecorder {
    pub fn handshakes(&self) -> Vec<Record> {
        self.handshakes.lock().unwrap().clone()
    }

    pub fn connects(&self) -> Vec<Record> {
        self.connects.lock().unwrap().clone()
    }
}

impl ChannelMetricsRecorder for CapturingRecorder {
    fn record_tls_handshake_time(&self, remote: &RemoteAddress, elapsed: Duration, status: &str) {
        self.handshakes.lock().unwrap().push(Record {
            remote: remote.clone(),
            status: status.to_string(),
            elapsed,
        });
    }

    fn record_connect_time(&self, remote: &RemoteAddress, elapsed: Duration, status: &str) {
        self.connects.lock().unwrap().push(Record {
            remote: remote.clone(),
            status: status.to_string(),
            elapsed,
        });
    }

    fn record_data_received(&self, _remote: &RemoteAddress, bytes: usize) {
        *self.received.lock().unwrap() += bytes;
    }

    fn record_data_sent(&self, _remote: &RemoteAddress, bytes: usize) {
        *self.sent.lock().unwrap() += bytes;
    }
}

/// Shuttle transport bytes between two pipelines until neither has output.
pub fn pump(a: &mut Pipeline, b: &mut Pipeline) {
    for _ in 0..64 {
        let from_a = a.take_outbound();
        let from_b = b.take_outbound();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        for msg in from_a {
            b.fire_read(msg);
        }
        b.fire_read_complete();
        for msg in from_b {
            a.fire_read(msg);
        }
        a.fire_read_complete();
    }
    panic!("pipelines did not go quiet");
}

pub fn saw_active(events: &[Inbound]) -> bool {
    events.iter().any(|e| matches!(e, Inbound::Active))
}

pub fn saw_exception(events: &[Inbound]) -> bool {
    events.iter().any(|e| matches!(e, Inbound::ExceptionCaught(_)))
}

/// Start a server that echoes plaintext over `options` (TLS when `ssl` is set).
pub async fn start_echo_server(options: ConnectOptions) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let options = Arc::new(options);

    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let options = options.clone();
            tokio::spawn(async move {
                let Ok(mut conn) = Connection::establish(stream, RemoteAddress::from(peer), &options).await else {
                    return;
                };
                while let Ok(Some(data)) = conn.read().await {
                    if conn.write(data).await.is_err() {
                        return;
                    }
                }
                let _ = conn.close().await;
            });
        }
    });
    addr
}

/// Plain TCP echo server without any pipeline.
pub async fn start_raw_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}
