//! tlsgate (v1)
//!
//! TLS client probe and echo server built on the `tlsgate` library.
//!
//! # Architecture Overview
//!
//! ```text
//!   probe:  targets ──▶ ConnectionProvider ──▶ pool ──▶ Connection (TCP + TLS pipeline) ──▶ JSON report
//!   serve:  Listener ──▶ Connection (TLS pipeline) ──▶ echo task ──▶ close_notify on shutdown
//!
//!   cross-cutting: config (TOML) · observability (tracing, metrics) · lifecycle (signals)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::net::TcpStream;

use tlsgate::config::{load_config, GatewayConfig, TargetConfig};
use tlsgate::lifecycle::{self, Shutdown};
use tlsgate::net::{ConnectOptions, Connection, ConnectionPermit, Listener, RemoteAddress};
use tlsgate::observability::{self, ChannelMetricsRecorder, MetricsRecorder};
use tlsgate::pool::{ConnectionProvider, GaugeRegistrar, MeterRegistrar, PoolMetricsSnapshot};
use tlsgate::tls::settings::ssl_configuration_from;
use tlsgate::tls::{SslConfiguration, TlsDefaults};

#[derive(Parser)]
#[command(name = "tlsgate")]
#[command(about = "TLS handshake probe and echo server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "tlsgate.toml")]
    config: PathBuf,

    /// Overrides observability.log_level.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handshake with each configured target and print a JSON report
    Probe {
        /// Probe this `host:port` instead of the configured targets
        #[arg(long)]
        target: Option<String>,
    },
    /// Run a TLS echo server until interrupted
    Serve,
}

#[derive(Serialize)]
struct ProbeReport {
    name: String,
    address: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    elapsed_ms: u64,
    alpn: Option<String>,
    tls_version: Option<String>,
    cipher_suite: Option<String>,
    pool: Option<PoolMetricsSnapshot>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let defaults = TlsDefaults::from_env()?;
    let mut config = load_config(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    observability::logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "tlsgate starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => observability::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let ssl = ssl_configuration_from(&config.tls, defaults)?;
    tracing::info!(ssl = %ssl, "TLS configuration ready");

    match cli.command {
        Commands::Probe { target } => probe(&config, ssl, target).await?,
        Commands::Serve => serve(&config, ssl).await?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn connect_options(config: &GatewayConfig, ssl: SslConfiguration) -> ConnectOptions {
    let mut options = ConnectOptions::new()
        .with_ssl(ssl)
        .with_wiretap(config.tls.wiretap, config.tls.debug)
        .with_connect_timeout(Duration::from_millis(config.pool.connect_timeout_ms));
    if config.observability.metrics_enabled {
        options = options.with_metrics(Arc::new(MetricsRecorder) as Arc<dyn ChannelMetricsRecorder>);
    }
    options
}

async fn probe(
    config: &GatewayConfig,
    ssl: SslConfiguration,
    target: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let targets = match target {
        Some(address) => vec![TargetConfig {
            name: address.clone(),
            address,
        }],
        None => config.targets.clone(),
    };
    if targets.is_empty() {
        return Err("no targets configured; add [[targets]] or pass --target".into());
    }

    let registrar = Arc::new(GaugeRegistrar::new());
    let provider = {
        let registrar = registrar.clone();
        ConnectionProvider::builder_from(&config.pool)
            .metrics(config.pool.metrics_enabled, move || registrar.clone() as Arc<dyn MeterRegistrar>)
            .build()
    };
    let options = connect_options(config, ssl);

    let mut reports = Vec::with_capacity(targets.len());
    for target in targets {
        let remote = RemoteAddress::parse(&target.address);
        let started = Instant::now();
        let acquired = provider.acquire(&remote, &options).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let report = match acquired {
            Ok(conn) => {
                tracing::info!(target = %target.name, alpn = ?conn.alpn_protocol(), "Probe succeeded");
                ProbeReport {
                    name: target.name,
                    address: target.address,
                    outcome: "ok",
                    error: None,
                    elapsed_ms,
                    alpn: conn.alpn_protocol(),
                    tls_version: conn.tls_version(),
                    cipher_suite: conn.cipher_suite(),
                    pool: provider.metrics(&remote).map(|m| m.snapshot()),
                }
            }
            Err(e) => {
                tracing::warn!(target = %target.name, error = %e, "Probe failed");
                ProbeReport {
                    name: target.name,
                    address: target.address,
                    outcome: "error",
                    error: Some(e.to_string()),
                    elapsed_ms,
                    alpn: None,
                    tls_version: None,
                    cipher_suite: None,
                    pool: provider.metrics(&remote).map(|m| m.snapshot()),
                }
            }
        };
        reports.push(report);
    }

    registrar.publish();
    println!("{}", serde_json::to_string_pretty(&reports)?);
    provider.dispose();
    Ok(())
}

async fn serve(config: &GatewayConfig, ssl: SslConfiguration) -> Result<(), Box<dyn std::error::Error>> {
    let listener = Listener::bind(&config.listener).await?;
    let options = Arc::new(connect_options(config, ssl));
    let shutdown = Shutdown::new();
    tokio::spawn(lifecycle::wait_for_signal(shutdown.clone()));

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote, permit)) => {
                    tokio::spawn(echo(stream, remote, permit, options.clone(), shutdown.clone()));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }

    let in_flight = listener.max_connections() - listener.available_permits();
    tracing::info!(in_flight, "Listener stopped");
    Ok(())
}

async fn echo(
    stream: TcpStream,
    remote: RemoteAddress,
    _permit: ConnectionPermit,
    options: Arc<ConnectOptions>,
    shutdown: Shutdown,
) {
    let mut conn = match Connection::establish(stream, remote.clone(), &options).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(remote_address = %remote, error = %e, "Handshake failed");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            read = conn.read() => match read {
                Ok(Some(data)) => {
                    if let Err(e) = conn.write(data).await {
                        tracing::debug!(connection_id = %conn.id(), error = %e, "Echo write failed");
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(connection_id = %conn.id(), error = %e, "Echo read failed");
                    return;
                }
            },
        }
    }

    let id = conn.id();
    if let Err(e) = conn.close().await {
        tracing::debug!(connection_id = %id, error = %e, "Close failed");
    }
}
