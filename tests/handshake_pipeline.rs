//! Handshakes between two in-memory pipelines.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tlsgate::net::{ConnectionId, RemoteAddress};
use tlsgate::observability::ChannelMetricsRecorder;
use tlsgate::pipeline::{ChannelMetricsHandler, Inbound, Pipeline, StageName};
use tlsgate::tls::{self, DefaultProfile, RustlsHandler, SslConfiguration, TlsError};

mod common;
use common::{client_ssl, pump, saw_active, saw_exception, server_ssl, CapturingRecorder};

fn pipeline(remote: RemoteAddress, ssl: &SslConfiguration, recorder: &Arc<CapturingRecorder>) -> Pipeline {
    let mut p = Pipeline::new(ConnectionId::new(), Some(remote.clone()));
    p.add_last(
        StageName::ChannelMetricsHandler,
        ChannelMetricsHandler::new(recorder.clone() as Arc<dyn ChannelMetricsRecorder>),
    )
    .unwrap();
    tls::install(&mut p, Some(&remote), ssl, false).unwrap();
    p.fire_registered();
    p.fire_channel_active();
    p
}

fn client_remote() -> RemoteAddress {
    RemoteAddress::inet("localhost", 8443)
}

fn server_remote() -> RemoteAddress {
    RemoteAddress::inet("127.0.0.1", 50000)
}

#[test]
fn handshake_succeeds_and_records_once_per_side() {
    let client_rec = Arc::new(CapturingRecorder::default());
    let server_rec = Arc::new(CapturingRecorder::default());
    let mut client = pipeline(
        client_remote(),
        &client_ssl("ca.pem", DefaultProfile::Tcp, Duration::from_secs(5)),
        &client_rec,
    );
    let mut server = pipeline(server_remote(), &server_ssl(DefaultProfile::Tcp), &server_rec);

    pump(&mut client, &mut server);

    assert!(saw_active(&client.take_inbound()));
    assert!(saw_active(&server.take_inbound()));

    let records = client_rec.handshakes();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, "success");
    assert_eq!(records[0].remote, client_remote());

    let records = server_rec.handshakes();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].remote, server_remote());

    assert!(!client.contains(StageName::SslReader));
    assert!(!server.contains(StageName::SslReader));
}

#[test]
fn h2_profile_negotiates_h2() {
    let rec = Arc::new(CapturingRecorder::default());
    let mut client = pipeline(
        client_remote(),
        &client_ssl("ca.pem", DefaultProfile::H2, Duration::from_secs(5)),
        &rec,
    );
    let mut server = pipeline(server_remote(), &server_ssl(DefaultProfile::H2), &rec);

    pump(&mut client, &mut server);

    let handler = client.get::<RustlsHandler>(StageName::SslHandler).unwrap();
    assert!(handler.is_established());
    assert_eq!(handler.alpn_protocol().as_deref(), Some("h2"));
    assert!(handler.cipher_suite().is_some());
}

#[test]
fn untrusted_server_fails_with_error_record() {
    let rec = Arc::new(CapturingRecorder::default());
    let mut client = pipeline(
        client_remote(),
        &client_ssl("other-ca.pem", DefaultProfile::Tcp, Duration::from_secs(5)),
        &rec,
    );
    let mut server = pipeline(server_remote(), &server_ssl(DefaultProfile::Tcp), &Arc::new(CapturingRecorder::default()));

    pump(&mut client, &mut server);

    let events = client.take_inbound();
    assert!(saw_exception(&events));
    assert!(!saw_active(&events));
    assert!(client.is_close_requested());

    let cause = events
        .iter()
        .find_map(|e| match e {
            Inbound::ExceptionCaught(cause) => Some(cause.clone()),
            _ => None,
        })
        .unwrap();
    assert!(matches!(cause.downcast_ref::<TlsError>(), Some(TlsError::Handshake(_))));

    let records = rec.handshakes();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, "error");
}

#[test]
fn silent_peer_times_out_on_tick() {
    let rec = Arc::new(CapturingRecorder::default());
    let mut client = pipeline(
        client_remote(),
        &client_ssl("ca.pem", DefaultProfile::Tcp, Duration::from_millis(100)),
        &rec,
    );
    // ClientHello goes nowhere.
    assert!(!client.take_outbound().is_empty());

    client.fire_tick(Instant::now());
    assert!(rec.handshakes().is_empty());

    client.fire_tick(Instant::now() + Duration::from_secs(1));
    let events = client.take_inbound();
    let timed_out = events.iter().any(|e| match e {
        Inbound::ExceptionCaught(cause) => {
            matches!(cause.downcast_ref::<TlsError>(), Some(TlsError::HandshakeTimeout(d)) if *d == Duration::from_millis(100))
        }
        _ => false,
    });
    assert!(timed_out);

    // A second tick past the deadline does not report again.
    client.fire_tick(Instant::now() + Duration::from_secs(2));
    let records = rec.handshakes();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, "error");
}

#[test]
fn zero_timeout_never_fires() {
    let rec = Arc::new(CapturingRecorder::default());
    let mut client = pipeline(client_remote(), &client_ssl("ca.pem", DefaultProfile::Tcp, Duration::ZERO), &rec);

    client.fire_tick(Instant::now() + Duration::from_secs(3600));
    assert!(!saw_exception(&client.take_inbound()));
    assert!(rec.handshakes().is_empty());
}

#[test]
fn application_data_flows_after_handshake() {
    let rec = Arc::new(CapturingRecorder::default());
    let mut client = pipeline(
        client_remote(),
        &client_ssl("ca.pem", DefaultProfile::Tcp, Duration::from_secs(5)),
        &rec,
    );
    let mut server = pipeline(server_remote(), &server_ssl(DefaultProfile::Tcp), &rec);
    pump(&mut client, &mut server);
    server.take_inbound();

    client.write(bytes::Bytes::from_static(b"hello"));
    pump(&mut client, &mut server);

    let received: Vec<u8> = server
        .take_inbound()
        .into_iter()
        .filter_map(|e| match e {
            Inbound::Read(data) => Some(data.to_vec()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(received, b"hello");
}
