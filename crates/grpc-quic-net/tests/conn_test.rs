//! Integration tests: a raw quinn session pair wrapped as `QuicConn`.
//!
//! Each test builds a loopback server endpoint with a self-signed
//! certificate, dials it with the insecure client config, and exchanges one
//! priming message so both ends hold the same bidirectional stream.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use grpc_quic_net::tls::config::{
    build_insecure_client_tls_config, build_quic_client_config, build_quic_server_config,
};
use grpc_quic_net::tls::{TransportSettings, ALPN_GRPC_QUIC};
use grpc_quic_net::{ConnState, QuicConn, QuicCredentials, TransportCredentials};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

const PRIMER: &[u8] = b"open";

struct Pair {
    client: QuicConn,
    server: QuicConn,
    server_addr: SocketAddr,
    server_cert: CertificateDer<'static>,
    _server_endpoint: quinn::Endpoint,
}

fn server_endpoint() -> (quinn::Endpoint, CertificateDer<'static>) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".into()]).expect("cert gen");
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let tls = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .expect("TLS 1.3")
    .with_no_client_auth()
    .with_single_cert(vec![cert.clone()], key)
    .expect("server cert");

    let config = build_quic_server_config(tls, &TransportSettings::default()).expect("quic server config");
    let endpoint =
        quinn::Endpoint::server(config, "127.0.0.1:0".parse().unwrap()).expect("server bind");
    (endpoint, cert)
}

async fn connected_pair() -> Pair {
    let (server_endpoint, server_cert) = server_endpoint();
    let server_addr = server_endpoint.local_addr().unwrap();

    let client_config = build_quic_client_config(
        build_insecure_client_tls_config().unwrap(),
        &TransportSettings::default(),
    )
    .unwrap();
    let mut client_endpoint = quinn::Endpoint::client("127.0.0.1:0".parse().unwrap()).unwrap();
    client_endpoint.set_default_client_config(client_config);

    let client_side = async {
        let session = client_endpoint
            .connect(server_addr, "localhost")
            .unwrap()
            .await
            .expect("client connect");
        let (mut send, recv) = session.open_bi().await.expect("open stream");
        send.write_all(PRIMER).await.unwrap();
        (session, send, recv)
    };
    let server_side = async {
        let session = server_endpoint
            .accept()
            .await
            .expect("incoming")
            .await
            .expect("server handshake");
        let (send, mut recv) = session.accept_bi().await.expect("accept stream");
        let mut primer = [0u8; PRIMER.len()];
        recv.read_exact(&mut primer).await.unwrap();
        assert_eq!(&primer, PRIMER);
        (session, send, recv)
    };

    let ((c_session, c_send, c_recv), (s_session, s_send, s_recv)) =
        tokio::join!(client_side, server_side);

    Pair {
        client: QuicConn::dialed(client_endpoint.clone(), c_session, c_send, c_recv),
        server: QuicConn::accepted(s_session, s_send, s_recv, Some(server_addr)),
        server_addr,
        server_cert,
        _server_endpoint: server_endpoint,
    }
}

#[tokio::test]
async fn echo_round_trip_preserves_order() {
    let pair = connected_pair().await;
    let Pair {
        mut client,
        mut server,
        ..
    } = pair;

    let echo = tokio::spawn(async move {
        let mut buf = vec![0u8; 3 * 1024];
        server.read_exact(&mut buf).await.unwrap();
        server.write_all(&buf).await.unwrap();
        server.flush().await.unwrap();
        server
    });

    let mut sent = Vec::new();
    for chunk in 0..3u8 {
        let block = vec![chunk; 1024];
        client.write_all(&block).await.unwrap();
        sent.extend_from_slice(&block);
    }
    client.flush().await.unwrap();

    let mut received = vec![0u8; sent.len()];
    client.read_exact(&mut received).await.unwrap();
    assert_eq!(received, sent);

    let server = echo.await.unwrap();
    client.close();
    server.close();
}

#[tokio::test]
async fn close_is_idempotent_and_fails_later_io() {
    let pair = connected_pair().await;
    let Pair { mut client, .. } = pair;

    assert_eq!(client.state(), ConnState::Created);
    let session = client.session().expect("open connection exposes its session");
    assert!(client.close(), "first close performs the close");
    assert!(!client.close(), "second close is a no-op");
    assert_eq!(client.state(), ConnState::Closed);

    let err = client.write_all(b"late").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);

    let mut buf = [0u8; 4];
    let err = client.read(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);

    assert!(client.session().is_none());
    assert!(matches!(
        session.close_reason(),
        Some(quinn::ConnectionError::LocallyClosed)
    ));
}

#[tokio::test]
async fn concurrent_close_has_a_single_winner() {
    let pair = connected_pair().await;
    let Pair { client, .. } = pair;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let handle = client.close_handle();
            tokio::spawn(async move { handle.close() })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(client.is_closed());
}

#[tokio::test]
async fn close_handle_wakes_pending_read() {
    let pair = connected_pair().await;
    let Pair {
        mut client,
        server: _server,
        ..
    } = pair;
    let handle = client.close_handle();

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        client.read(&mut buf).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.close());

    let err = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("read should be woken")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
}

#[tokio::test]
async fn peer_sees_session_teardown() {
    let pair = connected_pair().await;
    let Pair {
        client, mut server, ..
    } = pair;

    drop(client);

    let mut buf = [0u8; 8];
    let result = tokio::time::timeout(Duration::from_secs(5), server.read(&mut buf))
        .await
        .expect("peer read should finish");
    assert!(result.is_err(), "session teardown should surface as a read error");
}

#[tokio::test]
async fn close_releases_dialed_socket_before_drop() {
    let pair = connected_pair().await;
    let Pair { client, .. } = pair;
    let local = client.local_addr().expect("dialed local address");

    assert!(
        std::net::UdpSocket::bind(local).is_err(),
        "socket is bound while the connection is open"
    );

    assert!(client.close());

    // The endpoint driver winds down asynchronously once its last handle is gone.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match std::net::UdpSocket::bind(local) {
            Ok(_) => break,
            Err(e) if Instant::now() >= deadline => {
                panic!("{local} still bound after close: {e}")
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    assert!(client.is_closed());
}

#[tokio::test]
async fn past_read_deadline_fails_immediately() {
    let pair = connected_pair().await;
    let Pair { mut client, .. } = pair;

    client.set_read_deadline(Some(Instant::now() - Duration::from_millis(1)));

    let mut buf = [0u8; 8];
    let started = Instant::now();
    let err = client.read(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn pending_read_times_out_and_recovers_after_clearing() {
    let pair = connected_pair().await;
    let Pair {
        mut client,
        mut server,
        ..
    } = pair;

    client.set_read_deadline(Some(Instant::now() + Duration::from_millis(100)));
    let mut buf = [0u8; 5];
    let err = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("deadline should wake the read")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);

    client.set_read_deadline(None);
    server.write_all(b"later").await.unwrap();
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"later");
}

#[tokio::test]
async fn past_write_deadline_fails_immediately() {
    let pair = connected_pair().await;
    let Pair { mut client, .. } = pair;

    client.set_deadline(Some(Instant::now() - Duration::from_millis(1)));
    assert!(client.read_deadline().is_some());

    let err = client.write_all(b"payload").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);
}

#[tokio::test]
async fn addresses_come_from_the_session() {
    let pair = connected_pair().await;
    let Pair {
        client,
        server,
        server_addr,
        ..
    } = pair;

    assert_eq!(client.remote_addr(), server_addr);
    assert_eq!(server.local_addr(), Some(server_addr));
    assert_eq!(Some(server.remote_addr()), client.local_addr());
}

#[tokio::test]
async fn credentials_pass_connection_through() {
    let pair = connected_pair().await;
    let Pair {
        client,
        server,
        server_cert,
        ..
    } = pair;

    let creds = QuicCredentials::new();
    let (client, client_info) = creds.client_handshake("localhost:443", client).unwrap();
    assert_eq!(client.state(), ConnState::Secured);
    assert_eq!(client_info.alpn.as_deref(), Some(ALPN_GRPC_QUIC));
    assert_eq!(client_info.peer_certificate(), Some(&server_cert));
    assert!(client.auth_info().is_some());

    let (server, server_info) = creds.server_handshake(server).unwrap();
    assert_eq!(server.state(), ConnState::Secured);
    assert_eq!(server_info.alpn.as_deref(), Some(ALPN_GRPC_QUIC));
    assert_eq!(server_info.server_name.as_deref(), Some("localhost"));
    assert!(server_info.peer_certificates.is_empty(), "no client certificate was sent");

    client.close();
    assert_eq!(client.state(), ConnState::Closed);
    drop(server);
}

#[tokio::test]
async fn unverified_credentials_hide_peer_certificate() {
    let pair = connected_pair().await;
    let Pair { client, .. } = pair;

    let (_client, info) = QuicCredentials::unverified()
        .client_handshake("localhost:443", client)
        .unwrap();
    assert!(info.peer_certificate().is_none());
    assert_eq!(info.alpn.as_deref(), Some(ALPN_GRPC_QUIC));
}
