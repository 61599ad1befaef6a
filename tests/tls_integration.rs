//! HTTP/2 over TLS integration tests
//!
//! The peer terminates TLS with a throwaway self-signed certificate. ALPN
//! decides whether the connection is usable:
//! - peer selects "h2": requests flow over the TLS session
//! - peer selects nothing: negotiation fails and nothing is cached

mod common;

use bytes::Bytes;
use common::{accept, init_logging, listen, Peer};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{select_next_proto, AlpnError, SslAcceptor, SslMethod};
use openssl::x509::{X509NameBuilder, X509};
use std::thread;
use std::time::Duration;
use transcribe_stream::config::ConnectionConfig;
use transcribe_stream::http::h2::Settings;
use transcribe_stream::http::{ConnectionManager, Error, Origin, Request};

fn self_signed() -> (X509, PKey<Private>) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    (builder.build(), key)
}

fn acceptor(offer_h2: bool) -> SslAcceptor {
    let (cert, key) = self_signed();
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    builder.set_private_key(&key).unwrap();
    builder.set_certificate(&cert).unwrap();
    builder.check_private_key().unwrap();
    if offer_h2 {
        builder.set_alpn_select_callback(|_, client| {
            select_next_proto(b"\x02h2", client).ok_or(AlpnError::NOACK)
        });
    }
    builder.build()
}

fn config() -> ConnectionConfig {
    ConnectionConfig::builder()
        .connect_timeout(Duration::from_secs(5))
        .poll_interval(Duration::from_millis(20))
        .verify_peer(false)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_alpn_h2_request_over_tls() {
    init_logging();
    let (listener, port) = listen();
    let acceptor = acceptor(true);

    thread::spawn(move || {
        let tls = acceptor.accept(accept(&listener)).unwrap();
        assert_eq!(tls.ssl().selected_alpn_protocol(), Some(&b"h2"[..]));

        let mut peer = Peer::handshake(tls, Settings::new());
        let request = peer.expect_headers();
        assert_eq!(request.get(":scheme"), Some("https"));
        assert_eq!(request.get(":authority"), Some(format!("127.0.0.1:{}", port).as_str()));

        peer.send_headers(request.stream_id, 200, &[("x-tls", "yes")], false);
        peer.send_data(request.stream_id, b"over tls", true);
        peer.drain_until_closed();
    });

    let manager = ConnectionManager::new(config());
    let origin = Origin::parse(&format!("https://127.0.0.1:{}", port)).unwrap();
    let connection = manager.get_connection(&origin).await.unwrap();
    let response = connection.submit(Request::get("/secure")).unwrap();

    assert_eq!(response.status().await.unwrap(), 200);
    assert_eq!(response.headers().await.unwrap().get("x-tls"), Some("yes"));
    assert_eq!(response.collect_body().await.unwrap(), Bytes::from_static(b"over tls"));
}

#[tokio::test]
async fn test_missing_alpn_is_a_negotiation_error() {
    init_logging();
    let (listener, port) = listen();
    let acceptor = acceptor(false);

    thread::spawn(move || loop {
        let stream = accept(&listener);
        // The client hangs up right after the handshake
        let _ = acceptor.accept(stream);
    });

    let manager = ConnectionManager::new(config());
    let origin = Origin::parse(&format!("https://127.0.0.1:{}", port)).unwrap();

    match manager.get_connection(&origin).await {
        Err(Error::ProtocolNegotiation(msg)) => assert!(msg.contains("h2"), "{}", msg),
        other => panic!("expected ProtocolNegotiation, got {:?}", other.map(|_| ())),
    }
    assert!(manager.is_empty());
}
