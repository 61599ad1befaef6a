//! Connection manager and streaming response integration tests
//!
//! Each test runs an in-process HTTP/2 peer on a loopback port and drives
//! the client through the public API:
//! - single-flight connection creation per origin
//! - rejection of peers that answer with HTTP/1.1
//! - RST_STREAM, GOAWAY and local close failing pending accessors
//! - stream window replenished as the application consumes the body

mod common;

use bytes::Bytes;
use common::{accept, init_logging, listen, Peer, PeerEvent};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use transcribe_stream::config::ConnectionConfig;
use transcribe_stream::http::h2::{ErrorCode, Settings};
use transcribe_stream::http::{
    body_channel, ConnectionManager, Error, Origin, Request, ResponseState, TransportError,
};

fn config() -> ConnectionConfig {
    ConnectionConfig::builder()
        .connect_timeout(Duration::from_secs(2))
        .poll_interval(Duration::from_millis(20))
        .build()
        .unwrap()
}

fn origin(port: u16) -> Origin {
    Origin::parse(&format!("http://127.0.0.1:{}", port)).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_connection_creates_one_connection() {
    init_logging();
    let (listener, port) = listen();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    thread::spawn(move || loop {
        let stream = accept(&listener);
        counter.fetch_add(1, Ordering::SeqCst);
        thread::spawn(move || {
            let mut peer = Peer::handshake(stream, Settings::new());
            peer.drain_until_closed();
        });
    });

    let manager = Arc::new(ConnectionManager::new(config()));
    let origin = origin(port);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        let origin = origin.clone();
        tasks.push(tokio::spawn(async move {
            manager.get_connection(&origin).await.unwrap()
        }));
    }
    let mut connections = Vec::new();
    for task in tasks {
        connections.push(task.await.unwrap());
    }

    assert_eq!(manager.connections_created(), 1);
    assert_eq!(manager.len(), 1);
    assert!(connections
        .iter()
        .all(|c| Arc::ptr_eq(c, &connections[0])));

    // A later lookup is a cache hit too
    let again = manager.get_connection(&origin).await.unwrap();
    assert!(Arc::ptr_eq(&again, &connections[0]));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    manager.close_all();
}

#[tokio::test]
async fn test_http1_peer_is_rejected_and_not_cached() {
    init_logging();
    let (listener, port) = listen();

    thread::spawn(move || loop {
        let mut stream = accept(&listener);
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf);
        let _ = stream.write_all(
            b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        // Let the client read the reply before the socket goes away
        thread::sleep(Duration::from_millis(200));
    });

    let manager = ConnectionManager::new(config());
    let origin = origin(port);

    for attempt in 1..=2 {
        match manager.get_connection(&origin).await {
            Err(Error::ProtocolNegotiation(msg)) => assert!(msg.contains("HTTP/1"), "{}", msg),
            other => panic!("expected ProtocolNegotiation, got {:?}", other.map(|_| ())),
        }
        assert!(manager.is_empty());
        assert_eq!(manager.connections_created(), attempt);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_failed_negotiation() {
    init_logging();
    let (listener, port) = listen();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    thread::spawn(move || loop {
        let mut stream = accept(&listener);
        counter.fetch_add(1, Ordering::SeqCst);
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            // Keep the attempt in flight while the other callers queue up
            thread::sleep(Duration::from_millis(100));
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n");
            thread::sleep(Duration::from_millis(200));
        });
    });

    let manager = Arc::new(ConnectionManager::new(config()));
    let origin = origin(port);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        let origin = origin.clone();
        tasks.push(tokio::spawn(async move {
            manager.get_connection(&origin).await.map(|_| ())
        }));
    }
    for task in tasks {
        match task.await.unwrap() {
            Err(Error::ProtocolNegotiation(msg)) => assert!(msg.contains("HTTP/1"), "{}", msg),
            other => panic!("expected ProtocolNegotiation, got {:?}", other),
        }
    }

    assert_eq!(manager.connections_created(), 1);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert!(manager.is_empty());

    // The failure is not cached: the next lookup tries again
    assert!(manager.get_connection(&origin).await.is_err());
    assert_eq!(manager.connections_created(), 2);
}

#[tokio::test]
async fn test_status_and_headers_are_broadcast() {
    init_logging();
    let (listener, port) = listen();

    thread::spawn(move || {
        let mut peer = Peer::handshake(accept(&listener), Settings::new());
        let request = peer.expect_headers();
        assert_eq!(request.get(":method"), Some("GET"));
        assert_eq!(request.get(":path"), Some("/status"));
        assert!(request.end_stream);

        peer.send_headers(
            request.stream_id,
            200,
            &[("content-type", "application/vnd.amazon.eventstream")],
            false,
        );
        peer.send_data(request.stream_id, b"C1", false);
        peer.send_data(request.stream_id, b"C2", true);
        peer.drain_until_closed();
    });

    let manager = ConnectionManager::new(config());
    let connection = manager.get_connection(&origin(port)).await.unwrap();
    let response = connection.submit(Request::get("/status")).unwrap();

    let (a, b) = tokio::join!(response.status(), response.status());
    assert_eq!((a.unwrap(), b.unwrap()), (200, 200));
    let headers = response.headers().await.unwrap();
    assert!(headers.contains_pair("content-type", "application/vnd.amazon.eventstream"));
    assert_eq!(response.headers().await.unwrap(), headers);

    response.done().await.unwrap();
    assert_eq!(response.next_chunk().await.unwrap(), Bytes::from_static(b"C1"));
    assert_eq!(response.next_chunk().await.unwrap(), Bytes::from_static(b"C2"));
    assert!(response.next_chunk().await.unwrap().is_empty());
    assert!(response.next_chunk().await.unwrap().is_empty());
    assert_eq!(response.state(), ResponseState::Completed);
}

#[tokio::test]
async fn test_rst_stream_fails_every_accessor() {
    init_logging();
    let (listener, port) = listen();

    thread::spawn(move || {
        let mut peer = Peer::handshake(accept(&listener), Settings::new());
        let request = peer.expect_headers();
        peer.send_rst_stream(request.stream_id, ErrorCode::Cancel);
        peer.drain_until_closed();
    });

    let manager = ConnectionManager::new(config());
    let connection = manager.get_connection(&origin(port)).await.unwrap();
    let response = connection.submit(Request::get("/")).unwrap();

    let expected = Error::Transport(TransportError::StreamReset {
        stream_id: 1,
        code: ErrorCode::Cancel,
    })
    .to_string();
    assert_eq!(response.status().await.unwrap_err().to_string(), expected);
    assert_eq!(response.headers().await.unwrap_err().to_string(), expected);
    assert_eq!(response.next_chunk().await.unwrap_err().to_string(), expected);
    assert_eq!(response.state(), ResponseState::Failed);

    // The connection itself survives a stream reset
    assert!(connection.is_open());
}

#[tokio::test]
async fn test_goaway_fails_streams_the_peer_never_processed() {
    init_logging();
    let (listener, port) = listen();

    thread::spawn(move || {
        let mut peer = Peer::handshake(accept(&listener), Settings::new());
        let first = peer.expect_headers();
        let second = peer.expect_headers();
        assert_eq!((first.stream_id, second.stream_id), (1, 3));

        peer.send_goaway(first.stream_id, ErrorCode::NoError);
        peer.send_headers(first.stream_id, 200, &[], false);
        peer.send_data(first.stream_id, b"last words", true);
        peer.drain_until_closed();
    });

    let manager = ConnectionManager::new(config());
    let connection = manager.get_connection(&origin(port)).await.unwrap();
    let kept = connection.submit(Request::get("/one")).unwrap();
    let refused = connection.submit(Request::get("/two")).unwrap();

    match refused.status().await {
        Err(Error::Transport(TransportError::GoAway { code })) => {
            assert_eq!(code, ErrorCode::NoError)
        }
        other => panic!("expected GoAway, got {:?}", other),
    }
    assert_eq!(kept.status().await.unwrap(), 200);
    assert_eq!(kept.collect_body().await.unwrap(), Bytes::from_static(b"last words"));

    assert!(!connection.is_open());
    assert!(matches!(
        connection.submit(Request::get("/three")),
        Err(Error::Transport(TransportError::ConnectionClosed))
    ));
}

#[tokio::test]
async fn test_close_fails_in_flight_responses() {
    init_logging();
    let (listener, port) = listen();
    let (goaway_tx, goaway_rx) = std::sync::mpsc::channel();

    thread::spawn(move || {
        let mut peer = Peer::handshake(accept(&listener), Settings::new());
        let request = peer.expect_headers();
        assert!(!request.end_stream);
        loop {
            match peer.next_event() {
                PeerEvent::Goaway { code } => {
                    let _ = goaway_tx.send(code);
                    break;
                }
                PeerEvent::Closed => break,
                _ => {}
            }
        }
    });

    let manager = ConnectionManager::new(config());
    let connection = manager.get_connection(&origin(port)).await.unwrap();
    let (mut body, stream) = body_channel(4);
    let response = connection.submit(Request::post("/upload").body(stream)).unwrap();
    body.send(Bytes::from_static(b"partial")).await.unwrap();

    let pending = tokio::spawn({
        let response = Arc::new(response);
        let waiter = Arc::clone(&response);
        async move {
            let result = waiter.next_chunk().await;
            (result, response)
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    connection.close();

    let (result, response) = pending.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::ConnectionClosed))
    ));
    assert!(matches!(
        response.status().await,
        Err(Error::Transport(TransportError::ConnectionClosed))
    ));
    assert!(!connection.is_open());
    assert_eq!(
        goaway_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ErrorCode::NoError
    );
}

#[tokio::test]
async fn test_stream_window_follows_consumption() {
    init_logging();
    let (listener, port) = listen();
    let (update_tx, update_rx) = std::sync::mpsc::channel();

    thread::spawn(move || {
        let mut peer = Peer::handshake(accept(&listener), Settings::new());
        let request = peer.expect_headers();
        let id = request.stream_id;

        peer.send_headers(id, 200, &[], false);
        for _ in 0..3 {
            peer.send_data(id, &[7u8; 16000], false);
        }
        // The stream window only opens once the application read the data
        loop {
            match peer.next_event() {
                PeerEvent::WindowUpdate { stream_id, increment } if stream_id == id => {
                    let _ = update_tx.send(increment);
                    break;
                }
                PeerEvent::WindowUpdate { .. } => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        peer.send_data(id, b"tail", true);
        peer.drain_until_closed();
    });

    let manager = ConnectionManager::new(config());
    let connection = manager.get_connection(&origin(port)).await.unwrap();
    let response = connection.submit(Request::get("/big")).unwrap();
    assert_eq!(response.status().await.unwrap(), 200);

    // Nothing consumed yet: no stream WINDOW_UPDATE
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(update_rx.try_recv().is_err());

    let mut total = 0;
    loop {
        let chunk = response.next_chunk().await.unwrap();
        if chunk.is_empty() {
            break;
        }
        total += chunk.len();
    }
    assert_eq!(total, 48000 + 4);
    assert!(update_rx.recv_timeout(Duration::from_secs(1)).unwrap() >= 32000);
}

#[tokio::test]
async fn test_closed_connection_is_replaced() {
    init_logging();
    let (listener, port) = listen();

    thread::spawn(move || loop {
        let stream = accept(&listener);
        thread::spawn(move || {
            let mut peer = Peer::handshake(stream, Settings::new());
            peer.drain_until_closed();
        });
    });

    let manager = ConnectionManager::new(config());
    let origin = origin(port);
    let first = manager.get_connection(&origin).await.unwrap();
    first.close();

    let second = manager.get_connection(&origin).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_open());
    assert_eq!(manager.connections_created(), 2);
    assert_eq!(manager.len(), 1);
}
