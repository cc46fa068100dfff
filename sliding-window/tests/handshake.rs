//! Integration tests for the session bootstrap.
//!
//! Each test binds a real `tokio::net::TcpListener` on loopback, runs the
//! server half in a background task, and checks what both sides observe.

use std::net::SocketAddr;
use std::time::Duration;

use sliding_window::{
    config::SessionConfig,
    error::SessionError,
    handshake::{self, Listener},
    report::MemoryReports,
    session,
};

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

/// Bind a listener on an OS-chosen loopback port and return a config that
/// points at it.
async fn bind_server() -> (Listener, SessionConfig) {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = Listener::bind(addr).await.expect("bind listener");
    let config = SessionConfig {
        addr: listener.local_addr().unwrap(),
        handshake_timeout: Duration::from_millis(500),
        ..SessionConfig::default()
    };
    (listener, config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn greeting_and_success_over_loopback() {
    let (listener, config) = bind_server().await;
    let server_config = config.clone();
    let server = tokio::spawn(async move { listener.accept(&server_config).await });

    let client = handshake::connect(&config).await.expect("client handshake");
    let server = server.await.expect("server task").expect("server handshake");

    assert_eq!(client.greeting, "network");
    assert_eq!(server.greeting, "network");
    assert_eq!(client.peer_addr, Some(config.addr));
    assert_eq!(server.local_addr, Some(config.addr));
    assert_eq!(server.peer_addr, client.local_addr);
}

#[tokio::test]
async fn connecting_to_a_closed_port_fails() {
    // Bind and immediately drop so the port is known to be free.
    let (listener, config) = bind_server().await;
    drop(listener);

    let err = handshake::connect(&config).await.err().expect("must fail");
    assert!(
        matches!(err, SessionError::Connection(_) | SessionError::HandshakeTimeout(_)),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn silent_server_times_out() {
    let raw = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = SessionConfig {
        addr: raw.local_addr().unwrap(),
        handshake_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    };
    // Accept but never answer the greeting.
    let hold = tokio::spawn(async move {
        let (stream, _) = raw.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(stream);
    });

    let err = handshake::connect(&config).await.err().expect("must time out");
    assert!(matches!(err, SessionError::HandshakeTimeout(_)));
    assert!(err.is_bootstrap_failure());
    hold.abort();
}

#[tokio::test]
async fn invalid_config_is_rejected_before_connecting() {
    let config = SessionConfig {
        min_window: 0,
        ..SessionConfig::default()
    };
    let mut sink = MemoryReports::default();
    let loss = Box::new(sliding_window::loss::NoLoss);

    let err = session::run_client(&config, loss, &mut sink)
        .await
        .err()
        .expect("must fail");
    assert!(matches!(err, SessionError::Config(_)));
    assert!(sink.sender.is_empty());
}
