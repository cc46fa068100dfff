//! Session bootstrap.
//!
//! ```text
//!  client (sender)                       server (receiver)
//!        │ ── TCP connect ─────────────────────▶ │
//!        │ ── Greeting("network") ─────────────▶ │
//!        │ ◀──────── Success("Connection setup success") ── │
//!        ▼                                       ▼
//!   Established                             Established
//! ```
//!
//! Every step is bounded by `handshake_timeout`.  No transfer state exists
//! until [`connect`] / [`Listener::accept`] return a [`Connection`].

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::frame::Frame;
use crate::transport::{framed, FrameReader, FrameWriter};

/// Reply the server sends once it accepts the greeting.
pub const SUCCESS_MARKER: &str = "Connection setup success";

/// An established session endpoint: framed stream halves plus addresses.
pub struct Connection<S> {
    pub reader: FrameReader<ReadHalf<S>>,
    pub writer: FrameWriter<WriteHalf<S>>,
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
    /// Greeting sent (client) or received (server).
    pub greeting: String,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the client half of the bootstrap over an open stream.
    pub async fn client(stream: S, greeting: &str, bound: Duration) -> Result<Self, SessionError> {
        let (mut reader, mut writer) = framed(stream);

        timeout(bound, greet(&mut reader, &mut writer, greeting))
            .await
            .map_err(|_| SessionError::HandshakeTimeout(bound))??;

        Ok(Self {
            reader,
            writer,
            local_addr: None,
            peer_addr: None,
            greeting: greeting.to_string(),
        })
    }

    /// Run the server half of the bootstrap over an accepted stream.
    pub async fn server(stream: S, bound: Duration) -> Result<Self, SessionError> {
        let (mut reader, mut writer) = framed(stream);

        let greeting = timeout(bound, welcome(&mut reader, &mut writer))
            .await
            .map_err(|_| SessionError::HandshakeTimeout(bound))??;

        Ok(Self {
            reader,
            writer,
            local_addr: None,
            peer_addr: None,
            greeting,
        })
    }

    fn with_addrs(mut self, local: Option<SocketAddr>, peer: Option<SocketAddr>) -> Self {
        self.local_addr = local;
        self.peer_addr = peer;
        self
    }
}

async fn greet<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    greeting: &str,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.send(&Frame::Greeting(greeting.to_string())).await?;
    log::debug!("[handshake] → greeting {greeting:?}");
    match reader.read_frame().await? {
        Some(Frame::Success(reply)) if reply == SUCCESS_MARKER => {
            log::info!("[handshake] server replied {reply:?}");
            Ok(())
        }
        Some(other) => Err(SessionError::HandshakeRejected(format!("{other:?}"))),
        None => Err(SessionError::ConnectionClosed),
    }
}

async fn welcome<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<String, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let greeting = match reader.read_frame().await? {
        Some(Frame::Greeting(text)) => text,
        Some(other) => {
            return Err(SessionError::HandshakeRejected(format!(
                "expected greeting, got {other:?}"
            )))
        }
        None => return Err(SessionError::ConnectionClosed),
    };
    log::info!("[handshake] received greeting {greeting:?}");
    writer
        .send(&Frame::Success(SUCCESS_MARKER.to_string()))
        .await?;
    Ok(greeting)
}

/// Open a TCP connection to `config.addr` and perform the client handshake.
pub async fn connect(config: &SessionConfig) -> Result<Connection<TcpStream>, SessionError> {
    let bound = config.handshake_timeout;
    let stream = timeout(bound, TcpStream::connect(config.addr))
        .await
        .map_err(|_| SessionError::HandshakeTimeout(bound))??;
    let local = stream.local_addr().ok();
    let peer = stream.peer_addr().ok();
    log::info!("[handshake] connected to {}", config.addr);

    let conn = Connection::client(stream, &config.greeting, bound).await?;
    Ok(conn.with_addrs(local, peer))
}

/// Listening endpoint of the server role.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, SessionError> {
        let inner = TcpListener::bind(addr).await?;
        log::info!("[handshake] listening on {}", inner.local_addr()?);
        Ok(Self { inner })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, SessionError> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept one client and perform the server handshake.
    ///
    /// Waiting for the client to connect is unbounded; the handshake itself
    /// is bounded by `handshake_timeout`.
    pub async fn accept(
        &self,
        config: &SessionConfig,
    ) -> Result<Connection<TcpStream>, SessionError> {
        let (stream, peer) = self.inner.accept().await?;
        let local = stream.local_addr().ok();
        log::info!("[handshake] connection from {peer}");
        let conn = Connection::server(stream, config.handshake_timeout).await?;
        Ok(conn.with_addrs(local, Some(peer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUND: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn both_halves_complete_over_a_pipe() {
        let (a, b) = tokio::io::duplex(256);
        let server = tokio::spawn(async move { Connection::server(b, BOUND).await });
        let client = Connection::client(a, "network", BOUND).await.unwrap();
        let server = server.await.unwrap().unwrap();

        assert_eq!(client.greeting, "network");
        assert_eq!(server.greeting, "network");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (a, _b) = tokio::io::duplex(256);
        let err = Connection::client(a, "network", Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::HandshakeTimeout(_)));
    }

    /// Server half that answers the greeting with `reply`.
    fn answer_with(b: tokio::io::DuplexStream, reply: &'static str) {
        tokio::spawn(async move {
            let (mut reader, mut writer) = framed(b);
            let _ = reader.read_frame().await;
            writer.send(&Frame::Success(reply.into())).await.unwrap();
            // Keep the pipe open until the client has read the reply.
            let _ = reader.read_frame().await;
        });
    }

    #[tokio::test]
    async fn wrong_reply_is_rejected() {
        let (a, b) = tokio::io::duplex(256);
        answer_with(b, "go away");
        let err = Connection::client(a, "network", BOUND).await.err().unwrap();
        assert!(matches!(err, SessionError::HandshakeRejected(_)));
    }

    #[tokio::test]
    async fn reply_must_match_the_marker_exactly() {
        for reply in ["Connection setup unsuccessful", "connection setup success", "success"] {
            let (a, b) = tokio::io::duplex(256);
            answer_with(b, reply);
            let err = Connection::client(a, "network", BOUND).await.err().unwrap();
            assert!(
                matches!(err, SessionError::HandshakeRejected(_)),
                "{reply:?} was accepted"
            );
        }
    }

    #[tokio::test]
    async fn server_rejects_non_greeting() {
        let (a, b) = tokio::io::duplex(256);
        let (_ra, mut wa) = framed(a);
        wa.send(&Frame::Segment { seq: 1 }).await.unwrap();
        let err = Connection::server(b, BOUND).await.err().unwrap();
        assert!(matches!(err, SessionError::HandshakeRejected(_)));
    }

    #[tokio::test]
    async fn peer_hangup_reads_as_closed() {
        let (a, b) = tokio::io::duplex(256);
        drop(a);
        let err = Connection::server(b, BOUND).await.err().unwrap();
        assert!(matches!(err, SessionError::ConnectionClosed));
    }
}
