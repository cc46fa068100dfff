//! Session-level error kinds.
//!
//! Every failure that ends a session surfaces as a [`SessionError`].  Frame
//! decoding problems are reported separately as
//! [`crate::frame::FrameError`]; those are never fatal, the reader logs and
//! skips them.

use std::time::Duration;

use thiserror::Error;

/// Errors that end a sender or receiver session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The transport could not be established or failed mid-session.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The peer closed the stream before the session finished.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The bootstrap exchange did not complete within its bound.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The peer answered the greeting with something other than success.
    #[error("handshake rejected: {0:?}")]
    HandshakeRejected(String),

    /// A segment hit the configured retransmission cap.
    #[error("segment {seq} still unacknowledged after {retries} retransmissions")]
    RetransmissionExhausted { seq: u32, retries: u32 },

    /// No frame arrived from the peer within the idle bound.
    #[error("peer idle for {0:?}")]
    Idle(Duration),

    /// The session configuration is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SessionError {
    pub fn config(msg: impl Into<String>) -> Self {
        SessionError::Config(msg.into())
    }

    /// `true` for failures that happen before any transfer state exists.
    pub fn is_bootstrap_failure(&self) -> bool {
        matches!(
            self,
            SessionError::HandshakeTimeout(_) | SessionError::HandshakeRejected(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = SessionError::RetransmissionExhausted { seq: 7, retries: 3 };
        assert_eq!(
            err.to_string(),
            "segment 7 still unacknowledged after 3 retransmissions"
        );
        assert_eq!(
            SessionError::ConnectionClosed.to_string(),
            "connection closed by peer"
        );
    }

    #[test]
    fn io_errors_become_connection_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: SessionError = io.into();
        assert!(matches!(err, SessionError::Connection(_)));
        assert!(!err.is_bootstrap_failure());
    }

    #[test]
    fn handshake_failures_are_bootstrap_failures() {
        assert!(SessionError::HandshakeTimeout(Duration::from_secs(1)).is_bootstrap_failure());
        assert!(SessionError::HandshakeRejected("nope".into()).is_bootstrap_failure());
        assert!(!SessionError::ConnectionClosed.is_bootstrap_failure());
    }
}
