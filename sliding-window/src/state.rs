//! Lifecycle states of the two endpoints.
//!
//! ```text
//!  sender:    Unconnected ──handshake──▶ Established ──first send──▶ Transmitting
//!                                                                        │
//!                                              last segment allocated    │
//!                                                                        ▼
//!                                          Closed ◀──in-flight empty── Draining
//!
//!  receiver:  Unconnected ──handshake──▶ Established ──first segment──▶ Receiving
//!                                                                        │
//!                                                     FIN / peer close   ▼
//!                                                                      Closed
//! ```
//!
//! `Unconnected` is never stored in a state machine: a sender or receiver
//! only exists once [`crate::handshake`] has succeeded.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Handshake done, nothing sent yet.
    #[default]
    Established,
    /// New segments are still being allocated.
    Transmitting,
    /// All segments allocated; waiting for the trailing ACKs.
    Draining,
    /// Everything acknowledged.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    #[default]
    Established,
    Receiving,
    /// The peer sent FIN or closed the stream.
    Closed,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
