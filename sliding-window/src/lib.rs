//! `sliding-window`: TCP-style sliding-window reliability and flow control,
//! simulated over a single TCP connection with injected segment loss.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐   segments   ┌────────────────┐
//!  │ WindowSender │─────────────▶│ WindowReceiver │
//!  └──────┬───────┘              └───────┬────────┘
//!         │ ▲       cumulative ACKs      │
//!         │ └────────────────────────────┘
//!         │
//!  ┌──────▼────────────────────────────────┐
//!  │               session                 │
//!  │ (owns a state machine + framed stream)│
//!  └──────┬──────────────────────┬─────────┘
//!         │ Transmission          │ reports
//!  ┌──────▼──────┐        ┌───────▼───────┐
//!  │    loss     │        │  ReportSink   │
//!  └──────┬──────┘        └───────────────┘
//!         │ delivered frames
//!  ┌──────▼──────┐
//!  │  transport  │  (length-prefixed frames over tokio TcpStream)
//!  └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]: wire format (serialise / deserialise)
//! - [`transport`]: framed async reader / writer halves
//! - [`handshake`]: greeting / success bootstrap
//! - [`sender`]: window, in-flight tracking, retransmission timer
//! - [`receiver`]: Missing-Set, cumulative ACKs, goodput
//! - [`loss`]: per-transmission drop decisions
//! - [`session`]: async loops driving the state machines
//! - [`report`]: statistics snapshots and their sinks
//! - [`state`]: finite-state-machine types
//! - [`config`]: session parameters
//! - [`error`]: session error kinds

pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod loss;
pub mod receiver;
pub mod report;
pub mod sender;
pub mod session;
pub mod state;
pub mod transport;

pub use config::SessionConfig;
pub use error::SessionError;
pub use report::{ReceiverReport, ReportSink, SenderReport};
pub use session::{run_client, run_receiver, run_sender, run_server};
