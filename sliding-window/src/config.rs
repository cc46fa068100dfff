//! Session parameters shared by both endpoints.
//!
//! [`SessionConfig::default`] gives the values the simulation is normally run
//! with; the CLI in `main.rs` overrides individual fields.  Call
//! [`SessionConfig::validate`] before starting a session.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::SessionError;

/// First sequence number assigned by the sender.
pub const FIRST_SEQ: u32 = 1;

/// Largest sequence space a session may use.
pub const MAX_SEQ_NUM: u32 = 1 << 16;

/// Default listening / connecting address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:12345";

/// Greeting the client sends during bootstrap.
pub const DEFAULT_GREETING: &str = "network";

/// All tunables for one sender/receiver session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Address the receiver listens on and the sender connects to.
    pub addr: SocketAddr,
    /// Window size when the session starts.
    pub initial_window: u32,
    /// Lower bound on the window size.
    pub min_window: u32,
    /// Upper bound on the window size.
    pub max_window: u32,
    /// Added to the window on each accepted ACK once warm-up is over.
    pub growth_increment: u32,
    /// Segments that must be acknowledged before the window starts growing.
    pub growth_warmup: u32,
    /// Fixed retransmission timeout.
    pub rto: Duration,
    /// Probability that any single transmission is dropped.
    pub drop_probability: f64,
    /// Seed for the loss generator; `None` draws one from the OS.
    pub seed: Option<u64>,
    /// Number of distinct segments the sender transmits.
    pub total_segments: u32,
    /// Highest sequence number the sender may allocate.
    pub max_seq_num: u32,
    /// Receiver appends a goodput sample every this many segments.
    pub report_interval: u32,
    /// Sender logs progress every this many acknowledged segments.
    pub progress_interval: u32,
    /// Retransmissions allowed per segment before the session fails.
    pub max_retransmissions: Option<u32>,
    /// Bound on the bootstrap exchange.
    pub handshake_timeout: Duration,
    /// Receiver gives up when no frame arrives for this long.
    pub idle_timeout: Duration,
    /// Sender loop cadence when no ACK is pending.
    pub poll_interval: Duration,
    /// Greeting string sent by the client.
    pub greeting: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let initial_window = 10;
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 12345)),
            initial_window,
            min_window: 1,
            max_window: 200,
            growth_increment: 1,
            growth_warmup: initial_window,
            rto: Duration::from_millis(200),
            drop_probability: 0.01,
            seed: None,
            total_segments: 10_000,
            max_seq_num: MAX_SEQ_NUM,
            report_interval: 1_000,
            progress_interval: 1_000,
            max_retransmissions: None,
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(1),
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

impl SessionConfig {
    /// Check that the parameters describe a runnable session.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.min_window == 0 {
            return Err(SessionError::config("min_window must be at least 1"));
        }
        if self.min_window > self.initial_window || self.initial_window > self.max_window {
            return Err(SessionError::config(format!(
                "window bounds out of order: min {} / initial {} / max {}",
                self.min_window, self.initial_window, self.max_window
            )));
        }
        if !(0.0..1.0).contains(&self.drop_probability) {
            return Err(SessionError::config(format!(
                "drop_probability {} outside [0, 1)",
                self.drop_probability
            )));
        }
        if self.max_seq_num < FIRST_SEQ || self.max_seq_num > MAX_SEQ_NUM {
            return Err(SessionError::config(format!(
                "max_seq_num {} outside [{FIRST_SEQ}, {MAX_SEQ_NUM}]",
                self.max_seq_num
            )));
        }
        if self.total_segments == 0 {
            return Err(SessionError::config("total_segments must be positive"));
        }
        // The last sequence number is FIRST_SEQ + total_segments - 1.
        if self.total_segments > self.max_seq_num {
            return Err(SessionError::config(format!(
                "total_segments {} exceeds max_seq_num {}",
                self.total_segments, self.max_seq_num
            )));
        }
        if self.report_interval == 0 || self.progress_interval == 0 {
            return Err(SessionError::config("report intervals must be positive"));
        }
        if self.rto.is_zero() {
            return Err(SessionError::config("rto must be non-zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(SessionError::config("poll_interval must be non-zero"));
        }
        Ok(())
    }

    /// Sequence number one past the last segment of the session.
    pub fn end_seq(&self) -> u32 {
        FIRST_SEQ.saturating_add(self.total_segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SessionConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.addr.to_string(), DEFAULT_ADDR);
        assert_eq!(cfg.initial_window, 10);
        assert_eq!(cfg.growth_warmup, cfg.initial_window);
        assert_eq!(cfg.drop_probability, 0.01);
    }

    #[test]
    fn rejects_zero_min_window() {
        let cfg = SessionConfig {
            min_window: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn rejects_initial_window_above_max() {
        let cfg = SessionConfig {
            initial_window: 300,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_certain_loss() {
        let cfg = SessionConfig {
            drop_probability: 1.0,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_more_segments_than_sequence_space() {
        let cfg = SessionConfig {
            total_segments: 70_000,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_sequence_space_beyond_the_cap() {
        let cfg = SessionConfig {
            max_seq_num: u32::MAX,
            total_segments: u32::MAX,
            ..SessionConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SessionError::Config(_))));

        let cfg = SessionConfig {
            max_seq_num: MAX_SEQ_NUM + 1,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn end_seq_saturates_on_unvalidated_input() {
        let cfg = SessionConfig {
            total_segments: u32::MAX,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.end_seq(), u32::MAX);
    }

    #[test]
    fn end_seq_is_one_past_last_segment() {
        let cfg = SessionConfig {
            total_segments: 140,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.end_seq(), 141);
    }
}
