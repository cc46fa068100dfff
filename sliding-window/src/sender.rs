//! Sliding-window send-side state machine.
//!
//! [`WindowSender`] owns the window, the in-flight set, the retransmission
//! record and the sender's time series.  It never touches the socket: each
//! operation returns the [`Transmission`]s the caller must put on the wire
//! (see [`crate::session`]), so the whole machine can be driven by a test
//! with synthetic clocks.
//!
//! # Protocol contract
//!
//! - At most `window_size` segments are in flight at once.  A segment the
//!   loss source dropped still occupies its slot: the sender cannot tell a
//!   drop from a slow ACK.
//! - ACKs are **cumulative**: `ack = K` acknowledges every segment `< K`.
//!   ACKs at or below `base`, or beyond `next_seq`, are ignored.
//! - Each accepted ACK grows the window by `growth_increment` once more than
//!   `growth_warmup` segments have been acknowledged, up to `max_window`.
//!   The window never shrinks.
//! - The segment at `base` is retransmitted on its own once it has been in
//!   flight longer than the fixed `rto` (no go-back-N, no backoff).  Later
//!   segments wait for it: the cumulative ACK that follows the repair covers
//!   them.
//!
//! # Sequence-number layout
//!
//! ```text
//!  base              next_seq                end_seq
//!    │                   │                      │
//!  ──┼───────────────────┼──────────────────────┼──▶ seq space
//!    │ <── in flight ──▶ │ <── not yet sent ──▶ │
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::{SessionConfig, FIRST_SEQ};
use crate::error::SessionError;
use crate::frame::Frame;
use crate::loss::{LossSource, Verdict};
use crate::report::{retransmission_histogram, Sample, SenderReport};
use crate::state::SenderState;

/// One transmission decided by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    pub seq: u32,
    /// 0 for the first transmission, n for the n-th retransmission.
    pub attempt: u32,
    pub verdict: Verdict,
}

impl Transmission {
    /// `true` when the segment must actually be written to the transport.
    pub fn delivered(&self) -> bool {
        self.verdict == Verdict::Deliver
    }

    pub fn frame(&self) -> Frame {
        Frame::Segment { seq: self.seq }
    }
}

/// A segment occupying one slot of the window.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub seq: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    pub retransmissions: u32,
}

/// Send-side state for one session.
pub struct WindowSender {
    state: SenderState,

    /// Oldest unacknowledged sequence number (left window edge).
    base: u32,
    /// Sequence number the next new segment gets.
    next_seq: u32,
    /// One past the last segment of the session.
    end_seq: u32,

    window_size: u32,
    max_window: u32,
    growth_increment: u32,
    growth_warmup: u32,
    rto: Duration,
    drop_probability: f64,
    max_retransmissions: Option<u32>,
    progress_interval: u32,

    /// In-flight segments ordered by sequence number (front = oldest).
    in_flight: VecDeque<InFlight>,
    loss: Box<dyn LossSource>,

    started_at: Instant,
    total_sent: u32,
    total_acked: u32,
    total_dropped: u32,
    transmissions: u64,
    retransmissions: BTreeMap<u32, u32>,
    window_history: Vec<Sample<u32>>,
    sent_history: Vec<Sample<u32>>,
    dropped_history: Vec<Sample<u32>>,
}

impl WindowSender {
    /// Create a sender for a freshly established session.
    ///
    /// `config` is assumed to have passed [`SessionConfig::validate`].
    pub fn new(config: &SessionConfig, loss: Box<dyn LossSource>, now: Instant) -> Self {
        let window_size = config.initial_window.max(config.min_window);
        Self {
            state: SenderState::Established,
            base: FIRST_SEQ,
            next_seq: FIRST_SEQ,
            end_seq: config.end_seq(),
            window_size,
            max_window: config.max_window,
            growth_increment: config.growth_increment,
            growth_warmup: config.growth_warmup,
            rto: config.rto,
            drop_probability: config.drop_probability,
            max_retransmissions: config.max_retransmissions,
            progress_interval: config.progress_interval,
            in_flight: VecDeque::with_capacity(window_size as usize),
            loss,
            started_at: now,
            total_sent: 0,
            total_acked: 0,
            total_dropped: 0,
            transmissions: 0,
            retransmissions: BTreeMap::new(),
            window_history: vec![Sample {
                at: Duration::ZERO,
                value: window_size,
            }],
            sent_history: Vec::new(),
            dropped_history: Vec::new(),
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SenderState::Closed
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Number of segments awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// In-flight segments from oldest to newest.
    pub fn in_flight_entries(&self) -> impl Iterator<Item = &InFlight> {
        self.in_flight.iter()
    }

    /// Distinct segments sent so far.
    pub fn total_sent(&self) -> u32 {
        self.total_sent
    }

    /// How many times `seq` has been retransmitted.
    pub fn retransmissions_of(&self, seq: u32) -> u32 {
        self.retransmissions.get(&seq).copied().unwrap_or(0)
    }

    /// `true` when there is room for at least one more in-flight segment.
    pub fn can_send(&self) -> bool {
        (self.in_flight.len() as u32) < self.window_size
    }

    /// Allocate and transmit new segments while the window has room.
    ///
    /// Returns every transmission made, dropped ones included; only
    /// [`Transmission::delivered`] ones go to the transport.  With a full
    /// window (or nothing left to send) this returns an empty batch.
    pub fn send_next_batch(&mut self, now: Instant) -> Vec<Transmission> {
        let mut batch = Vec::new();
        if self.is_closed() {
            return batch;
        }
        while self.can_send() && self.next_seq < self.end_seq {
            if self.state == SenderState::Established {
                self.state = SenderState::Transmitting;
            }
            let seq = self.next_seq;
            self.next_seq += 1;
            self.total_sent += 1;

            batch.push(self.transmit(seq, 0, now));
            self.in_flight.push_back(InFlight {
                seq,
                sent_at: now,
                retransmissions: 0,
            });
            self.record_window(now);
        }
        if self.next_seq == self.end_seq && self.state == SenderState::Transmitting {
            log::debug!("[sender] all {} segments allocated; draining", self.total_sent);
            self.state = SenderState::Draining;
        }
        batch
    }

    /// Process a cumulative ACK.
    ///
    /// Removes every in-flight segment below `ack`, advances `base` and
    /// returns the number of newly acknowledged segments.  Returns `0` for a
    /// duplicate or out-of-range ACK, which leaves the state untouched.
    pub fn on_ack(&mut self, ack: u32, now: Instant) -> u32 {
        if ack <= self.base {
            log::trace!("[sender] duplicate ACK {ack} (base {})", self.base);
            return 0;
        }
        if ack > self.next_seq {
            log::warn!(
                "[sender] ignoring ACK {ack} beyond next_seq {}",
                self.next_seq
            );
            return 0;
        }

        let mut acked = 0u32;
        while let Some(front) = self.in_flight.front() {
            if front.seq < ack {
                self.in_flight.pop_front();
                acked += 1;
            } else {
                break;
            }
        }
        self.base = ack;

        let before = self.total_acked;
        self.total_acked += acked;
        if self.total_acked > self.growth_warmup {
            self.window_size = self
                .window_size
                .saturating_add(self.growth_increment)
                .min(self.max_window);
        }
        self.record_window(now);

        if before / self.progress_interval != self.total_acked / self.progress_interval {
            log::info!(
                "[sender] acked {} / sent {}, window {}",
                self.total_acked,
                self.total_sent,
                self.window_size
            );
        }
        log::debug!(
            "[sender] ← ACK {ack} slid={acked} window={} in_flight={}",
            self.window_size,
            self.in_flight.len()
        );

        if self.in_flight.is_empty() && self.next_seq == self.end_seq {
            log::debug!("[sender] every segment acknowledged; closed");
            self.state = SenderState::Closed;
        }
        acked
    }

    /// The transport is gone; no further ACK can arrive.
    ///
    /// In-flight segments stay recorded so the final report shows what was
    /// left unacknowledged.
    pub fn on_close(&mut self) {
        if self.state != SenderState::Closed {
            log::debug!(
                "[sender] transport closed with {} segments in flight",
                self.in_flight.len()
            );
            self.state = SenderState::Closed;
        }
    }

    /// Retransmit the oldest in-flight segment once it is older than the RTO.
    ///
    /// ACKs are cumulative, so only the segment at `base` is known to be
    /// missing; later segments may already sit at the receiver behind the
    /// hole and are acknowledged together once it is filled.  Segments behind
    /// `base` are not retransmitted even when they are older than the RTO as
    /// well, so this does not resend every expired segment; only segments the
    /// loss source actually dropped end up in the retransmission record.  The
    /// retransmission goes through the loss source again and gets a fresh
    /// timestamp.  Fails with [`SessionError::RetransmissionExhausted`] when
    /// the segment would exceed the configured cap.
    pub fn check_timeouts(&mut self, now: Instant) -> Result<Vec<Transmission>, SessionError> {
        let rto = self.rto;
        let cap = self.max_retransmissions;
        if self.state == SenderState::Closed {
            return Ok(Vec::new());
        }
        let Some(head) = self.in_flight.front_mut() else {
            return Ok(Vec::new());
        };
        if now.saturating_duration_since(head.sent_at) <= rto {
            return Ok(Vec::new());
        }

        let seq = head.seq;
        if let Some(cap) = cap {
            if head.retransmissions >= cap {
                log::warn!("[sender] segment {seq} reached the retransmission cap ({cap})");
                return Err(SessionError::RetransmissionExhausted {
                    seq,
                    retries: head.retransmissions,
                });
            }
        }
        head.retransmissions += 1;
        head.sent_at = now;
        let attempt = head.retransmissions;

        *self.retransmissions.entry(seq).or_insert(0) += 1;
        log::debug!("[sender] timeout; retransmitting {seq} (attempt {attempt})");
        Ok(vec![self.transmit(seq, attempt, now)])
    }

    /// Time until the oldest in-flight segment times out, if any is in flight.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.in_flight
            .front()
            .map(|e| (e.sent_at + self.rto).saturating_duration_since(now))
    }

    /// Snapshot of the sender's statistics.
    pub fn report(&self, now: Instant) -> SenderReport {
        let average_window = if self.window_history.is_empty() {
            f64::from(self.window_size)
        } else {
            self.window_history
                .iter()
                .map(|s| f64::from(s.value))
                .sum::<f64>()
                / self.window_history.len() as f64
        };
        SenderReport {
            state: self.state,
            elapsed: now.saturating_duration_since(self.started_at),
            final_window: self.window_size,
            average_window,
            drop_probability: self.drop_probability,
            total_sent: self.total_sent,
            total_acked: self.total_acked,
            total_dropped: self.total_dropped,
            transmissions: self.transmissions,
            retransmissions: self.retransmissions.clone(),
            histogram: retransmission_histogram(&self.retransmissions),
            window_history: self.window_history.clone(),
            sent_history: self.sent_history.clone(),
            dropped_history: self.dropped_history.clone(),
            local_addr: None,
            peer_addr: None,
        }
    }

    fn transmit(&mut self, seq: u32, attempt: u32, now: Instant) -> Transmission {
        let at = now.saturating_duration_since(self.started_at);
        let verdict = self.loss.decide(seq);
        self.transmissions += 1;
        match verdict {
            Verdict::Drop => {
                self.total_dropped += 1;
                self.dropped_history.push(Sample { at, value: seq });
                log::debug!("[sender] dropping {seq} (attempt {attempt})");
            }
            Verdict::Deliver => self.sent_history.push(Sample { at, value: seq }),
        }
        Transmission {
            seq,
            attempt,
            verdict,
        }
    }

    fn record_window(&mut self, now: Instant) {
        self.window_history.push(Sample {
            at: now.saturating_duration_since(self.started_at),
            value: self.window_size,
        });
    }
}
