//! Receive-side state machine.
//!
//! [`WindowReceiver`] tracks the highest sequence number seen, the set of
//! sequence numbers skipped over (the Missing-Set) and the receiver's time
//! series.  Like the sender it only manages state: the caller writes the
//! returned ACK back to the peer.
//!
//! # ACK policy
//!
//! ACKs are strictly cumulative.  A segment that jumps ahead records every
//! skipped number as missing and advances `expected_next` past itself, but
//! the ACK never moves past the lowest missing number.  The sender therefore
//! sees duplicate ACKs until the hole is filled by a retransmission, at which
//! point the ACK jumps to the next gap (or to `expected_next`).

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::config::{SessionConfig, FIRST_SEQ, MAX_SEQ_NUM};
use crate::report::{GoodputSample, ReceiverReport, Sample};
use crate::state::ReceiverState;

/// Receive-side state for one session.
#[derive(Debug)]
pub struct WindowReceiver {
    state: ReceiverState,

    /// One past the highest sequence number seen.
    expected_next: u32,
    /// Sequence numbers skipped over and not yet received.
    missing: BTreeSet<u32>,
    max_seq_num: u32,

    report_interval: u32,
    since_report: u32,
    /// Total announced by the sender's FIN.
    announced_total: Option<u32>,

    started_at: Instant,
    total_received: u32,
    ever_missing: u32,
    recovered: u32,
    duplicates: u32,
    rejected: u32,
    frames: u64,
    goodput_samples: Vec<GoodputSample>,
    received_history: Vec<Sample<u32>>,
    missing_history: Vec<Sample<u32>>,
    window_history: Vec<Sample<u32>>,
}

impl WindowReceiver {
    pub fn new(config: &SessionConfig, now: Instant) -> Self {
        Self {
            state: ReceiverState::Established,
            expected_next: FIRST_SEQ,
            missing: BTreeSet::new(),
            max_seq_num: config.max_seq_num.min(MAX_SEQ_NUM),
            report_interval: config.report_interval.max(1),
            since_report: 0,
            announced_total: None,
            started_at: now,
            total_received: 0,
            ever_missing: 0,
            recovered: 0,
            duplicates: 0,
            rejected: 0,
            frames: 0,
            goodput_samples: Vec::new(),
            received_history: Vec::new(),
            missing_history: Vec::new(),
            window_history: Vec::new(),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ReceiverState::Closed
    }

    /// One past the highest sequence number seen.
    pub fn expected_next(&self) -> u32 {
        self.expected_next
    }

    pub fn missing(&self) -> &BTreeSet<u32> {
        &self.missing
    }

    pub fn total_received(&self) -> u32 {
        self.total_received
    }

    /// Segment frames that failed validation.
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    /// Cumulative ACK: the lowest sequence number not yet received.
    pub fn ack_number(&self) -> u32 {
        self.missing
            .first()
            .copied()
            .unwrap_or(self.expected_next)
    }

    /// Process one segment and return the ACK to send back.
    ///
    /// Returns `None` for a sequence number outside `[FIRST_SEQ,
    /// max_seq_num]`; such a segment is logged and otherwise ignored.
    /// `max_seq_num` is clamped to [`MAX_SEQ_NUM`], which also bounds the
    /// Missing-Set.
    pub fn on_segment(&mut self, seq: u32, now: Instant) -> Option<u32> {
        if !(FIRST_SEQ..=self.max_seq_num).contains(&seq) {
            self.rejected += 1;
            log::warn!("[receiver] ignoring segment with out-of-range seq {seq}");
            return None;
        }
        if self.state == ReceiverState::Established {
            self.state = ReceiverState::Receiving;
        }
        self.frames += 1;
        let at = self.elapsed(now);

        if seq == self.expected_next {
            self.expected_next = self.expected_next.saturating_add(1);
            self.accept(seq, at);
        } else if seq > self.expected_next {
            for gap in self.expected_next..seq {
                self.missing.insert(gap);
                self.ever_missing += 1;
                self.missing_history.push(Sample { at, value: gap });
            }
            log::debug!(
                "[receiver] gap {}..{seq}; {} missing",
                self.expected_next,
                self.missing.len()
            );
            self.expected_next = seq.saturating_add(1);
            self.accept(seq, at);
        } else if self.missing.remove(&seq) {
            self.recovered += 1;
            log::debug!("[receiver] retransmission filled {seq}");
            self.accept(seq, at);
        } else {
            self.duplicates += 1;
            log::debug!("[receiver] duplicate {seq}");
        }

        let highest = self.expected_next - 1;
        let estimate = self.missing.first().map_or(highest, |&low| highest - low);
        self.window_history.push(Sample {
            at,
            value: estimate,
        });

        self.since_report += 1;
        if self.since_report >= self.report_interval {
            self.since_report = 0;
            let sample = self.periodic_report(now);
            log::info!(
                "[receiver] received {} / {}, goodput {:.4}",
                sample.received,
                sample.sent,
                sample.goodput
            );
        }

        let ack = self.ack_number();
        log::debug!("[receiver] ← SEQ {seq}; → ACK {ack}");
        Some(ack)
    }

    /// Compute goodput from the counts so far and append it to the series.
    ///
    /// Before the FIN arrives the number sent is inferred from the highest
    /// sequence number observed.
    pub fn periodic_report(&mut self, now: Instant) -> GoodputSample {
        let sent = self.sent_estimate();
        let sample = GoodputSample {
            at: self.elapsed(now),
            received: self.total_received,
            sent,
            goodput: ratio(self.total_received, sent),
        };
        self.goodput_samples.push(sample);
        sample
    }

    /// Peer announced end of stream.
    pub fn on_fin(&mut self, total: u32) {
        log::debug!("[receiver] ← FIN total={total}");
        self.announced_total = Some(total);
        self.state = ReceiverState::Closed;
    }

    /// Peer closed the transport.
    pub fn on_close(&mut self) {
        self.state = ReceiverState::Closed;
    }

    /// Snapshot of the receiver's statistics.
    pub fn report(&self, now: Instant) -> ReceiverReport {
        let sent = self.sent_estimate();
        ReceiverReport {
            state: self.state,
            elapsed: self.elapsed(now),
            total_sent: sent,
            total_received: self.total_received,
            total_dropped: self.ever_missing,
            still_missing: self.missing.len() as u32,
            recovered: self.recovered,
            duplicates: self.duplicates,
            frames: self.frames,
            goodput: ratio(self.total_received, sent),
            goodput_samples: self.goodput_samples.clone(),
            received_history: self.received_history.clone(),
            missing_history: self.missing_history.clone(),
            window_history: self.window_history.clone(),
            local_addr: None,
            peer_addr: None,
        }
    }

    fn accept(&mut self, seq: u32, at: Duration) {
        self.total_received += 1;
        self.received_history.push(Sample { at, value: seq });
    }

    fn sent_estimate(&self) -> u32 {
        let inferred = self.expected_next - FIRST_SEQ;
        self.announced_total.unwrap_or(inferred).max(self.total_received)
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

fn ratio(received: u32, sent: u32) -> f64 {
    if sent == 0 {
        1.0
    } else {
        f64::from(received) / f64::from(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver(report_interval: u32) -> (WindowReceiver, Instant) {
        let now = Instant::now();
        let cfg = SessionConfig {
            report_interval,
            ..SessionConfig::default()
        };
        (WindowReceiver::new(&cfg, now), now)
    }

    #[test]
    fn initial_state() {
        let (r, _) = receiver(1000);
        assert_eq!(r.state(), ReceiverState::Established);
        assert_eq!(r.expected_next(), FIRST_SEQ);
        assert_eq!(r.ack_number(), FIRST_SEQ);
        assert!(r.missing().is_empty());
    }

    #[test]
    fn in_order_segments_advance_expected_next() {
        let (mut r, now) = receiver(1000);
        for seq in 1..=50 {
            assert_eq!(r.on_segment(seq, now), Some(seq + 1));
        }
        assert_eq!(r.state(), ReceiverState::Receiving);
        assert_eq!(r.expected_next(), 51);
        assert!(r.missing().is_empty());
        assert_eq!(r.total_received(), 50);
    }

    #[test]
    fn gap_records_missing_and_holds_the_ack() {
        let (mut r, now) = receiver(1000);
        r.on_segment(1, now);
        r.on_segment(2, now);

        // 3 and 4 were lost.
        assert_eq!(r.on_segment(5, now), Some(3));
        assert_eq!(r.expected_next(), 6);
        assert_eq!(r.missing().iter().copied().collect::<Vec<_>>(), vec![3, 4]);

        assert_eq!(r.on_segment(6, now), Some(3));
    }

    #[test]
    fn retransmission_fills_gap_and_ack_jumps() {
        let (mut r, now) = receiver(1000);
        for seq in [1, 2, 5, 6] {
            r.on_segment(seq, now);
        }
        assert_eq!(r.on_segment(3, now), Some(4));
        assert_eq!(r.on_segment(4, now), Some(7));
        assert!(r.missing().is_empty());

        let report = r.report(now);
        assert_eq!(report.total_dropped, 2);
        assert_eq!(report.recovered, 2);
        assert_eq!(report.still_missing, 0);
    }

    #[test]
    fn duplicate_resends_unchanged_ack() {
        let (mut r, now) = receiver(1000);
        r.on_segment(1, now);
        r.on_segment(2, now);
        assert_eq!(r.on_segment(1, now), Some(3));

        let report = r.report(now);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.total_received, 2);
        assert_eq!(report.frames, 3);
    }

    #[test]
    fn out_of_range_seq_is_rejected() {
        let (mut r, now) = receiver(1000);
        assert_eq!(r.on_segment(0, now), None);
        assert_eq!(r.on_segment(u32::MAX, now), None);
        assert_eq!(r.rejected(), 2);
        assert_eq!(r.expected_next(), FIRST_SEQ);
        assert!(r.missing().is_empty());
    }

    #[test]
    fn top_of_u32_is_rejected_even_without_validation() {
        let now = Instant::now();
        let cfg = SessionConfig {
            max_seq_num: u32::MAX,
            ..SessionConfig::default()
        };
        let mut r = WindowReceiver::new(&cfg, now);
        assert_eq!(r.on_segment(u32::MAX, now), None);
        assert!(r.missing().is_empty());

        // The highest accepted number still works.
        assert_eq!(r.on_segment(MAX_SEQ_NUM, now), Some(FIRST_SEQ));
        assert_eq!(r.missing().len() as u32, MAX_SEQ_NUM - FIRST_SEQ);
        assert_eq!(r.expected_next(), MAX_SEQ_NUM + 1);
    }

    #[test]
    fn goodput_sampled_at_cadence() {
        let (mut r, now) = receiver(10);
        for seq in 1..=25 {
            if seq != 4 {
                r.on_segment(seq, now);
            }
        }
        let report = r.report(now);
        // 24 frames processed: samples after the 10th and 20th.
        assert_eq!(report.goodput_samples.len(), 2);
        let first = report.goodput_samples[0];
        assert_eq!(first.received, 10);
        assert_eq!(first.sent, 11);
        assert!(first.goodput > 0.0 && first.goodput < 1.0);
    }

    #[test]
    fn fin_closes_and_fixes_total() {
        let (mut r, now) = receiver(1000);
        for seq in [1, 2, 4] {
            r.on_segment(seq, now);
        }
        r.on_fin(5);
        assert!(r.is_closed());

        let report = r.report(now);
        assert_eq!(report.total_sent, 5);
        assert_eq!(report.total_received, 3);
        assert_eq!(report.still_missing, 1);
        assert!((report.goodput - 0.6).abs() < 1e-9);
    }

    #[test]
    fn goodput_is_one_once_everything_arrives() {
        let (mut r, now) = receiver(1000);
        for seq in (1..=20).filter(|s| s % 7 != 0) {
            r.on_segment(seq, now);
        }
        for seq in [7, 14] {
            r.on_segment(seq, now);
        }
        r.on_fin(20);
        let report = r.report(now);
        assert_eq!(report.total_received, 20);
        assert_eq!(report.total_dropped, 2);
        assert_eq!(report.goodput, 1.0);
    }

    #[test]
    fn window_estimate_spans_the_gap() {
        let (mut r, now) = receiver(1000);
        for seq in [1, 2, 3, 8] {
            r.on_segment(seq, now);
        }
        let report = r.report(now);
        let last = report.window_history.last().unwrap();
        // highest 8, lowest missing 4.
        assert_eq!(last.value, 4);
    }
}
