//! Session statistics and the sinks that persist them.
//!
//! The state machines hand out [`SenderReport`] / [`ReceiverReport`]
//! snapshots; a [`ReportSink`] decides what happens to them.  [`ReportDir`]
//! writes plain-text and CSV files (one per series) that an external plotting
//! tool can pick up; [`MemoryReports`] keeps them in memory.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state::{ReceiverState, SenderState};

/// One point of a time series; `at` is measured from session start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<T> {
    pub at: Duration,
    pub value: T,
}

/// Receiver-side goodput measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoodputSample {
    pub at: Duration,
    pub received: u32,
    pub sent: u32,
    pub goodput: f64,
}

/// Fold a per-segment retransmission record into
/// `retransmission count → number of segments`.
pub fn retransmission_histogram(record: &BTreeMap<u32, u32>) -> BTreeMap<u32, u32> {
    let mut histogram = BTreeMap::new();
    for &count in record.values().filter(|&&c| c > 0) {
        *histogram.entry(count).or_insert(0) += 1;
    }
    histogram
}

/// Final (or partial) statistics of the sending endpoint.
#[derive(Debug, Clone)]
pub struct SenderReport {
    pub state: SenderState,
    pub elapsed: Duration,
    pub final_window: u32,
    pub average_window: f64,
    /// Configured probability that a transmission is dropped.
    pub drop_probability: f64,
    /// Distinct segments sent.
    pub total_sent: u32,
    pub total_acked: u32,
    /// Transmissions (first sends and retransmissions) the loss source dropped.
    pub total_dropped: u32,
    /// Every transmission, dropped ones included.
    pub transmissions: u64,
    /// Sequence number → times retransmitted.
    pub retransmissions: BTreeMap<u32, u32>,
    /// Retransmission count → number of segments.
    pub histogram: BTreeMap<u32, u32>,
    pub window_history: Vec<Sample<u32>>,
    pub sent_history: Vec<Sample<u32>>,
    pub dropped_history: Vec<Sample<u32>>,
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
}

impl SenderReport {
    /// Acknowledged / sent, 1.0 for an empty session.
    pub fn goodput(&self) -> f64 {
        if self.total_sent == 0 {
            1.0
        } else {
            f64::from(self.total_acked) / f64::from(self.total_sent)
        }
    }
}

impl fmt::Display for SenderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Client Address: {}", fmt_addr(self.local_addr))?;
        writeln!(f, "Server Address: {}", fmt_addr(self.peer_addr))?;
        writeln!(f, "Final State: {}", self.state)?;
        writeln!(f, "Elapsed: {:.3}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "Total Packets Sent: {}", self.total_sent)?;
        writeln!(f, "Total Packets ACKed: {}", self.total_acked)?;
        writeln!(f, "Packets Dropped: {}", self.total_dropped)?;
        writeln!(f, "Transmissions: {}", self.transmissions)?;
        writeln!(f, "Final Window Size: {}", self.final_window)?;
        writeln!(f, "Average Window Size: {:.2}", self.average_window)?;
        writeln!(f, "Drop Rate: {}", self.drop_probability)?;
        write!(f, "Goodput: {:.4}", self.goodput())
    }
}

/// Final (or partial) statistics of the receiving endpoint.
#[derive(Debug, Clone)]
pub struct ReceiverReport {
    pub state: ReceiverState,
    pub elapsed: Duration,
    /// Distinct segments the sender transmitted (from FIN, else inferred).
    pub total_sent: u32,
    /// Distinct segments received.
    pub total_received: u32,
    /// Distinct segments that were ever missing.
    pub total_dropped: u32,
    /// Segments still missing at close.
    pub still_missing: u32,
    /// Missing segments later filled by a retransmission.
    pub recovered: u32,
    /// Segments received more than once.
    pub duplicates: u32,
    /// Segment frames processed, duplicates included.
    pub frames: u64,
    pub goodput: f64,
    pub goodput_samples: Vec<GoodputSample>,
    pub received_history: Vec<Sample<u32>>,
    pub missing_history: Vec<Sample<u32>>,
    pub window_history: Vec<Sample<u32>>,
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
}

impl ReceiverReport {
    pub fn average_goodput(&self) -> f64 {
        if self.goodput_samples.is_empty() {
            return self.goodput;
        }
        self.goodput_samples.iter().map(|s| s.goodput).sum::<f64>()
            / self.goodput_samples.len() as f64
    }
}

impl fmt::Display for ReceiverReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Server Address: {}", fmt_addr(self.local_addr))?;
        writeln!(f, "Client Address: {}", fmt_addr(self.peer_addr))?;
        writeln!(f, "Final State: {}", self.state)?;
        writeln!(f, "Elapsed: {:.3}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "Total Packets Sent: {}", self.total_sent)?;
        writeln!(f, "Total Packets Received: {}", self.total_received)?;
        writeln!(f, "Packets Dropped: {}", self.total_dropped)?;
        writeln!(f, "Missing Packets: {}", self.still_missing)?;
        writeln!(f, "Recovered Packets: {}", self.recovered)?;
        writeln!(f, "Duplicate Packets: {}", self.duplicates)?;
        writeln!(f, "Average Goodput: {:.4}", self.average_goodput())?;
        write!(f, "Overall Goodput: {:.4}", self.goodput)
    }
}

fn fmt_addr(addr: Option<SocketAddr>) -> String {
    addr.map_or_else(|| "N/A".to_string(), |a| a.to_string())
}

/// Consumer of finished (or aborted) session statistics.
pub trait ReportSink: Send {
    fn sender_report(&mut self, report: &SenderReport) -> io::Result<()>;
    fn receiver_report(&mut self, report: &ReceiverReport) -> io::Result<()>;
}

/// Keeps every report it is handed.
#[derive(Debug, Default)]
pub struct MemoryReports {
    pub sender: Vec<SenderReport>,
    pub receiver: Vec<ReceiverReport>,
}

impl ReportSink for MemoryReports {
    fn sender_report(&mut self, report: &SenderReport) -> io::Result<()> {
        self.sender.push(report.clone());
        Ok(())
    }

    fn receiver_report(&mut self, report: &ReceiverReport) -> io::Result<()> {
        self.receiver.push(report.clone());
        Ok(())
    }
}

/// Writes reports as text and CSV files into a directory.
#[derive(Debug, Clone)]
pub struct ReportDir {
    dir: PathBuf,
}

impl ReportDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn create(&self, name: &str) -> io::Result<io::BufWriter<fs::File>> {
        fs::create_dir_all(&self.dir)?;
        Ok(io::BufWriter::new(fs::File::create(self.dir.join(name))?))
    }

    fn write_series(&self, name: &str, header: &str, series: &[Sample<u32>]) -> io::Result<()> {
        let mut out = self.create(name)?;
        writeln!(out, "seconds,{header}")?;
        for s in series {
            writeln!(out, "{:.6},{}", s.at.as_secs_f64(), s.value)?;
        }
        out.flush()
    }
}

impl ReportSink for ReportDir {
    fn sender_report(&mut self, report: &SenderReport) -> io::Result<()> {
        self.write_series("sender_window.csv", "window_size", &report.window_history)?;
        self.write_series("sender_sent.csv", "seq", &report.sent_history)?;
        self.write_series("sender_dropped.csv", "seq", &report.dropped_history)?;

        let mut out = self.create("sender_retransmissions.txt")?;
        writeln!(out, "# of retransmissions | # of packets")?;
        writeln!(out, "{}", "-".repeat(40))?;
        for (count, packets) in &report.histogram {
            writeln!(out, "{count} | {packets}")?;
        }
        out.flush()?;

        let mut out = self.create("sender_stats.txt")?;
        writeln!(out, "{report}")?;
        out.flush()
    }

    fn receiver_report(&mut self, report: &ReceiverReport) -> io::Result<()> {
        self.write_series("receiver_received.csv", "seq", &report.received_history)?;
        self.write_series("receiver_missing.csv", "seq", &report.missing_history)?;
        self.write_series("receiver_window.csv", "window_estimate", &report.window_history)?;

        let mut out = self.create("goodput.csv")?;
        writeln!(out, "seconds,received,sent,goodput")?;
        for s in &report.goodput_samples {
            writeln!(
                out,
                "{:.6},{},{},{:.4}",
                s.at.as_secs_f64(),
                s.received,
                s.sent,
                s.goodput
            )?;
        }
        out.flush()?;

        let mut out = self.create("receiver_stats.txt")?;
        writeln!(out, "{report}")?;
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender_report() -> SenderReport {
        let mut retransmissions = BTreeMap::new();
        retransmissions.insert(131, 1);
        SenderReport {
            state: SenderState::Closed,
            elapsed: Duration::from_millis(1500),
            final_window: 131,
            average_window: 70.5,
            drop_probability: 0.01,
            total_sent: 140,
            total_acked: 140,
            total_dropped: 1,
            transmissions: 141,
            histogram: retransmission_histogram(&retransmissions),
            retransmissions,
            window_history: vec![Sample {
                at: Duration::ZERO,
                value: 10,
            }],
            sent_history: Vec::new(),
            dropped_history: vec![Sample {
                at: Duration::from_millis(20),
                value: 131,
            }],
            local_addr: None,
            peer_addr: "127.0.0.1:12345".parse().ok(),
        }
    }

    #[test]
    fn histogram_counts_segments_per_retransmission_count() {
        let record: BTreeMap<u32, u32> = [(3, 1), (9, 2), (11, 1), (12, 0)].into_iter().collect();
        let histogram = retransmission_histogram(&record);
        assert_eq!(histogram.len(), 2);
        assert_eq!(histogram[&1], 2);
        assert_eq!(histogram[&2], 1);
    }

    #[test]
    fn sender_summary_text() {
        let text = sender_report().to_string();
        assert!(text.contains("Server Address: 127.0.0.1:12345"));
        assert!(text.contains("Client Address: N/A"));
        assert!(text.contains("Packets Dropped: 1"));
        assert!(text.contains("Final Window Size: 131"));
        assert!(text.contains("Drop Rate: 0.01\nGoodput"));
        assert!(text.ends_with("Goodput: 1.0000"));
    }

    #[test]
    fn report_dir_writes_histogram_file() {
        let dir = std::env::temp_dir().join(format!("sliding-window-report-{}", std::process::id()));
        let mut sink = ReportDir::new(&dir);
        sink.sender_report(&sender_report()).unwrap();

        let histogram = fs::read_to_string(dir.join("sender_retransmissions.txt")).unwrap();
        assert!(histogram.starts_with("# of retransmissions | # of packets\n"));
        assert!(histogram.contains("\n1 | 1\n"));

        let dropped = fs::read_to_string(dir.join("sender_dropped.csv")).unwrap();
        assert_eq!(dropped, "seconds,seq\n0.020000,131\n");

        fs::remove_dir_all(&dir).unwrap();
    }
}
