//! Per-endpoint session loops.
//!
//! # Architecture
//!
//! ```text
//!  client / sender task                               server / receiver task
//!  ┌───────────────────────────────┐   segments    ┌───────────────────────────┐
//!  │ loop:                         │──────────────▶│ loop:                     │
//!  │   send_next_batch → writer    │               │   read frame (bounded)    │
//!  │   select! { ack queue, tick } │◀──────────────│   on_segment → ACK writer │
//!  │   check_timeouts → writer     │     ACKs      │   FIN / EOF → Closed      │
//!  └───────────────▲───────────────┘               └───────────────────────────┘
//!                  │ mpsc
//!        reader task (FrameReader::spawn)
//! ```
//!
//! Both loops are single-threaded with respect to their state machine: the
//! sender owns its [`WindowSender`], the receiver its [`WindowReceiver`].  The
//! only concurrency is the background reader that turns the sender's inbound
//! byte stream into a queue of ACK frames, so reading never races with the
//! timeout check.
//!
//! Whatever ends a session, success or failure, both state machines end in
//! `Closed` and the report is handed to the [`ReportSink`] before the result
//! is returned.

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, MissedTickBehavior};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::frame::Frame;
use crate::handshake::{self, Connection, Listener};
use crate::loss::LossSource;
use crate::receiver::WindowReceiver;
use crate::report::{ReceiverReport, ReportSink, SenderReport};
use crate::sender::{Transmission, WindowSender};
use crate::transport::{FrameReader, FrameWriter};

/// Connect to `config.addr`, bootstrap, and stream every segment.
pub async fn run_client(
    config: &SessionConfig,
    loss: Box<dyn LossSource>,
    sink: &mut dyn ReportSink,
) -> Result<SenderReport, SessionError> {
    config.validate()?;
    let conn = handshake::connect(config).await?;
    run_sender(conn, config, loss, sink).await
}

/// Listen on `config.addr`, accept one client, and receive its stream.
pub async fn run_server(
    config: &SessionConfig,
    sink: &mut dyn ReportSink,
) -> Result<ReceiverReport, SessionError> {
    config.validate()?;
    let listener = Listener::bind(config.addr).await?;
    let conn: Connection<TcpStream> = listener.accept(config).await?;
    run_receiver(conn, config, sink).await
}

/// Drive the sender state machine over an established connection.
pub async fn run_sender<S>(
    conn: Connection<S>,
    config: &SessionConfig,
    loss: Box<dyn LossSource>,
    sink: &mut dyn ReportSink,
) -> Result<SenderReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Connection {
        reader,
        mut writer,
        local_addr,
        peer_addr,
        ..
    } = conn;
    let mut acks = reader.spawn();
    let mut sender = WindowSender::new(config, loss, Instant::now());

    let outcome = drive_sender(&mut sender, &mut writer, &mut acks, config).await;
    if outcome.is_err() {
        // No FIN on failure; end-of-stream still closes the receiver.
        if let Err(e) = writer.shutdown().await {
            log::debug!("[sender] shutdown after failure: {e}");
        }
        sender.on_close();
    }

    let mut report = sender.report(Instant::now());
    report.local_addr = local_addr;
    report.peer_addr = peer_addr;
    if let Err(e) = sink.sender_report(&report) {
        log::warn!("[sender] could not persist report: {e}");
    }

    match outcome {
        Ok(()) => {
            log::info!(
                "[sender] done: sent {} dropped {} final window {} goodput {:.4}",
                report.total_sent,
                report.total_dropped,
                report.final_window,
                report.goodput()
            );
            Ok(report)
        }
        Err(e) => {
            log::error!("[sender] session failed in state {}: {e}", report.state);
            Err(e)
        }
    }
}

async fn drive_sender<W>(
    sender: &mut WindowSender,
    writer: &mut FrameWriter<W>,
    acks: &mut mpsc::Receiver<Frame>,
    config: &SessionConfig,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let mut tick = tokio::time::interval(config.poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !sender.is_closed() {
        let batch = sender.send_next_batch(Instant::now());
        put_on_wire(writer, &batch).await?;

        tokio::select! {
            frame = acks.recv() => match frame {
                Some(frame) => handle_inbound(sender, frame),
                None => return Err(SessionError::ConnectionClosed),
            },
            _ = tick.tick() => {}
        }
        while let Ok(frame) = acks.try_recv() {
            handle_inbound(sender, frame);
        }
        if sender.is_closed() {
            break;
        }

        let retransmits = sender.check_timeouts(Instant::now())?;
        put_on_wire(writer, &retransmits).await?;
    }

    writer
        .send(&Frame::Fin {
            total: sender.total_sent(),
        })
        .await?;
    writer.shutdown().await?;
    Ok(())
}

fn handle_inbound(sender: &mut WindowSender, frame: Frame) {
    match frame {
        Frame::Ack { next } => {
            sender.on_ack(next, Instant::now());
        }
        other => log::warn!("[sender] ignoring unexpected frame {other:?}"),
    }
}

async fn put_on_wire<W>(writer: &mut FrameWriter<W>, batch: &[Transmission]) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    for t in batch.iter().filter(|t| t.delivered()) {
        writer.send(&t.frame()).await?;
        log::trace!("[sender] → SEQ {} (attempt {})", t.seq, t.attempt);
    }
    Ok(())
}

/// Drive the receiver state machine over an established connection.
pub async fn run_receiver<S>(
    conn: Connection<S>,
    config: &SessionConfig,
    sink: &mut dyn ReportSink,
) -> Result<ReceiverReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Connection {
        mut reader,
        mut writer,
        local_addr,
        peer_addr,
        ..
    } = conn;
    let mut receiver = WindowReceiver::new(config, Instant::now());

    let outcome = drive_receiver(&mut receiver, &mut reader, &mut writer, config).await;
    if outcome.is_err() {
        receiver.on_close();
    }
    // Lets the sender's reader task see end-of-stream.
    if let Err(e) = writer.shutdown().await {
        log::debug!("[receiver] shutdown after close: {e}");
    }

    let mut report = receiver.report(Instant::now());
    report.local_addr = local_addr;
    report.peer_addr = peer_addr;
    if let Err(e) = sink.receiver_report(&report) {
        log::warn!("[receiver] could not persist report: {e}");
    }

    match outcome {
        Ok(()) => {
            log::info!(
                "[receiver] done: received {} / {} dropped {} goodput {:.4}",
                report.total_received,
                report.total_sent,
                report.total_dropped,
                report.goodput
            );
            Ok(report)
        }
        Err(e) => {
            log::error!("[receiver] session failed in state {}: {e}", report.state);
            Err(e)
        }
    }
}

async fn drive_receiver<R, W>(
    receiver: &mut WindowReceiver,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &SessionConfig,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let idle = config.idle_timeout;
    while !receiver.is_closed() {
        let frame = timeout(idle, reader.read_frame())
            .await
            .map_err(|_| SessionError::Idle(idle))??;

        match frame {
            Some(Frame::Segment { seq }) => {
                if let Some(next) = receiver.on_segment(seq, Instant::now()) {
                    writer.send(&Frame::Ack { next }).await?;
                }
            }
            Some(Frame::Fin { total }) => receiver.on_fin(total),
            Some(other) => log::warn!("[receiver] ignoring unexpected frame {other:?}"),
            None => {
                log::warn!("[receiver] stream closed without FIN");
                receiver.on_close();
            }
        }
    }
    Ok(())
}
