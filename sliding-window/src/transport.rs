//! Framed byte-stream transport.
//!
//! [`FrameReader`] and [`FrameWriter`] wrap the two halves of a reliable,
//! ordered stream (a `tokio::net::TcpStream` in production, a
//! `tokio::io::DuplexStream` in tests) and speak [`Frame`] instead of raw
//! bytes.  All protocol logic lives elsewhere; this module owns only I/O.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use crate::frame::{self, Frame, HEADER_LEN};

/// Capacity of the queue between the reader task and the sender loop.
const ACK_QUEUE_DEPTH: usize = 1024;

/// Split a stream into a frame reader and a frame writer.
pub fn framed<S>(stream: S) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (rd, wr) = tokio::io::split(stream);
    (FrameReader::new(rd), FrameWriter::new(wr))
}

/// Reads whole frames off a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    skipped: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, skipped: 0 }
    }

    /// Number of malformed frames discarded so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Read the next well-formed frame.
    ///
    /// Returns `Ok(None)` when the peer closed the stream on a frame
    /// boundary.  Malformed frames are logged and skipped; the length field
    /// keeps the stream aligned.  Not cancel-safe: a partially read frame is
    /// lost if the future is dropped.
    pub async fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        loop {
            let mut header = [0u8; HEADER_LEN];
            if self.inner.read(&mut header[..1]).await? == 0 {
                return Ok(None);
            }
            self.inner.read_exact(&mut header[1..]).await?;

            let mut buf = vec![0u8; HEADER_LEN + frame::payload_len(&header)];
            buf[..HEADER_LEN].copy_from_slice(&header);
            self.inner.read_exact(&mut buf[HEADER_LEN..]).await?;

            match Frame::decode(&buf) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => {
                    self.skipped += 1;
                    log::warn!("[transport] dropping malformed frame: {e}");
                }
            }
        }
    }
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Move the reader onto a background task that forwards every frame into
    /// a queue.
    ///
    /// The queue closes when the peer closes the stream, when the stream
    /// fails, or when the receiving side is dropped.
    pub fn spawn(mut self) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(ACK_QUEUE_DEPTH);
        tokio::spawn(async move {
            loop {
                match self.read_frame().await {
                    Ok(Some(frame)) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        log::debug!("[transport] peer closed the stream");
                        break;
                    }
                    Err(e) => {
                        log::warn!("[transport] read failed: {e}");
                        break;
                    }
                }
            }
        });
        rx
    }
}

/// Writes whole frames onto a byte stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode `frame` and write it in full.
    pub async fn send(&mut self, frame: &Frame) -> io::Result<()> {
        let bytes = frame
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await
    }

    /// Close the write direction; the peer's reader sees end-of-stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe_in_order() {
        let (a, b) = tokio::io::duplex(256);
        let (_ra, mut wa) = framed(a);
        let (mut rb, _wb) = framed(b);

        wa.send(&Frame::Segment { seq: 1 }).await.unwrap();
        wa.send(&Frame::Segment { seq: 2 }).await.unwrap();
        wa.send(&Frame::Fin { total: 2 }).await.unwrap();

        assert_eq!(rb.read_frame().await.unwrap(), Some(Frame::Segment { seq: 1 }));
        assert_eq!(rb.read_frame().await.unwrap(), Some(Frame::Segment { seq: 2 }));
        assert_eq!(rb.read_frame().await.unwrap(), Some(Frame::Fin { total: 2 }));
    }

    #[tokio::test]
    async fn end_of_stream_reads_as_none() {
        let (a, b) = tokio::io::duplex(64);
        let (_ra, mut wa) = framed(a);
        let (mut rb, _wb) = framed(b);

        wa.send(&Frame::Ack { next: 5 }).await.unwrap();
        wa.shutdown().await.unwrap();

        assert_eq!(rb.read_frame().await.unwrap(), Some(Frame::Ack { next: 5 }));
        assert_eq!(rb.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let (mut raw, b) = tokio::io::duplex(64);
        let (mut rb, _wb) = framed(b);

        let mut bad = Frame::Segment { seq: 3 }.encode().unwrap();
        bad[HEADER_LEN] ^= 0x55;
        raw.write_all(&bad).await.unwrap();
        raw.write_all(&Frame::Segment { seq: 4 }.encode().unwrap())
            .await
            .unwrap();

        assert_eq!(rb.read_frame().await.unwrap(), Some(Frame::Segment { seq: 4 }));
        assert_eq!(rb.skipped(), 1);
    }

    #[tokio::test]
    async fn spawned_reader_forwards_then_closes() {
        let (a, b) = tokio::io::duplex(64);
        let (_ra, mut wa) = framed(a);
        let (rb, _wb) = framed(b);
        let mut rx = rb.spawn();

        wa.send(&Frame::Ack { next: 2 }).await.unwrap();
        wa.shutdown().await.unwrap();

        assert_eq!(rx.recv().await, Some(Frame::Ack { next: 2 }));
        assert_eq!(rx.recv().await, None);
    }
}
