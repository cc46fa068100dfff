//! Wire format for the frames exchanged between the two endpoints.
//!
//! The connection is a reliable byte stream, so every [`Frame`] carries its
//! own length and checksum.  This module is pure data transformation; the
//! stream I/O lives in [`crate::transport`].
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3               4
//! +---------------+-------------------------------+-------------------------------+
//! |     Kind      |        Payload Length         |           Checksum            |
//! +---------------+-------------------------------+-------------------------------+
//! |                                Payload ...                                    |
//! +-------------------------------------------------------------------------------+
//! ```
//!
//! Header size: [`HEADER_LEN`] = 5 bytes.  Segment, ACK and FIN payloads are a
//! single `u32`; greeting and success payloads are UTF-8 text.

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 5;

const OFF_KIND: usize = 0;
const OFF_PAYLOAD_LEN: usize = 1;
const OFF_CHECKSUM: usize = 3;

/// Frame kind tags.
pub mod kind {
    pub const GREETING: u8 = 1;
    pub const SUCCESS: u8 = 2;
    pub const SEGMENT: u8 = 3;
    pub const ACK: u8 = 4;
    pub const FIN: u8 = 5;
}

/// One message on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Client's opening string.
    Greeting(String),
    /// Server's reply once it accepts the greeting.
    Success(String),
    /// A data segment identified by its sequence number.
    Segment { seq: u32 },
    /// Cumulative acknowledgement: the next sequence number expected.
    Ack { next: u32 },
    /// End of stream; carries the number of distinct segments sent.
    Fin { total: u32 },
}

/// Errors that can arise when parsing a raw frame.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("buffer too short to contain a frame header")]
    BufferTooShort,
    #[error("payload length does not match the frame")]
    LengthMismatch,
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("unknown frame kind {0}")]
    UnknownKind(u8),
    #[error("frame text is not valid UTF-8")]
    InvalidText,
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLong(usize),
}

impl Frame {
    fn kind(&self) -> u8 {
        match self {
            Frame::Greeting(_) => kind::GREETING,
            Frame::Success(_) => kind::SUCCESS,
            Frame::Segment { .. } => kind::SEGMENT,
            Frame::Ack { .. } => kind::ACK,
            Frame::Fin { .. } => kind::FIN,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Frame::Greeting(text) | Frame::Success(text) => text.as_bytes().to_vec(),
            Frame::Segment { seq: n } | Frame::Ack { next: n } | Frame::Fin { total: n } => {
                n.to_be_bytes().to_vec()
            }
        }
    }

    /// Serialise this frame into a newly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let payload = self.payload();
        let payload_len =
            u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLong(payload.len()))?;

        let mut buf = vec![0u8; HEADER_LEN + payload.len()];
        buf[OFF_KIND] = self.kind();
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2].copy_from_slice(&payload_len.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&payload);

        // Checksum field is still zero here.
        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        Ok(buf)
    }

    /// Parse a [`Frame`] from exactly one frame's worth of bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::BufferTooShort);
        }
        let frame_kind = buf[OFF_KIND];
        let payload_len = u16::from_be_bytes([buf[OFF_PAYLOAD_LEN], buf[OFF_PAYLOAD_LEN + 1]]);
        let checksum = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);

        if buf.len() != HEADER_LEN + payload_len as usize {
            return Err(FrameError::LengthMismatch);
        }

        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&[0, 0]);
        if internet_checksum(&scratch) != checksum {
            return Err(FrameError::ChecksumFailed);
        }

        let payload = &buf[HEADER_LEN..];
        match frame_kind {
            kind::GREETING => Ok(Frame::Greeting(decode_text(payload)?)),
            kind::SUCCESS => Ok(Frame::Success(decode_text(payload)?)),
            kind::SEGMENT => Ok(Frame::Segment {
                seq: decode_u32(payload)?,
            }),
            kind::ACK => Ok(Frame::Ack {
                next: decode_u32(payload)?,
            }),
            kind::FIN => Ok(Frame::Fin {
                total: decode_u32(payload)?,
            }),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// Payload length announced by a frame header.
pub fn payload_len(header: &[u8; HEADER_LEN]) -> usize {
    u16::from_be_bytes([header[OFF_PAYLOAD_LEN], header[OFF_PAYLOAD_LEN + 1]]) as usize
}

fn decode_text(payload: &[u8]) -> Result<String, FrameError> {
    String::from_utf8(payload.to_vec()).map_err(|_| FrameError::InvalidText)
}

fn decode_u32(payload: &[u8]) -> Result<u32, FrameError> {
    match payload {
        [a, b, c, d] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(FrameError::LengthMismatch),
    }
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// The caller must zero the checksum field within `data` first.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    // Odd trailing byte is padded with a zero on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
