//! GDB remote serial protocol framing.
//!
//! A frame is one of:
//!
//! ```text
//!   +                  ack
//!   -                  nack
//!   0x03               interrupt
//!   $<payload>#<hh>    packet
//!   %<payload>#<hh>    notification
//! ```
//!
//! `hh` is the modulo-256 sum of the payload bytes as transmitted, in
//! lowercase hex. Inside a payload, `#`, `$`, `}` and `*` are escaped as
//! `}` followed by the byte XOR `0x20`. The framer only locates frame
//! boundaries; it never interprets payload contents.

use std::io::{self, Read};

use crate::error::FramingError;

pub const ACK: u8 = b'+';
pub const NACK: u8 = b'-';
pub const INTERRUPT: u8 = 0x03;
pub const PACKET_START: u8 = b'$';
pub const NOTIFY_START: u8 = b'%';
pub const CHECKSUM_MARK: u8 = b'#';
pub const ESCAPE: u8 = b'}';
pub const RUN_LENGTH: u8 = b'*';

const ESCAPE_XOR: u8 = 0x20;

/// The kind of a delimited frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `+`
    Ack,
    /// `-`
    Nack,
    /// `0x03`
    Interrupt,
    /// `$...#hh`
    Packet,
    /// `%...#hh`
    Notification,
}

/// A complete frame, holding the exact bytes read from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    raw: Vec<u8>,
}

impl Frame {
    /// Return the frame kind.
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Return the raw frame bytes, including start marker and checksum.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Consume the frame and return its raw bytes.
    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }

    /// Return the (still escaped) payload between the start marker and `#`.
    ///
    /// Single-byte frames have an empty payload.
    pub fn payload(&self) -> &[u8] {
        match self.kind {
            FrameKind::Packet | FrameKind::Notification => &self.raw[1..self.raw.len() - 3],
            _ => &[],
        }
    }

    /// Whether this frame carries a packet or notification body.
    pub fn is_packet(&self) -> bool {
        matches!(self.kind, FrameKind::Packet | FrameKind::Notification)
    }

    /// Whether the transmitted checksum matches the payload.
    ///
    /// Always true for single-byte frames.
    pub fn checksum_matches(&self) -> bool {
        if !self.is_packet() {
            return true;
        }
        let digits = &self.raw[self.raw.len() - 2..];
        parse_hex_byte(digits).is_some_and(|sent| sent == checksum(self.payload()))
    }
}

/// Try to delimit the next frame at the start of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only the beginning of a frame,
/// and the frame plus the number of bytes it occupies otherwise.
pub fn read_packet(buf: &[u8]) -> Result<Option<(Frame, usize)>, FramingError> {
    match scan_frame(buf, 1)? {
        Scan::Complete(frame, used) => Ok(Some((frame, used))),
        Scan::Partial(_) => Ok(None),
    }
}

/// Outcome of scanning a buffer for one frame.
enum Scan {
    /// A whole frame and the number of bytes it occupies.
    Complete(Frame, usize),
    /// More bytes are needed; scanning can resume at this offset.
    Partial(usize),
}

/// Delimit the frame at the start of `buf`, skipping the body bytes
/// before `from` that an earlier call already scanned.
///
/// `from` is always at least 1 and never points into the middle of an
/// escape pair.
fn scan_frame(buf: &[u8], from: usize) -> Result<Scan, FramingError> {
    let Some(&first) = buf.first() else {
        return Ok(Scan::Partial(1));
    };

    let kind = match first {
        ACK => FrameKind::Ack,
        NACK => FrameKind::Nack,
        INTERRUPT => FrameKind::Interrupt,
        PACKET_START => FrameKind::Packet,
        NOTIFY_START => FrameKind::Notification,
        byte => return Err(FramingError::UnexpectedByte { byte }),
    };

    if !matches!(kind, FrameKind::Packet | FrameKind::Notification) {
        let frame = Frame {
            kind,
            raw: vec![first],
        };
        return Ok(Scan::Complete(frame, 1));
    }

    let mut i = from.max(1);
    let hash = loop {
        let Some(&byte) = buf.get(i) else {
            return Ok(Scan::Partial(i));
        };
        match byte {
            CHECKSUM_MARK => break i,
            ESCAPE => i += 2,
            PACKET_START => {
                return Err(FramingError::UnescapedFrameStart { byte, offset: i });
            }
            _ => i += 1,
        }
    };

    let end = hash + 3;
    if buf.len() < end {
        return Ok(Scan::Partial(hash));
    }
    let digits = &buf[hash + 1..end];
    if parse_hex_byte(digits).is_none() {
        return Err(FramingError::InvalidChecksum {
            digits: String::from_utf8_lossy(digits).into_owned(),
        });
    }

    let frame = Frame {
        kind,
        raw: buf[..end].to_vec(),
    };
    Ok(Scan::Complete(frame, end))
}

/// Frame `payload` as a `$` packet, escaping it and appending the checksum.
pub fn write_packet(payload: &[u8]) -> Vec<u8> {
    frame_with(PACKET_START, payload)
}

/// Frame `payload` as a `%` notification.
pub fn write_notification(payload: &[u8]) -> Vec<u8> {
    frame_with(NOTIFY_START, payload)
}

fn frame_with(start: u8, payload: &[u8]) -> Vec<u8> {
    let body = escape_payload(payload);
    let mut out = Vec::with_capacity(body.len() + 4);
    out.push(start);
    out.extend_from_slice(&body);
    out.push(CHECKSUM_MARK);
    out.extend_from_slice(format!("{:02x}", checksum(&body)).as_bytes());
    out
}

/// Modulo-256 sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Escape the bytes that may not appear raw inside a payload.
pub fn escape_payload(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for &b in payload {
        if matches!(b, CHECKSUM_MARK | PACKET_START | ESCAPE | RUN_LENGTH) {
            out.push(ESCAPE);
            out.push(b ^ ESCAPE_XOR);
        } else {
            out.push(b);
        }
    }
    out
}

/// Reverse [`escape_payload`].
pub fn unescape_payload(escaped: &[u8]) -> Result<Vec<u8>, FramingError> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut iter = escaped.iter();
    while let Some(&b) = iter.next() {
        if b == ESCAPE {
            let &next = iter.next().ok_or(FramingError::DanglingEscape)?;
            out.push(next ^ ESCAPE_XOR);
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

fn parse_hex_byte(digits: &[u8]) -> Option<u8> {
    let text = std::str::from_utf8(digits).ok()?;
    if text.len() != 2 {
        return None;
    }
    u8::from_str_radix(text, 16).ok()
}

/// Errors from [`FrameReader::read_frame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameReadError {
    /// The byte stream is not valid RSP framing.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// The underlying reader failed.
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Buffers bytes as they arrive and splits them into frames.
///
/// Bytes of a partial frame are scanned once; each call resumes where the
/// previous scan stopped, so large frames cost time linear in their size.
/// The decoder does no I/O, so blocking and async readers share it.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    resume: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            resume: 1,
        }
    }

    /// Append bytes read from the wire.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame out of the buffer, if there is one.
    pub fn decode(&mut self) -> Result<Option<Frame>, FramingError> {
        match scan_frame(&self.buf, self.resume)? {
            Scan::Complete(frame, used) => {
                self.buf.drain(..used);
                self.resume = 1;
                Ok(Some(frame))
            }
            Scan::Partial(resume) => {
                self.resume = resume;
                Ok(None)
            }
        }
    }

    /// Check the buffer at end of stream: only a clean frame boundary is
    /// acceptable.
    pub fn finish(&self) -> Result<(), FramingError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(FramingError::Truncated {
                buffered: self.buf.len(),
            })
        }
    }

    /// Number of bytes fed but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Size of the chunks readers pull from their source.
pub const READ_CHUNK: usize = 4096;

/// Incremental frame reader over any blocking byte source.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    decoder: FrameDecoder,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Ok(None)` when the source closes cleanly between frames.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, FrameReadError> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                self.decoder.finish()?;
                return Ok(None);
            }
            self.decoder.feed(&chunk[..n]);
        }
    }

    /// Number of bytes read from the source but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    /// Return a reference to the underlying source.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwrap the reader, discarding any buffered partial frame.
    pub fn into_inner(self) -> R {
        self.inner
    }
}
