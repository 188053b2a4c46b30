//! Ingress framing: locate frame boundaries in a lossy byte stream.
//!
//! The scanner accumulates transport bytes in a single `BytesMut` and yields
//! one event per decoded frame. Resynchronisation contract:
//!
//! - The magic search advances one byte at a time, so a false preamble inside
//!   noise cannot mask a real frame behind it.
//! - A trailer mismatch reports the frame as corrupted and resumes scanning at
//!   the byte *after* the magic, re-synchronising on magic sequences embedded
//!   in what looked like payload.
//! - An exhausted scan discards the consumed prefix, keeping only a trailing
//!   partial magic that the next read may complete.

use std::marker::PhantomData;

use bytes::{Buf, Bytes, BytesMut};

use super::wire_format::{WireHeader, MAGIC_BYTES, MAGIC_LEN, TAIL};

/// One decoded ingress event.
#[derive(Debug)]
pub enum ScanEvent<H> {
    /// A well-formed frame: parsed header plus zero-copy payload.
    Frame { header: H, payload: Bytes },
    /// Magic and header parsed but the trailer byte did not match.
    Corrupted { header: H },
}

/// Accumulating frame scanner over a byte stream.
pub struct FrameScanner<H> {
    buffer: BytesMut,
    _header: PhantomData<H>,
}

impl<H: WireHeader> FrameScanner<H> {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            _header: PhantomData,
        }
    }

    /// Append raw transport bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Direct access for transports that fill the buffer themselves.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Scan for the next frame or corruption event.
    ///
    /// Returns `None` when the buffered bytes hold no complete frame; the
    /// partial tail (if any) is retained for the next ingress cycle.
    pub fn next_event(&mut self) -> Option<ScanEvent<H>> {
        let Some(pos) = find_magic(&self.buffer) else {
            let keep = partial_magic_suffix(&self.buffer);
            let junk = self.buffer.len() - keep;
            self.buffer.advance(junk);
            return None;
        };
        // Junk before the magic is consumed for good.
        self.buffer.advance(pos);

        if self.buffer.len() < MAGIC_LEN + H::WIRE_LEN {
            return None;
        }
        let header = H::decode(&self.buffer[MAGIC_LEN..MAGIC_LEN + H::WIRE_LEN]);
        let frame_len = MAGIC_LEN + H::WIRE_LEN + header.size() as usize + 1;
        if self.buffer.len() < frame_len {
            return None;
        }

        if self.buffer[frame_len - 1] != TAIL {
            self.buffer.advance(MAGIC_LEN);
            return Some(ScanEvent::Corrupted { header });
        }

        let mut frame = self.buffer.split_to(frame_len);
        frame.advance(MAGIC_LEN + H::WIRE_LEN);
        frame.truncate(header.size() as usize);
        Some(ScanEvent::Frame {
            header,
            payload: frame.freeze(),
        })
    }
}

impl<H: WireHeader> Default for FrameScanner<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Offset of the first complete magic in `buf`, scanning byte by byte.
fn find_magic(buf: &[u8]) -> Option<usize> {
    if buf.len() < MAGIC_LEN {
        return None;
    }
    (0..=buf.len() - MAGIC_LEN).find(|&i| buf[i..i + MAGIC_LEN] == MAGIC_BYTES)
}

/// Length of the longest magic prefix ending the buffer.
fn partial_magic_suffix(buf: &[u8]) -> usize {
    for keep in (1..MAGIC_LEN).rev() {
        if buf.len() >= keep && buf[buf.len() - keep..] == MAGIC_BYTES[..keep] {
            return keep;
        }
    }
    0
}
