//! Byte transports consumed by the connection engines.
//!
//! The engine asks exactly two things of a transport: *drain whatever bytes
//! you have for me right now* and *try to emit this frame atomically, and say
//! no if you cannot*. Refusal is the back-pressure signal; the retry queue
//! un-counts a refused attempt and keeps the frame immediately eligible.

pub mod memory;

use bytes::BytesMut;

use crate::protocol::wire_format::FrameMeta;

pub use memory::{bus, pair, MemLink};

/// Result of one frame emission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The frame was handed to the medium.
    Accepted,
    /// The medium cannot take the frame right now; try again later.
    Refused,
}

/// A non-blocking byte transport.
pub trait Transport {
    /// Append all currently available ingress bytes to `buf`.
    ///
    /// Returns the number of bytes appended; `0` means nothing is pending.
    /// Must never block.
    fn read_available(&mut self, buf: &mut BytesMut) -> usize;

    /// Attempt to emit one complete frame.
    ///
    /// `frame` holds the full wire image (magic through trailer); `meta`
    /// carries the kind and destination for transports with hardware
    /// addressing. Must never block; a transport exerting back-pressure
    /// returns [`WriteOutcome::Refused`].
    fn write_frame(&mut self, meta: FrameMeta, frame: &[u8]) -> WriteOutcome;
}
