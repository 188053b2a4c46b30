//! Wire format constants and header encoding.
//!
//! Every frame on the wire is self-delimited:
//! ```text
//! ┌───────────┬──────┬──────┬──────┬────────────┬─────────┬──────┐
//! │ MAGIC     │ size │ kind │ id   │ (from, to) │ payload │ TAIL │
//! │ 4 bytes BE│ 1    │ 1    │ 1    │ addressed  │ size    │ 1    │
//! └───────────┴──────┴──────┴──────┴────────────┴─────────┴──────┘
//! ```
//!
//! The magic is transmitted big-endian (`DE AD BE EF`); the trailer is a weak
//! sentinel, not an integrity check. The `(from, to)` pair is present only in
//! the addressed header layout.

use bytes::{BufMut, BytesMut};

/// Frame preamble, transmitted as bytes `DE AD BE EF`.
pub const MAGIC: u32 = 0xDEAD_BEEF;

/// Magic as wire bytes.
pub const MAGIC_BYTES: [u8; 4] = MAGIC.to_be_bytes();

/// Length of the magic preamble in bytes.
pub const MAGIC_LEN: usize = 4;

/// Frame trailer sentinel.
pub const TAIL: u8 = 0xEE;

/// Reserved packet kinds.
pub mod kinds {
    /// ACK frame. Payload is exactly one byte: the acknowledged kind.
    pub const ACK: u8 = 255;

    /// SYNC frame. Payload is exactly one byte: the sender's token view.
    pub const SYNC: u8 = 254;

    /// Whether `kind` is reserved for protocol control frames.
    #[inline]
    pub fn is_reserved(kind: u8) -> bool {
        kind >= SYNC
    }
}

/// The part of a frame a transport may care about without parsing bytes.
///
/// Radio transports use the destination to program hardware addressing
/// (the LoRa backend sets the modem's `to` header from it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub kind: u8,
    pub to: Option<u8>,
}

/// Header layout shared by the engine variants.
///
/// Implementations must encode exactly [`WIRE_LEN`](WireHeader::WIRE_LEN)
/// bytes and decode from a slice of at least that length.
pub trait WireHeader: Copy + std::fmt::Debug {
    /// Encoded header length in bytes (after the magic).
    const WIRE_LEN: usize;

    fn kind(&self) -> u8;
    fn id(&self) -> u8;
    fn size(&self) -> u8;
    fn set_size(&mut self, size: u8);
    fn set_id(&mut self, id: u8);
    fn encode(&self, buf: &mut BytesMut);
    fn decode(buf: &[u8]) -> Self;
    fn meta(&self) -> FrameMeta;
}

/// Point-to-point header: `{size, kind, id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload byte count (excludes magic, header, trailer).
    pub size: u8,
    /// Application-defined kind; 254 and 255 are reserved.
    pub kind: u8,
    /// Sender-assigned sequence, wrapping modulo 256.
    pub id: u8,
}

impl Header {
    pub fn new(kind: u8) -> Self {
        Self {
            size: 0,
            kind,
            id: 0,
        }
    }
}

impl WireHeader for Header {
    const WIRE_LEN: usize = 3;

    #[inline]
    fn kind(&self) -> u8 {
        self.kind
    }

    #[inline]
    fn id(&self) -> u8 {
        self.id
    }

    #[inline]
    fn size(&self) -> u8 {
        self.size
    }

    #[inline]
    fn set_size(&mut self, size: u8) {
        self.size = size;
    }

    #[inline]
    fn set_id(&mut self, id: u8) {
        self.id = id;
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.size);
        buf.put_u8(self.kind);
        buf.put_u8(self.id);
    }

    fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= Self::WIRE_LEN);
        Self {
            size: buf[0],
            kind: buf[1],
            id: buf[2],
        }
    }

    fn meta(&self) -> FrameMeta {
        FrameMeta {
            kind: self.kind,
            to: None,
        }
    }
}

/// Addressed header: `{size, kind, id, from, to}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiHeader {
    pub size: u8,
    pub kind: u8,
    pub id: u8,
    /// Sending endpoint.
    pub from: u8,
    /// Destination endpoint.
    pub to: u8,
}

impl MultiHeader {
    pub fn new(kind: u8, from: u8, to: u8) -> Self {
        Self {
            size: 0,
            kind,
            id: 0,
            from,
            to,
        }
    }
}

impl WireHeader for MultiHeader {
    const WIRE_LEN: usize = 5;

    #[inline]
    fn kind(&self) -> u8 {
        self.kind
    }

    #[inline]
    fn id(&self) -> u8 {
        self.id
    }

    #[inline]
    fn size(&self) -> u8 {
        self.size
    }

    #[inline]
    fn set_size(&mut self, size: u8) {
        self.size = size;
    }

    #[inline]
    fn set_id(&mut self, id: u8) {
        self.id = id;
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.size);
        buf.put_u8(self.kind);
        buf.put_u8(self.id);
        buf.put_u8(self.from);
        buf.put_u8(self.to);
    }

    fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= Self::WIRE_LEN);
        Self {
            size: buf[0],
            kind: buf[1],
            id: buf[2],
            from: buf[3],
            to: buf[4],
        }
    }

    fn meta(&self) -> FrameMeta {
        FrameMeta {
            kind: self.kind,
            to: Some(self.to),
        }
    }
}
