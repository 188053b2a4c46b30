//! # framelink
//!
//! A framed, reliable, multi-endpoint datagram protocol for constrained
//! links: UARTs, LoRa radios, in-memory test fabrics.
//!
//! The crate is a connection engine, not a transport: you bring a byte pipe
//! that can say "here is what arrived" and "no, not right now", and framelink
//! supplies framing with resynchronisation, per-frame retry/acknowledgement
//! state kept inline in the outbound buffer, a wrap-safe 16-bit millisecond
//! clock, and (optionally) TDMA token-passing arbitration across N peers.
//!
//! ## Architecture
//!
//! - **Scanning** ([`protocol::FrameScanner`]): magic-number search over a
//!   lossy byte stream, trailer validation, corruption recovery.
//! - **Retry queue** ([`protocol::OutboundQueue`]): pending frames carry
//!   their retry counter and next-due deadline inline, prefixed to the wire
//!   bytes in one contiguous buffer.
//! - **Clock** ([`time::Clock`]): 16-bit deadlines that survive counter
//!   wraparound through epoch-parity tagging and lazy migration.
//! - **Engines** ([`link`]): point-to-point, addressed, stateless and TDMA
//!   variants, all driven by a non-blocking `tick()`.
//!
//! ## Example
//!
//! ```
//! use framelink::link::{Connection, FnSink, LinkConfig};
//! use framelink::protocol::Header;
//! use framelink::transport::memory;
//!
//! let (wire_a, wire_b) = memory::pair();
//!
//! let mut a = Connection::new(
//!     wire_a,
//!     FnSink::new(|_h: &Header, _p: &[u8]| {}, |_h: &Header| {}),
//!     LinkConfig::default(),
//! );
//! let mut b = Connection::new(
//!     wire_b,
//!     FnSink::new(
//!         |h: &Header, p: &[u8]| println!("kind {}: {:?}", h.kind, p),
//!         |h: &Header| eprintln!("corrupted frame kind {}", h.kind),
//!     ),
//!     LinkConfig::default(),
//! );
//!
//! a.send_raw(7, &[0x42]).unwrap();
//! a.tick();
//! b.tick(); // delivers and acknowledges
//! a.tick(); // consumes the ack
//! assert_eq!(a.pending(), 0);
//! ```

pub mod codec;
pub mod driver;
pub mod error;
pub mod link;
pub mod protocol;
pub mod time;
pub mod transport;

pub use error::{FramelinkError, Result};
pub use link::{
    Connection, FnSink, LinkConfig, MultiConnection, NullSink, PacketSink, StatelessConnection,
    TdmaConfig, TdmaConnection,
};
pub use protocol::{Header, MultiHeader};
pub use transport::{Transport, WriteOutcome};
