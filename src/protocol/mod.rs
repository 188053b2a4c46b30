//! Wire protocol: frame format, ingress scanning, outbound retry queue.

pub mod outbound;
pub mod scanner;
pub mod wire_format;

pub use outbound::{default_verdict, OutboundQueue, TransientInfo, Verdict};
pub use scanner::{FrameScanner, ScanEvent};
pub use wire_format::{
    kinds, FrameMeta, Header, MultiHeader, WireHeader, MAGIC, MAGIC_BYTES, MAGIC_LEN, TAIL,
};
