//! Payload serialization.
//!
//! Frames carry at most 255 payload bytes, so the typed send path uses
//! MessagePack in its compact positional form. Pre-encoded byte payloads
//! bypass the codec entirely via `send_raw`.

mod msgpack;

pub use msgpack::MsgPackCodec;
