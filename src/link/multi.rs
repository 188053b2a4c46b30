//! Addressed reliable connection for shared mediums.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::codec::MsgPackCodec;
use crate::error::{FramelinkError, Result};
use crate::protocol::scanner::ScanEvent;
use crate::protocol::wire_format::{kinds, MultiHeader};
use crate::time::Clock;
use crate::transport::Transport;

use super::{LinkConfig, LinkCore, PacketSink};

/// Reliable connection between N endpoints sharing one medium.
///
/// Frames carry `(from, to)` endpoint ids. Traffic addressed elsewhere is
/// dropped silently (no ACK); our own traffic is surfaced and acknowledged
/// back to its sender. ACK matching is scoped to the acknowledging peer, so
/// identical kinds in flight to different destinations stay unambiguous.
pub struct MultiConnection<T, S> {
    core: LinkCore<MultiHeader, T, S>,
    id: u8,
}

impl<T, S> MultiConnection<T, S>
where
    T: Transport,
    S: PacketSink<MultiHeader>,
{
    pub fn new(id: u8, transport: T, sink: S, config: LinkConfig) -> Self {
        Self::with_clock(id, transport, sink, config, Clock::system())
    }

    /// Construct over an explicit clock (tests, simulations).
    pub fn with_clock(id: u8, transport: T, sink: S, config: LinkConfig, clock: Clock) -> Self {
        Self {
            core: LinkCore::new(transport, sink, config, clock),
            id,
        }
    }

    /// This endpoint's id.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// One scheduler pass: epoch upkeep, ingress drain, outbound walk.
    pub fn tick(&mut self) {
        self.core.clock.check_epoch();
        self.ingress_drain();
        self.core.flush();
    }

    /// Send a typed payload, MsgPack-encoded.
    pub fn send<V: serde::Serialize>(&mut self, to: u8, kind: u8, value: &V) -> Result<()> {
        let bytes = MsgPackCodec::encode(value)?;
        self.send_raw(to, kind, &bytes)
    }

    /// Send a pre-encoded payload.
    pub fn send_raw(&mut self, to: u8, kind: u8, payload: &[u8]) -> Result<()> {
        self.send_with(to, kind, |buf| {
            buf.extend_from_slice(payload);
            Ok(())
        })
    }

    /// Send with direct access to the payload region.
    pub fn send_with<F>(&mut self, to: u8, kind: u8, write_payload: F) -> Result<()>
    where
        F: FnOnce(&mut BytesMut) -> Result<()>,
    {
        if kinds::is_reserved(kind) {
            return Err(FramelinkError::ReservedKind(kind));
        }
        self.core
            .enqueue_and_attempt(MultiHeader::new(kind, self.id, to), write_payload)?;
        Ok(())
    }

    /// Reconfigure the retry interval.
    pub fn set_retry_timeout(&mut self, timeout: u16) {
        self.core.set_retry_timeout(timeout);
    }

    /// Bytes waiting in the ingress buffer.
    pub fn read_buffer_len(&self) -> usize {
        self.core.scanner.len()
    }

    /// Bytes held by pending outbound frames (transient prefixes included).
    pub fn write_buffer_len(&self) -> usize {
        self.core.outbound.len()
    }

    /// Number of pending outbound frames.
    pub fn pending(&self) -> usize {
        self.core.outbound.pending()
    }

    fn ingress_drain(&mut self) {
        self.core.pull_ingress();
        while let Some(event) = self.core.next_event() {
            match event {
                ScanEvent::Corrupted { header } => {
                    debug!("corrupted frame: kind {} id {}", header.kind, header.id);
                    self.core.sink.on_packet_corrupted(&header);
                }
                ScanEvent::Frame { header, payload } => self.dispatch(header, payload),
            }
        }
    }

    fn dispatch(&mut self, header: MultiHeader, payload: Bytes) {
        if header.to != self.id {
            return;
        }
        match header.kind {
            kinds::ACK => {
                let Some(&acked) = payload.first() else {
                    debug!("ACK with empty payload ignored");
                    return;
                };
                let from = header.from;
                self.core
                    .acknowledge(|pending| pending.to == from && pending.kind == acked);
            }
            kinds::SYNC => {
                // No coordinator here; reflect the latency probe to its sender.
                self.send_ack(header.from, kinds::SYNC);
            }
            _ => {
                self.core.sink.on_packet_received(&header, &payload);
                self.send_ack(header.from, header.kind);
            }
        }
    }

    fn send_ack(&mut self, to: u8, acked: u8) {
        let header = MultiHeader::new(kinds::ACK, self.id, to);
        let result = self.core.enqueue_and_attempt(header, |buf| {
            buf.put_u8(acked);
            Ok(())
        });
        if let Err(e) = result {
            debug!("failed to queue ACK: {}", e);
        }
    }
}

impl<T, S> crate::driver::Tick for MultiConnection<T, S>
where
    T: Transport,
    S: PacketSink<MultiHeader>,
{
    fn tick(&mut self) {
        MultiConnection::tick(self)
    }
}
