//! Fire-and-forget connection for transports that are already reliable.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::protocol::outbound::Verdict;
use crate::protocol::scanner::ScanEvent;
use crate::protocol::wire_format::Header;
use crate::time::Clock;
use crate::transport::Transport;

use super::{LinkConfig, LinkCore, PacketSink};

/// Point-to-point connection without retries or acknowledgements.
///
/// Every outbound frame is emitted once and disposed; every decoded ingress
/// frame, reserved kinds included, is surfaced to the sink untouched. Kind
/// bytes carry no protocol meaning on a stateless link. A transport refusal
/// still holds the frame for the next pass, so back-pressure is respected.
pub struct StatelessConnection<T, S> {
    core: LinkCore<Header, T, S>,
}

impl<T, S> StatelessConnection<T, S>
where
    T: Transport,
    S: PacketSink<Header>,
{
    pub fn new(transport: T, sink: S) -> Self {
        Self::with_clock(transport, sink, Clock::system())
    }

    /// Construct over an explicit clock (tests, simulations).
    pub fn with_clock(transport: T, sink: S, clock: Clock) -> Self {
        let config = LinkConfig {
            retry_count: 0,
            retry_timeout: 0,
            max_buffer: None,
        };
        Self {
            core: LinkCore::new(transport, sink, config, clock),
        }
    }

    /// One scheduler pass: epoch upkeep, ingress drain, outbound emission.
    pub fn tick(&mut self) {
        self.core.clock.check_epoch();
        self.ingress_drain();
        self.core.flush_with(|_t, _h, _c| Verdict::FIRE_AND_FORGET);
    }

    /// Send a typed payload, MsgPack-encoded.
    pub fn send<V: serde::Serialize>(&mut self, kind: u8, value: &V) -> Result<()> {
        let bytes = MsgPackCodec::encode(value)?;
        self.send_raw(kind, &bytes)
    }

    /// Send a pre-encoded payload.
    pub fn send_raw(&mut self, kind: u8, payload: &[u8]) -> Result<()> {
        self.send_with(kind, |buf| {
            buf.extend_from_slice(payload);
            Ok(())
        })
    }

    /// Send with direct access to the payload region.
    pub fn send_with<F>(&mut self, kind: u8, write_payload: F) -> Result<()>
    where
        F: FnOnce(&mut BytesMut) -> Result<()>,
    {
        self.core.enqueue_and_attempt_with(Header::new(kind), write_payload, |_t, _h, _c| {
            Verdict::FIRE_AND_FORGET
        })?;
        Ok(())
    }

    /// Bytes waiting in the ingress buffer.
    pub fn read_buffer_len(&self) -> usize {
        self.core.scanner.len()
    }

    /// Bytes still queued behind transport back-pressure.
    pub fn write_buffer_len(&self) -> usize {
        self.core.outbound.len()
    }

    fn ingress_drain(&mut self) {
        self.core.pull_ingress();
        while let Some(event) = self.core.next_event() {
            match event {
                ScanEvent::Corrupted { header } => {
                    debug!("corrupted frame: kind {} id {}", header.kind, header.id);
                    self.core.sink.on_packet_corrupted(&header);
                }
                ScanEvent::Frame { header, payload } => self.surface(header, payload),
            }
        }
    }

    fn surface(&mut self, header: Header, payload: Bytes) {
        self.core.sink.on_packet_received(&header, &payload);
    }
}

impl<T, S> crate::driver::Tick for StatelessConnection<T, S>
where
    T: Transport,
    S: PacketSink<Header>,
{
    fn tick(&mut self) {
        StatelessConnection::tick(self)
    }
}
