//! Point-to-point reliable connection.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::codec::MsgPackCodec;
use crate::error::{FramelinkError, Result};
use crate::protocol::scanner::ScanEvent;
use crate::protocol::wire_format::{kinds, Header};
use crate::time::Clock;
use crate::transport::Transport;

use super::{LinkConfig, LinkCore, PacketSink};

/// Reliable connection between exactly two endpoints.
///
/// Every application frame is retried until acknowledged or until the retry
/// budget is exhausted (then it is dropped silently; callers that need
/// success signalling use application-level replies). Incoming application
/// frames are surfaced through the sink and acknowledged automatically.
pub struct Connection<T, S> {
    core: LinkCore<Header, T, S>,
}

impl<T, S> Connection<T, S>
where
    T: Transport,
    S: PacketSink<Header>,
{
    pub fn new(transport: T, sink: S, config: LinkConfig) -> Self {
        Self::with_clock(transport, sink, config, Clock::system())
    }

    /// Construct over an explicit clock (tests, simulations).
    pub fn with_clock(transport: T, sink: S, config: LinkConfig, clock: Clock) -> Self {
        Self {
            core: LinkCore::new(transport, sink, config, clock),
        }
    }

    /// One scheduler pass: epoch upkeep, ingress drain, outbound walk.
    pub fn tick(&mut self) {
        self.core.clock.check_epoch();
        self.ingress_drain();
        self.core.flush();
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
        if kinds::is_reserved(kind) {
            return Err(FramelinkError::ReservedKind(kind));
        }
        self.core.enqueue_and_attempt(Header::new(kind), write_payload)?;
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

    fn dispatch(&mut self, header: Header, payload: Bytes) {
        match header.kind {
            kinds::ACK => {
                let Some(&acked) = payload.first() else {
                    debug!("ACK with empty payload ignored");
                    return;
                };
                self.core.acknowledge(|pending| pending.kind == acked);
            }
            kinds::SYNC => {
                // No coordinator on a point-to-point link; still reflect the
                // latency probe.
                self.send_ack(kinds::SYNC);
            }
            _ => {
                self.core.sink.on_packet_received(&header, &payload);
                self.send_ack(header.kind);
            }
        }
    }

    fn send_ack(&mut self, acked: u8) {
        let result = self.core.enqueue_and_attempt(Header::new(kinds::ACK), |buf| {
            buf.put_u8(acked);
            Ok(())
        });
        if let Err(e) = result {
            debug!("failed to queue ACK: {}", e);
        }
    }
}

impl<T, S> crate::driver::Tick for Connection<T, S>
where
    T: Transport,
    S: PacketSink<Header>,
{
    fn tick(&mut self) {
        Connection::tick(self)
    }
}
