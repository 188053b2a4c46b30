//! Connection engines.
//!
//! Four variants share one core (clock + ingress scanner + outbound retry
//! queue + transport + sink) and differ in header layout and dispatch policy:
//!
//! - [`Connection`]: point-to-point, reliable (retries + ACKs)
//! - [`MultiConnection`]: addressed, reliable
//! - [`StatelessConnection`]: fire-and-forget over trustworthy transports
//! - [`TdmaConnection`]: addressed plus token-passing transmit arbitration
//!
//! All of them are driven by an external scheduler calling
//! [`tick()`](crate::driver::Tick::tick): one ingress drain, one outbound
//! walk, never blocking.

mod connection;
mod multi;
mod stateless;
mod tdma;

pub use connection::Connection;
pub use multi::MultiConnection;
pub use stateless::StatelessConnection;
pub use tdma::{TdmaConfig, TdmaConnection};

use bytes::BytesMut;

use crate::error::Result;
use crate::protocol::outbound::{default_verdict, OutboundQueue, TransientInfo, Verdict};
use crate::protocol::scanner::{FrameScanner, ScanEvent};
use crate::protocol::wire_format::WireHeader;
use crate::time::Clock;
use crate::transport::Transport;

/// Reliability configuration shared by the engine variants.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// Maximum transmission attempts per frame.
    pub retry_count: u8,
    /// Milliseconds between attempts.
    pub retry_timeout: u16,
    /// Optional byte bound on the outbound buffer.
    pub max_buffer: Option<usize>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_timeout: 100,
            max_buffer: None,
        }
    }
}

/// User-supplied receiver for decoded traffic.
pub trait PacketSink<H> {
    /// A well-formed application frame arrived.
    fn on_packet_received(&mut self, header: &H, payload: &[u8]);

    /// A frame's trailer failed validation; the stream has re-synced.
    fn on_packet_corrupted(&mut self, header: &H);
}

/// Sink over two closures.
pub struct FnSink<R, C> {
    on_received: R,
    on_corrupted: C,
}

impl<R, C> FnSink<R, C> {
    pub fn new(on_received: R, on_corrupted: C) -> Self {
        Self {
            on_received,
            on_corrupted,
        }
    }
}

impl<H, R, C> PacketSink<H> for FnSink<R, C>
where
    R: FnMut(&H, &[u8]),
    C: FnMut(&H),
{
    fn on_packet_received(&mut self, header: &H, payload: &[u8]) {
        (self.on_received)(header, payload)
    }

    fn on_packet_corrupted(&mut self, header: &H) {
        (self.on_corrupted)(header)
    }
}

/// Sink that discards everything.
pub struct NullSink;

impl<H> PacketSink<H> for NullSink {
    fn on_packet_received(&mut self, _header: &H, _payload: &[u8]) {}

    fn on_packet_corrupted(&mut self, _header: &H) {}
}

/// State shared by every engine variant.
pub(crate) struct LinkCore<H, T, S> {
    pub(crate) clock: Clock,
    pub(crate) scanner: FrameScanner<H>,
    pub(crate) outbound: OutboundQueue<H>,
    pub(crate) transport: T,
    pub(crate) sink: S,
    pub(crate) config: LinkConfig,
}

impl<H, T, S> LinkCore<H, T, S>
where
    H: WireHeader,
    T: Transport,
    S: PacketSink<H>,
{
    pub(crate) fn new(transport: T, sink: S, config: LinkConfig, mut clock: Clock) -> Self {
        clock.set_guard(config.retry_timeout);
        let mut outbound = OutboundQueue::new();
        outbound.set_max(config.max_buffer);
        Self {
            clock,
            scanner: FrameScanner::new(),
            outbound,
            transport,
            sink,
            config,
        }
    }

    pub(crate) fn set_retry_timeout(&mut self, timeout: u16) {
        self.config.retry_timeout = timeout;
        self.clock.set_guard(timeout);
    }

    /// Pull whatever the transport has into the scanner.
    pub(crate) fn pull_ingress(&mut self) {
        self.transport.read_available(self.scanner.buffer_mut());
    }

    pub(crate) fn next_event(&mut self) -> Option<ScanEvent<H>> {
        self.scanner.next_event()
    }

    /// Append a frame and give it its first transmission attempt.
    pub(crate) fn enqueue_and_attempt<F>(&mut self, header: H, write_payload: F) -> Result<H>
    where
        F: FnOnce(&mut BytesMut) -> Result<()>,
    {
        let cfg = self.config;
        self.enqueue_and_attempt_with(header, write_payload, |t, h, c| {
            default_verdict(t, h, c, cfg.retry_count, cfg.retry_timeout)
        })
    }

    /// As [`enqueue_and_attempt`](Self::enqueue_and_attempt), with a custom
    /// transmit policy.
    pub(crate) fn enqueue_and_attempt_with<F, P>(
        &mut self,
        header: H,
        write_payload: F,
        policy: P,
    ) -> Result<H>
    where
        F: FnOnce(&mut BytesMut) -> Result<()>,
        P: FnMut(&mut TransientInfo, &H, &Clock) -> Verdict,
    {
        let (offset, header) = self.outbound.enqueue(header, &self.clock, write_payload)?;
        let LinkCore {
            outbound,
            clock,
            transport,
            ..
        } = self;
        outbound.transmit_at(offset, clock, policy, |meta, frame| {
            transport.write_frame(meta, frame)
        });
        Ok(header)
    }

    /// One outbound pass with the default transmit policy.
    pub(crate) fn flush(&mut self) {
        let cfg = self.config;
        self.flush_with(|t, h, c| default_verdict(t, h, c, cfg.retry_count, cfg.retry_timeout));
    }

    /// One outbound pass with a custom transmit policy.
    pub(crate) fn flush_with<P>(&mut self, policy: P)
    where
        P: FnMut(&mut TransientInfo, &H, &Clock) -> Verdict,
    {
        let LinkCore {
            outbound,
            clock,
            transport,
            ..
        } = self;
        outbound.walk(clock, policy, |meta, frame| {
            transport.write_frame(meta, frame)
        });
    }

    /// Dispose the first pending frame matching an incoming ACK.
    pub(crate) fn acknowledge<F>(&mut self, matches: F) -> bool
    where
        F: FnMut(&H) -> bool,
    {
        self.outbound.acknowledge(&self.clock, matches)
    }
}
