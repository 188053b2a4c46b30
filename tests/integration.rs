//! End-to-end scenarios over in-memory fabrics with hand-driven time.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::BytesMut;

use framelink::driver::Scheduler;
use framelink::link::{Connection, FnSink, LinkConfig, TdmaConfig, TdmaConnection};
use framelink::protocol::FrameMeta;
use framelink::time::{Clock, ManualMillis};
use framelink::transport::{memory, MemLink, Transport, WriteOutcome};
use framelink::{Header, MultiHeader};

type Received<H> = Rc<RefCell<Vec<(H, Vec<u8>)>>>;
type Corrupted<H> = Rc<RefCell<Vec<H>>>;

type BoxSink<H> = FnSink<Box<dyn FnMut(&H, &[u8])>, Box<dyn FnMut(&H)>>;

fn recording_sink<H: Copy + 'static>() -> (BoxSink<H>, Received<H>, Corrupted<H>) {
    let received: Received<H> = Rc::new(RefCell::new(Vec::new()));
    let corrupted: Corrupted<H> = Rc::new(RefCell::new(Vec::new()));
    let sink = FnSink::new(
        Box::new({
            let received = received.clone();
            move |h: &H, p: &[u8]| received.borrow_mut().push((*h, p.to_vec()))
        }) as Box<dyn FnMut(&H, &[u8])>,
        Box::new({
            let corrupted = corrupted.clone();
            move |h: &H| corrupted.borrow_mut().push(*h)
        }) as Box<dyn FnMut(&H)>,
    );
    (sink, received, corrupted)
}

fn connection(
    transport: MemLink,
    time: &ManualMillis,
    config: LinkConfig,
) -> (
    Connection<MemLink, BoxSink<Header>>,
    Received<Header>,
    Corrupted<Header>,
) {
    let (sink, received, corrupted) = recording_sink();
    let clock = Clock::with_source(Box::new(time.clone()));
    (
        Connection::with_clock(transport, sink, config, clock),
        received,
        corrupted,
    )
}

fn tdma_peer<T: Transport>(
    id: u8,
    config: TdmaConfig,
    transport: T,
    time: &ManualMillis,
) -> (TdmaConnection<T, BoxSink<MultiHeader>>, Received<MultiHeader>) {
    let (sink, received, _corrupted) = recording_sink();
    let clock = Clock::with_source(Box::new(time.clone()));
    (
        TdmaConnection::with_clock(id, config, transport, sink, clock),
        received,
    )
}

/// Scenario: single-byte payload round trip, with exact wire images.
#[test]
fn single_byte_payload_round_trip() {
    let time = ManualMillis::new();
    let (ta, tb) = memory::pair();
    let ta_tap = ta.clone();
    let (mut a, _a_rx, a_bad) = connection(ta, &time, LinkConfig::default());
    let (mut b, b_rx, _b_bad) = connection(tb, &time, LinkConfig::default());

    a.send_raw(7, &[0x42]).unwrap();
    b.tick();

    // B surfaced exactly one frame.
    {
        let received = b_rx.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.kind, 7);
        assert_eq!(received[0].1, vec![0x42]);
    }

    // The ACK wire image back to A names the acked kind.
    let mut ack_wire = BytesMut::new();
    let mut tap = ta_tap.clone();
    tap.read_available(&mut ack_wire);
    assert_eq!(
        &ack_wire[..],
        &[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0xFF, 0x00, 0x07, 0xEE]
    );

    // Hand the bytes back and let A consume them.
    ta_tap.inject(&ack_wire);
    a.tick();
    assert_eq!(a.pending(), 0);
    assert!(a_bad.borrow().is_empty());

    // Nothing further is delivered, ever.
    time.advance(1000);
    a.tick();
    b.tick();
    assert_eq!(b_rx.borrow().len(), 1);
}

/// Scenario: a false magic prefix is skipped without a corruption report.
#[test]
fn resync_after_noise() {
    let time = ManualMillis::new();
    let (_ta, tb) = memory::pair();
    let tb_inject = tb.clone();
    let (mut b, b_rx, b_bad) = connection(tb, &time, LinkConfig::default());

    let mut bytes = vec![0xDE, 0xAD, 0xBE, 0xEE];
    bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x07, 0x00, 0x42, 0xEE]);
    tb_inject.inject(&bytes);
    b.tick();

    assert_eq!(b_rx.borrow().len(), 1);
    assert!(b_bad.borrow().is_empty());
}

/// Scenario: a zeroed trailer produces exactly one corruption callback with
/// the header as sent.
#[test]
fn corruption_callback_carries_header() {
    let time = ManualMillis::new();
    let (_ta, tb) = memory::pair();
    let tb_inject = tb.clone();
    let (mut b, b_rx, b_bad) = connection(tb, &time, LinkConfig::default());

    tb_inject.inject(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x07, 0x05, 0x42, 0x00]);
    b.tick();
    b.tick();

    let bad = b_bad.borrow();
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].size, 1);
    assert_eq!(bad[0].kind, 7);
    assert_eq!(bad[0].id, 5);
    assert!(b_rx.borrow().is_empty());
}

/// Scenario: black-hole peer; three attempts at t = 0, 100, 200, empty
/// buffer at t = 300, and no user-visible signal.
#[test]
fn retry_exhaustion_schedule() {
    let time = ManualMillis::new();
    let (ta, _tb) = memory::pair();
    ta.set_black_hole(true);
    let config = LinkConfig {
        retry_count: 3,
        retry_timeout: 100,
        max_buffer: None,
    };
    let (mut a, a_rx, a_bad) = connection(ta, &time, config);

    a.send_raw(7, &[1]).unwrap(); // attempt 1 at t = 0

    time.advance(100);
    a.tick(); // attempt 2
    assert_eq!(a.pending(), 1);

    time.advance(100);
    a.tick(); // attempt 3
    assert_eq!(a.pending(), 1);

    time.advance(100);
    a.tick(); // disposal
    assert_eq!(a.pending(), 0);
    assert_eq!(a.write_buffer_len(), 0);
    assert!(a_rx.borrow().is_empty());
    assert!(a_bad.borrow().is_empty());
}

/// Refusal transparency: k refusals then acceptance cause exactly one
/// delivery.
#[test]
fn refusals_cause_exactly_one_emission() {
    let time = ManualMillis::new();
    let (ta, tb) = memory::pair();
    let ta_faults = ta.clone();
    let (mut a, _a_rx, _) = connection(ta, &time, LinkConfig::default());
    let (mut b, b_rx, _) = connection(tb, &time, LinkConfig::default());

    ta_faults.refuse_next(4);
    a.send_raw(3, &[9]).unwrap();

    for _ in 0..6 {
        a.tick();
        b.tick();
    }
    assert_eq!(b_rx.borrow().len(), 1);
    assert_eq!(a.pending(), 0);
}

/// Epoch wrap: the retry schedule is unaffected by an intervening origin
/// reset.
#[test]
fn retry_schedule_survives_epoch_reset() {
    let time = ManualMillis::new();
    time.set(60_400); // just below the reset threshold of 60_535
    let (ta, _tb) = memory::pair();
    ta.set_black_hole(true);
    let config = LinkConfig {
        retry_count: 3,
        retry_timeout: 100,
        max_buffer: None,
    };
    let (mut a, _, _) = connection(ta, &time, config);

    a.send_raw(7, &[1]).unwrap(); // attempt 1 at 60_400

    time.advance(100); // 60_500, still pre-reset
    a.tick(); // attempt 2
    assert_eq!(a.pending(), 1);

    time.advance(100); // 60_600: tick performs the epoch reset
    a.tick(); // attempt 3
    assert_eq!(a.pending(), 1);

    time.advance(100);
    a.tick(); // disposal, right on schedule
    assert_eq!(a.pending(), 0);
}

/// Scenario: three TDMA peers, each with one frame for the next peer; every
/// frame is delivered and acknowledged within a few token rotations.
#[test]
fn tdma_round_robin_delivery() {
    let time = ManualMillis::new();
    let mut links = memory::bus(3);
    let config = TdmaConfig {
        device_count: 3,
        node_timeout: 50,
        sync_interval: 0,
        retry_count: 3,
        max_buffer: None,
    };
    let t2 = links.pop().unwrap();
    let t1 = links.pop().unwrap();
    let t0 = links.pop().unwrap();
    let (mut c0, rx0) = tdma_peer(0, config, t0, &time);
    let (mut c1, rx1) = tdma_peer(1, config, t1, &time);
    let (mut c2, rx2) = tdma_peer(2, config, t2, &time);

    c0.send_raw(1, 10, &[0]).unwrap();
    c1.send_raw(2, 11, &[1]).unwrap();
    c2.send_raw(0, 12, &[2]).unwrap();

    // 300 ms in 10 ms slices: two full rotations of headroom.
    for _ in 0..30 {
        c0.tick();
        c1.tick();
        c2.tick();
        time.advance(10);
    }

    for (rx, kind, body) in [(&rx0, 12, 2u8), (&rx1, 10, 0), (&rx2, 11, 1)] {
        let received = rx.borrow();
        assert_eq!(received.len(), 1, "expected one frame for kind {}", kind);
        assert_eq!(received[0].0.kind, kind);
        assert_eq!(received[0].1, vec![body]);
    }

    // Everything acknowledged: no pending frames anywhere.
    assert_eq!(c0.pending(), 0);
    assert_eq!(c1.pending(), 0);
    assert_eq!(c2.pending(), 0);
}

/// Transport with a fixed one-way delay, for latency estimation tests.
struct DelayLink {
    time: ManualMillis,
    delay_ms: u64,
    inbox: Rc<RefCell<VecDeque<(u64, Vec<u8>)>>>,
    peer: Rc<RefCell<VecDeque<(u64, Vec<u8>)>>>,
}

impl Transport for DelayLink {
    fn read_available(&mut self, buf: &mut BytesMut) -> usize {
        let now = self.time.get();
        let mut inbox = self.inbox.borrow_mut();
        let mut n = 0;
        while inbox.front().is_some_and(|(ready, _)| *ready <= now) {
            let (_, bytes) = inbox.pop_front().unwrap();
            buf.extend_from_slice(&bytes);
            n += bytes.len();
        }
        n
    }

    fn write_frame(&mut self, _meta: FrameMeta, frame: &[u8]) -> WriteOutcome {
        self.peer
            .borrow_mut()
            .push_back((self.time.get() + self.delay_ms, frame.to_vec()));
        WriteOutcome::Accepted
    }
}

fn delayed_pair(time: &ManualMillis, delay_ms: u64) -> (DelayLink, DelayLink) {
    let a = Rc::new(RefCell::new(VecDeque::new()));
    let b = Rc::new(RefCell::new(VecDeque::new()));
    (
        DelayLink {
            time: time.clone(),
            delay_ms,
            inbox: a.clone(),
            peer: b.clone(),
        },
        DelayLink {
            time: time.clone(),
            delay_ms,
            inbox: b,
            peer: a,
        },
    )
}

/// Scenario: sync latency estimation over a 20 ms-each-way loopback settles
/// on half the observed round trip, within the tolerance band.
#[test]
fn tdma_sync_latency_estimate() {
    let time = ManualMillis::new();
    let (t_master, t_peer) = delayed_pair(&time, 20);
    let master_config = TdmaConfig {
        device_count: 2,
        node_timeout: 5000,
        sync_interval: 1000,
        retry_count: 3,
        max_buffer: None,
    };
    let peer_config = TdmaConfig {
        sync_interval: 0,
        ..master_config
    };
    let (mut master, _m_rx) = tdma_peer(0, master_config, t_master, &time);
    let (mut peer, _p_rx) = tdma_peer(1, peer_config, t_peer, &time);

    // Two full sync rounds in 10 ms slices.
    for _ in 0..210 {
        master.tick();
        peer.tick();
        time.advance(10);
    }

    let estimate = master.estimated_latency();
    assert!(
        (15..=25).contains(&estimate),
        "latency estimate {} outside the ±50% band around 20",
        estimate
    );
}

/// The cooperative scheduler drives engines through the Tick trait.
#[test]
fn scheduler_drives_linked_engines() {
    let time = ManualMillis::new();
    let (ta, tb) = memory::pair();
    let (mut a, _a_rx, _) = connection(ta, &time, LinkConfig::default());
    let (b, b_rx, _) = connection(tb, &time, LinkConfig::default());

    a.send_raw(21, b"hello").unwrap();
    a.send_raw(22, b"world").unwrap();

    let mut scheduler = Scheduler::new();
    scheduler.add(a);
    scheduler.add(b);
    scheduler.run_for(3);

    let received = b_rx.borrow();
    assert_eq!(received.len(), 2);
    assert_eq!(&received[0].1[..], b"hello");
    assert_eq!(&received[1].1[..], b"world");
}

/// Ordering: frames of one sender surface in send order under a lossless
/// transport.
#[test]
fn frames_surface_in_send_order() {
    let time = ManualMillis::new();
    let (ta, tb) = memory::pair();
    let (mut a, _, _) = connection(ta, &time, LinkConfig::default());
    let (mut b, b_rx, _) = connection(tb, &time, LinkConfig::default());

    for i in 0..10u8 {
        a.send_raw(100, &[i]).unwrap();
    }
    for _ in 0..3 {
        a.tick();
        b.tick();
    }

    let received = b_rx.borrow();
    assert_eq!(received.len(), 10);
    for (i, (header, payload)) in received.iter().enumerate() {
        assert_eq!(header.id, i as u8);
        assert_eq!(payload, &vec![i as u8]);
    }
}
