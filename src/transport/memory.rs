//! In-memory test fabrics.
//!
//! These transports wire endpoints together through shared byte queues, for
//! tests, simulations, and same-process loopback. They follow the
//! single-threaded cooperative model: sharing is `Rc<RefCell<…>>`, nothing
//! blocks, and every accepted write is immediately visible to the peers'
//! next ingress drain.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytes::BytesMut;

use super::{Transport, WriteOutcome};
use crate::protocol::wire_format::FrameMeta;

type Inbox = Rc<RefCell<BytesMut>>;

/// One endpoint of an in-memory fabric.
///
/// Writes are copied into every peer inbox; reads drain this endpoint's own
/// inbox. Cloning yields another handle onto the same endpoint (shared inbox
/// and fault state), so a test can move one handle into an engine and keep
/// the other for injection and fault control.
///
/// Fault knobs cover the failure modes the engines must handle: refused
/// writes, black-holed writes, and raw noise on ingress.
#[derive(Clone)]
pub struct MemLink {
    inbox: Inbox,
    peers: Vec<Inbox>,
    refusals_left: Rc<Cell<u32>>,
    black_hole: Rc<Cell<bool>>,
}

impl MemLink {
    fn new(inbox: Inbox, peers: Vec<Inbox>) -> Self {
        Self {
            inbox,
            peers,
            refusals_left: Rc::new(Cell::new(0)),
            black_hole: Rc::new(Cell::new(false)),
        }
    }

    /// Refuse the next `count` write attempts.
    pub fn refuse_next(&self, count: u32) {
        self.refusals_left.set(count);
    }

    /// Accept writes but deliver them nowhere (an unreachable peer).
    pub fn set_black_hole(&self, enabled: bool) {
        self.black_hole.set(enabled);
    }

    /// Push raw bytes straight into this endpoint's ingress (noise injection).
    pub fn inject(&self, bytes: &[u8]) {
        self.inbox.borrow_mut().extend_from_slice(bytes);
    }

    /// Bytes waiting in this endpoint's inbox.
    pub fn pending_rx(&self) -> usize {
        self.inbox.borrow().len()
    }
}

impl Transport for MemLink {
    fn read_available(&mut self, buf: &mut BytesMut) -> usize {
        let mut inbox = self.inbox.borrow_mut();
        let n = inbox.len();
        buf.extend_from_slice(&inbox);
        inbox.clear();
        n
    }

    fn write_frame(&mut self, _meta: FrameMeta, frame: &[u8]) -> WriteOutcome {
        let refusals = self.refusals_left.get();
        if refusals > 0 {
            self.refusals_left.set(refusals - 1);
            return WriteOutcome::Refused;
        }
        if !self.black_hole.get() {
            for peer in &self.peers {
                peer.borrow_mut().extend_from_slice(frame);
            }
        }
        WriteOutcome::Accepted
    }
}

/// A crossover pair: what one endpoint writes, the other reads.
pub fn pair() -> (MemLink, MemLink) {
    let a: Inbox = Rc::new(RefCell::new(BytesMut::new()));
    let b: Inbox = Rc::new(RefCell::new(BytesMut::new()));
    (
        MemLink::new(a.clone(), vec![b.clone()]),
        MemLink::new(b, vec![a]),
    )
}

/// A shared broadcast medium with `count` endpoints.
///
/// Every accepted write is copied to every *other* endpoint, the way a
/// shared radio channel behaves.
pub fn bus(count: usize) -> Vec<MemLink> {
    let inboxes: Vec<Inbox> = (0..count)
        .map(|_| Rc::new(RefCell::new(BytesMut::new())))
        .collect();
    inboxes
        .iter()
        .enumerate()
        .map(|(i, inbox)| {
            let peers = inboxes
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| p.clone())
                .collect();
            MemLink::new(inbox.clone(), peers)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> FrameMeta {
        FrameMeta { kind: 1, to: None }
    }

    fn drain(link: &mut MemLink) -> Vec<u8> {
        let mut buf = BytesMut::new();
        link.read_available(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_pair_crossover() {
        let (mut a, mut b) = pair();
        assert_eq!(a.write_frame(meta(), b"ping"), WriteOutcome::Accepted);
        assert_eq!(drain(&mut b), b"ping");
        assert!(drain(&mut a).is_empty());

        assert_eq!(b.write_frame(meta(), b"pong"), WriteOutcome::Accepted);
        assert_eq!(drain(&mut a), b"pong");
    }

    #[test]
    fn test_reads_are_draining() {
        let (mut a, mut b) = pair();
        a.write_frame(meta(), b"once");
        assert_eq!(drain(&mut b), b"once");
        assert_eq!(drain(&mut b), b"");
    }

    #[test]
    fn test_bus_broadcasts_to_everyone_else() {
        let mut links = bus(3);
        links[0].write_frame(meta(), b"hello");

        assert!(drain(&mut links[0]).is_empty());
        assert_eq!(drain(&mut links[1]), b"hello");
        assert_eq!(drain(&mut links[2]), b"hello");
    }

    #[test]
    fn test_forced_refusals_then_accept() {
        let (mut a, mut b) = pair();
        a.refuse_next(2);
        assert_eq!(a.write_frame(meta(), b"x"), WriteOutcome::Refused);
        assert_eq!(a.write_frame(meta(), b"x"), WriteOutcome::Refused);
        assert_eq!(a.write_frame(meta(), b"x"), WriteOutcome::Accepted);
        assert_eq!(drain(&mut b), b"x");
    }

    #[test]
    fn test_black_hole_accepts_and_drops() {
        let (mut a, mut b) = pair();
        a.set_black_hole(true);
        assert_eq!(a.write_frame(meta(), b"gone"), WriteOutcome::Accepted);
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn test_inject_feeds_own_ingress() {
        let (mut a, _b) = pair();
        a.inject(&[0xDE, 0xAD]);
        assert_eq!(a.pending_rx(), 2);
        assert_eq!(drain(&mut a), &[0xDE, 0xAD]);
    }

    #[test]
    fn test_clones_share_endpoint_state() {
        let (a, mut b) = pair();
        let handle = a.clone();
        let mut moved = a;

        handle.refuse_next(1);
        assert_eq!(moved.write_frame(meta(), b"x"), WriteOutcome::Refused);
        assert_eq!(moved.write_frame(meta(), b"x"), WriteOutcome::Accepted);
        assert_eq!(drain(&mut b), b"x");

        handle.inject(b"noise");
        assert_eq!(drain(&mut moved), b"noise");
    }
}
