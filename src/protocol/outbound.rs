//! Outbound queue: pending frames with inline retry bookkeeping.
//!
//! Every pending frame lives in one contiguous `BytesMut`, prefixed by a
//! 4-byte transient record (retry count + deadline) that never reaches the
//! wire:
//!
//! ```text
//! [retries][deadline value LE][sign] [MAGIC][header][payload][TAIL] ...next frame
//! ```
//!
//! The walk re-parses the buffer on every pass, asks a policy what to do with
//! each frame, emits through a write closure, patches the transient record in
//! place, and splices disposed frames out with an O(tail) shift. No side index
//! is kept; queue depth is expected to stay in the tens of frames, so the
//! re-parse cost is linear in bytes, matching the emit cost anyway.

use bytes::{BufMut, BytesMut};

use crate::error::{FramelinkError, Result};
use crate::time::{Clock, Deadline};
use crate::transport::WriteOutcome;

use super::wire_format::{kinds, FrameMeta, WireHeader, MAGIC_BYTES, MAGIC_LEN, TAIL};

/// Per-pending-frame retry state. Stored in the buffer, never transmitted.
#[derive(Debug, Clone, Copy)]
pub struct TransientInfo {
    /// Transmission attempts made so far.
    pub retries: u8,
    /// Next emission due time.
    pub deadline: Deadline,
}

impl TransientInfo {
    pub(crate) const ENCODED_LEN: usize = 1 + Deadline::ENCODED_LEN;

    fn write_to(&self, buf: &mut [u8]) {
        buf[0] = self.retries;
        self.deadline.write_to(&mut buf[1..Self::ENCODED_LEN]);
    }

    fn read_from(buf: &[u8]) -> Self {
        Self {
            retries: buf[0],
            deadline: Deadline::read_from(&buf[1..Self::ENCODED_LEN]),
        }
    }
}

/// Walk decision for one pending frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Attempt transmission this pass.
    pub emit: bool,
    /// Remove the frame after this pass.
    pub dispose: bool,
}

impl Verdict {
    /// Leave the frame untouched.
    pub const HOLD: Verdict = Verdict {
        emit: false,
        dispose: false,
    };

    /// Transmit once and remove (ACK / SYNC discipline).
    pub const FIRE_AND_FORGET: Verdict = Verdict {
        emit: true,
        dispose: true,
    };
}

/// Default transmit policy: the retry state machine.
///
/// ACK frames are sent once and never retried. Any other frame whose deadline
/// has decayed is re-armed with the retry timeout, emitted while its attempt
/// count is below `retry_count`, and disposed once the post-increment count
/// exceeds it, one timeout period after the final emission.
pub fn default_verdict<H: WireHeader>(
    transient: &mut TransientInfo,
    header: &H,
    clock: &Clock,
    retry_count: u8,
    retry_timeout: u16,
) -> Verdict {
    if header.kind() == kinds::ACK {
        return Verdict::FIRE_AND_FORGET;
    }
    if clock.has_decayed(&mut transient.deadline) {
        transient.deadline = clock.deadline_in(retry_timeout);
        let emit = transient.retries < retry_count;
        transient.retries = transient.retries.wrapping_add(1);
        let dispose = transient.retries > retry_count;
        Verdict { emit, dispose }
    } else {
        Verdict::HOLD
    }
}

enum Step {
    /// Frame kept; next frame starts here.
    Advanced(usize),
    /// Frame spliced out; the next frame now sits at the same offset.
    Removed,
}

/// In-buffer queue of outbound frames.
pub struct OutboundQueue<H> {
    buffer: BytesMut,
    next_id: u8,
    max: Option<usize>,
    _header: std::marker::PhantomData<H>,
}

impl<H: WireHeader> OutboundQueue<H> {
    /// Bytes before the wire header: transient record plus magic.
    const PREFIX_LEN: usize = TransientInfo::ENCODED_LEN + MAGIC_LEN;

    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            next_id: 0,
            max: None,
            _header: std::marker::PhantomData,
        }
    }

    /// Cap the buffer at `max` bytes; sends that would exceed it fail with
    /// [`FramelinkError::BufferFull`].
    pub fn set_max(&mut self, max: Option<usize>) {
        self.max = max;
    }

    /// Buffered bytes, transient prefixes included.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of pending frames.
    pub fn pending(&self) -> usize {
        let mut count = 0;
        let mut offset = 0;
        while offset + Self::PREFIX_LEN + H::WIRE_LEN <= self.buffer.len() {
            let header_at = offset + Self::PREFIX_LEN;
            let header = H::decode(&self.buffer[header_at..header_at + H::WIRE_LEN]);
            offset += Self::PREFIX_LEN + H::WIRE_LEN + header.size() as usize + 1;
            count += 1;
        }
        count
    }

    /// Append a new pending frame.
    ///
    /// Assigns the next wrapping id, writes the transient record (zero
    /// retries, immediately-due deadline), the magic, the header with a
    /// placeholder size, the payload produced by `write_payload`, and the
    /// trailer; then patches the real payload size into the header.
    ///
    /// Returns the frame's buffer offset (for the immediate transmission
    /// attempt) and the completed header. On error the buffer is rolled back
    /// and no id is consumed.
    pub fn enqueue<F>(&mut self, mut header: H, clock: &Clock, write_payload: F) -> Result<(usize, H)>
    where
        F: FnOnce(&mut BytesMut) -> Result<()>,
    {
        let start = self.buffer.len();
        header.set_id(self.next_id);
        header.set_size(0);

        let transient = TransientInfo {
            retries: 0,
            deadline: clock.deadline_in(0),
        };
        let mut prefix = [0u8; TransientInfo::ENCODED_LEN];
        transient.write_to(&mut prefix);
        self.buffer.extend_from_slice(&prefix);
        self.buffer.extend_from_slice(&MAGIC_BYTES);

        let header_at = self.buffer.len();
        header.encode(&mut self.buffer);
        let payload_at = self.buffer.len();

        if let Err(e) = write_payload(&mut self.buffer) {
            self.buffer.truncate(start);
            return Err(e);
        }
        let size = self.buffer.len() - payload_at;
        if size > usize::from(u8::MAX) {
            self.buffer.truncate(start);
            return Err(FramelinkError::PayloadTooLarge(size));
        }
        header.set_size(size as u8);
        // The size byte leads the wire header.
        self.buffer[header_at] = size as u8;
        self.buffer.put_u8(TAIL);

        if let Some(max) = self.max {
            if self.buffer.len() > max {
                let used = self.buffer.len();
                self.buffer.truncate(start);
                return Err(FramelinkError::BufferFull { used, max });
            }
        }

        self.next_id = self.next_id.wrapping_add(1);
        Ok((start, header))
    }

    /// Run one pass over every pending frame.
    ///
    /// For each frame: reconcile its deadline epoch, ask `policy`, attempt
    /// transmission when told to, and honour the disposal request. A refused
    /// write overrides the verdict: the frame stays, its attempt is
    /// un-counted, and its deadline is reset to immediately-due.
    pub fn walk<P, W>(&mut self, clock: &Clock, mut policy: P, mut try_write: W)
    where
        P: FnMut(&mut TransientInfo, &H, &Clock) -> Verdict,
        W: FnMut(FrameMeta, &[u8]) -> WriteOutcome,
    {
        let mut offset = 0;
        while offset + Self::PREFIX_LEN + H::WIRE_LEN <= self.buffer.len() {
            match self.step(offset, clock, &mut policy, &mut try_write) {
                Step::Advanced(next) => offset = next,
                Step::Removed => {}
            }
        }
    }

    /// One transmission attempt for the frame just enqueued at `offset`.
    pub fn transmit_at<P, W>(&mut self, offset: usize, clock: &Clock, mut policy: P, mut try_write: W)
    where
        P: FnMut(&mut TransientInfo, &H, &Clock) -> Verdict,
        W: FnMut(FrameMeta, &[u8]) -> WriteOutcome,
    {
        debug_assert!(offset + Self::PREFIX_LEN + H::WIRE_LEN <= self.buffer.len());
        let _ = self.step(offset, clock, &mut policy, &mut try_write);
    }

    /// Dispose the first pending frame matching `matches`.
    ///
    /// Used by the ACK path; one received ACK removes at most one frame.
    /// Returns whether a frame was removed.
    pub fn acknowledge<F>(&mut self, clock: &Clock, mut matches: F) -> bool
    where
        F: FnMut(&H) -> bool,
    {
        let mut done = false;
        self.walk(
            clock,
            |_transient, header, _clock| {
                if !done && matches(header) {
                    done = true;
                    Verdict {
                        emit: false,
                        dispose: true,
                    }
                } else {
                    Verdict::HOLD
                }
            },
            |_meta, _frame| WriteOutcome::Accepted,
        );
        done
    }

    fn step<P, W>(&mut self, offset: usize, clock: &Clock, policy: &mut P, try_write: &mut W) -> Step
    where
        P: FnMut(&mut TransientInfo, &H, &Clock) -> Verdict,
        W: FnMut(FrameMeta, &[u8]) -> WriteOutcome,
    {
        let mut transient = TransientInfo::read_from(&self.buffer[offset..]);
        let header_at = offset + Self::PREFIX_LEN;
        let header = H::decode(&self.buffer[header_at..header_at + H::WIRE_LEN]);
        let frame_len = Self::PREFIX_LEN + H::WIRE_LEN + header.size() as usize + 1;
        debug_assert!(offset + frame_len <= self.buffer.len());

        clock.reconcile(&mut transient.deadline);
        let mut verdict = policy(&mut transient, &header, clock);

        if verdict.emit {
            let wire_at = offset + TransientInfo::ENCODED_LEN;
            let wire = &self.buffer[wire_at..offset + frame_len];
            match try_write(header.meta(), wire) {
                WriteOutcome::Accepted => {}
                WriteOutcome::Refused => {
                    // The attempt does not count; keep the frame immediately
                    // eligible for the next pass.
                    verdict.dispose = false;
                    transient.retries = transient.retries.wrapping_sub(1);
                    transient.deadline = clock.deadline_in(0);
                }
            }
        }

        if verdict.dispose {
            self.remove_range(offset, frame_len);
            Step::Removed
        } else {
            transient.write_to(&mut self.buffer[offset..offset + TransientInfo::ENCODED_LEN]);
            Step::Advanced(offset + frame_len)
        }
    }

    /// Splice `len` bytes out at `offset`; subsequent frames shift left.
    fn remove_range(&mut self, offset: usize, len: usize) {
        let tail = self.buffer.split_off(offset + len);
        self.buffer.truncate(offset);
        self.buffer.unsplit(tail);
    }
}

impl<H: WireHeader> Default for OutboundQueue<H> {
    fn default() -> Self {
        Self::new()
    }
}
