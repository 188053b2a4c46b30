//! Wrap-safe 16-bit millisecond clock.
//!
//! Retry deadlines are stored inline in the outbound buffer, so they are kept
//! to 16 bits. The clock periodically shifts its origin before the 16-bit
//! range would overflow (an *epoch reset*) and tags every [`Deadline`] with an
//! epoch-parity bit. A deadline created before a reset is migrated lazily the
//! next time it is inspected, by applying the recorded reset delta once and
//! flipping its parity. No buffer walk is needed at reset time.
//!
//! Decay comparison is wrap-safe: `now.wrapping_sub(value)` interpreted as a
//! signed 16-bit distance.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Minimum headroom (ms) kept below the 16-bit ceiling before an epoch reset.
pub const EPOCH_GUARD_FLOOR: u16 = 5000;

/// A source of raw monotonic milliseconds.
///
/// The clock only ever looks at differences, so the absolute origin of a
/// source is irrelevant.
pub trait TimeSource {
    fn millis(&self) -> u64;
}

/// Production time source anchored on [`Instant::now`] at creation.
pub struct SystemMillis {
    reference: Instant,
}

impl SystemMillis {
    pub fn new() -> Self {
        Self {
            reference: Instant::now(),
        }
    }
}

impl Default for SystemMillis {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemMillis {
    fn millis(&self) -> u64 {
        self.reference.elapsed().as_millis() as u64
    }
}

/// Hand-driven time source for tests and simulations.
///
/// Cloning yields a handle onto the same underlying counter, so a test can
/// keep one handle and give another to the clock.
#[derive(Clone, Default)]
pub struct ManualMillis(Rc<Cell<u64>>);

impl ManualMillis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, millis: u64) {
        self.0.set(millis);
    }

    pub fn advance(&self, millis: u64) {
        self.0.set(self.0.get() + millis);
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl TimeSource for ManualMillis {
    fn millis(&self) -> u64 {
        self.0.get()
    }
}

/// An absolute millisecond instant on the 16-bit clock, tagged with the epoch
/// parity it was created under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub(crate) value: u16,
    pub(crate) sign: bool,
}

impl Deadline {
    /// Bytes used when a deadline is stored in the outbound transient prefix.
    pub(crate) const ENCODED_LEN: usize = 3;

    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        buf[..2].copy_from_slice(&self.value.to_le_bytes());
        buf[2] = self.sign as u8;
    }

    pub(crate) fn read_from(buf: &[u8]) -> Self {
        Self {
            value: u16::from_le_bytes([buf[0], buf[1]]),
            sign: buf[2] != 0,
        }
    }
}

/// Monotonic 16-bit millisecond clock with epoch-parity deadlines.
pub struct Clock {
    source: Box<dyn TimeSource>,
    origin: u64,
    delta: u16,
    sign: bool,
    guard: u16,
}

impl Clock {
    /// Clock over [`SystemMillis`].
    pub fn system() -> Self {
        Self::with_source(Box::new(SystemMillis::new()))
    }

    pub fn with_source(source: Box<dyn TimeSource>) -> Self {
        let origin = source.millis();
        Self {
            source,
            origin,
            delta: 0,
            sign: false,
            guard: EPOCH_GUARD_FLOOR,
        }
    }

    /// Raise the reset headroom to cover a configured retry timeout.
    ///
    /// The guard never drops below [`EPOCH_GUARD_FLOOR`].
    pub fn set_guard(&mut self, timeout: u16) {
        self.guard = timeout.max(EPOCH_GUARD_FLOOR);
    }

    /// Milliseconds since the current epoch origin, truncated to 16 bits.
    pub fn now(&self) -> u16 {
        self.source.millis().wrapping_sub(self.origin) as u16
    }

    /// Perform an epoch reset if the 16-bit range is about to run out.
    ///
    /// Returns the recorded delta when a reset happened, so callers holding
    /// deadlines outside the outbound buffer can migrate them.
    pub fn check_epoch(&mut self) -> Option<u16> {
        let now = self.source.millis();
        let elapsed = now.wrapping_sub(self.origin);
        if elapsed >= u64::from(u16::MAX) - u64::from(self.guard) {
            let delta = elapsed as u16;
            self.delta = delta;
            self.origin = now;
            self.sign = !self.sign;
            Some(delta)
        } else {
            None
        }
    }

    /// A deadline `millis` from now, tagged with the current epoch parity.
    pub fn deadline_in(&self, millis: u16) -> Deadline {
        Deadline {
            value: self.now().wrapping_add(millis),
            sign: self.sign,
        }
    }

    /// One-shot migration of a deadline created under the previous epoch.
    pub fn reconcile(&self, deadline: &mut Deadline) {
        if deadline.sign != self.sign {
            deadline.value = deadline.value.wrapping_sub(self.delta);
            deadline.sign = self.sign;
        }
    }

    /// Signed distance from `deadline` to now, after reconciliation.
    ///
    /// Positive once the deadline has passed.
    pub fn millis_past(&self, deadline: &mut Deadline) -> i16 {
        self.reconcile(deadline);
        self.now().wrapping_sub(deadline.value) as i16
    }

    /// Whether `deadline` has passed.
    pub fn has_decayed(&self, deadline: &mut Deadline) -> bool {
        self.millis_past(deadline) >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_clock() -> (ManualMillis, Clock) {
        let time = ManualMillis::new();
        let clock = Clock::with_source(Box::new(time.clone()));
        (time, clock)
    }

    #[test]
    fn test_now_tracks_source() {
        let (time, clock) = manual_clock();
        assert_eq!(clock.now(), 0);
        time.advance(1234);
        assert_eq!(clock.now(), 1234);
    }

    #[test]
    fn test_deadline_decays_after_interval() {
        let (time, clock) = manual_clock();
        let mut d = clock.deadline_in(100);
        assert!(!clock.has_decayed(&mut d));
        time.advance(99);
        assert!(!clock.has_decayed(&mut d));
        time.advance(1);
        assert!(clock.has_decayed(&mut d));
    }

    #[test]
    fn test_zero_deadline_decays_immediately() {
        let (_time, clock) = manual_clock();
        let mut d = clock.deadline_in(0);
        assert!(clock.has_decayed(&mut d));
    }

    #[test]
    fn test_epoch_reset_fires_at_guard_boundary() {
        let (time, mut clock) = manual_clock();
        time.set(u64::from(u16::MAX) - u64::from(EPOCH_GUARD_FLOOR) - 1);
        assert_eq!(clock.check_epoch(), None);
        time.advance(1);
        let delta = clock.check_epoch().expect("reset expected");
        assert_eq!(delta, u16::MAX - EPOCH_GUARD_FLOOR);
        assert_eq!(clock.now(), 0);
    }

    #[test]
    fn test_deadline_survives_epoch_reset() {
        let (time, mut clock) = manual_clock();
        time.set(60_000);
        let mut d = clock.deadline_in(1000);

        time.set(60_600);
        clock.check_epoch().expect("reset expected");

        // 400 real ms of the 1000 remain.
        assert!(!clock.has_decayed(&mut d));
        time.advance(399);
        assert!(!clock.has_decayed(&mut d));
        time.advance(1);
        assert!(clock.has_decayed(&mut d));
    }

    #[test]
    fn test_reconcile_is_one_shot() {
        let (time, mut clock) = manual_clock();
        time.set(60_000);
        let mut d = clock.deadline_in(2000);
        time.set(60_600);
        clock.check_epoch().unwrap();

        let first = d;
        clock.reconcile(&mut d);
        assert_ne!(d.value, first.value);
        let migrated = d;
        clock.reconcile(&mut d);
        assert_eq!(d, migrated);
    }

    #[test]
    fn test_millis_past_is_signed() {
        let (time, clock) = manual_clock();
        let mut d = clock.deadline_in(50);
        assert_eq!(clock.millis_past(&mut d), -50);
        time.advance(80);
        assert_eq!(clock.millis_past(&mut d), 30);
    }

    #[test]
    fn test_guard_respects_floor() {
        let (_time, mut clock) = manual_clock();
        clock.set_guard(100);
        assert_eq!(clock.guard, EPOCH_GUARD_FLOOR);
        clock.set_guard(30_000);
        assert_eq!(clock.guard, 30_000);
    }

    #[test]
    fn test_deadline_encode_roundtrip() {
        let d = Deadline {
            value: 0xBEEF,
            sign: true,
        };
        let mut buf = [0u8; Deadline::ENCODED_LEN];
        d.write_to(&mut buf);
        assert_eq!(Deadline::read_from(&buf), d);
    }
}
