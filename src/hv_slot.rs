//! The fingerprint half of a bucket: a one-shot publish gate over a 128-bit [`Hv`].
//!
//! Both bucket shapes in this crate (the mutex-guarded [`crate::locked`] bucket and the
//! CAS-driven [`crate::lockfree`] bucket) need the same thing from their fingerprint field: many
//! threads may race to be the first to claim an unused slot for a given key, exactly one must
//! win, and every other thread — including ones that only want to read — must never observe a
//! half-written fingerprint. A plain `(AtomicU64, AtomicU64)` pair can't give that atomically, so
//! this type adds a two-phase `claimed` / `ready` gate around the pair instead of a real 128-bit
//! CAS (which stable Rust has no portable primitive for, see `DESIGN.md`).
use crate::fingerprint::Hv;
use crate::util::pause;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct HvSlot {
    /// Set once a thread has won the right to publish a fingerprint into this slot.
    claimed: AtomicBool,
    /// Set after `hi`/`lo` are fully written; gates every read of them.
    ready: AtomicBool,
    hi: UnsafeCell<u64>,
    lo: UnsafeCell<u64>,
}

// SAFETY: `hi`/`lo` are written exactly once, by the single thread that wins `try_claim`, before
// `ready` is set; every reader synchronizes on `ready` with Acquire/Release before touching them.
unsafe impl Sync for HvSlot {}

impl Default for HvSlot {
    fn default() -> Self {
        HvSlot {
            claimed: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            hi: UnsafeCell::new(0),
            lo: UnsafeCell::new(0),
        }
    }
}

impl HvSlot {
    /// Try to become the thread that publishes `hv` into this (currently unused) slot.
    ///
    /// On success, the caller must immediately call [`HvSlot::publish`]. Between `try_claim`
    /// succeeding and `publish` running, every other thread sees this slot as "claim in progress"
    /// and spins in [`HvSlot::load`] rather than treating it as unused or matching.
    pub(crate) fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Publish the fingerprint for a slot this thread just won via `try_claim`.
    pub(crate) fn publish(&self, hv: Hv) {
        unsafe {
            *self.hi.get() = hv.hi;
            *self.lo.get() = hv.lo;
        }
        self.ready.store(true, Ordering::Release);
    }

    /// Read the published fingerprint, if any. Returns `None` only if the slot has never been
    /// claimed; spins briefly if a claim is in flight but not yet published.
    pub(crate) fn load(&self) -> Option<Hv> {
        if !self.claimed.load(Ordering::Acquire) {
            return None;
        }
        while !self.ready.load(Ordering::Acquire) {
            pause();
        }
        unsafe { Some(Hv::new(*self.hi.get(), *self.lo.get())) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclaimed_loads_none() {
        let slot = HvSlot::default();
        assert!(slot.load().is_none());
    }

    #[test]
    fn test_claim_then_publish_roundtrips() {
        let slot = HvSlot::default();
        assert!(slot.try_claim());
        slot.publish(Hv::new(7, 9));
        assert_eq!(slot.load(), Some(Hv::new(7, 9)));
    }

    #[test]
    fn test_second_claim_fails() {
        let slot = HvSlot::default();
        assert!(slot.try_claim());
        assert!(!slot.try_claim());
    }
}
