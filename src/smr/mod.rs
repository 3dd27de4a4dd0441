//! Epoch-based safe memory reclamation shared by every concurrent table variant.
//!
//! Grounded on the original `hazard_epoch.rs`: a global monotonic epoch counter, one reservation
//! slot per registered thread, and per-thread retire lists drained once the minimum outstanding
//! reservation has advanced past a retired object's epoch. The original's nightly
//! `#[feature(core_intrinsics, raw)]` plumbing (hand-rolled CAS intrinsics, `raw::TraitObject`
//! vtable erasure for retired nodes, a fixed global thread table reached through `static mut`) is
//! replaced throughout with stable `std::sync::atomic` types, `Box<dyn FnOnce() + Send>`, and an
//! `Smr` value owned by the table that created it rather than a process-wide global.
mod thread_store;

use crate::config::Config;
use crate::error::Status;
use crate::util::{pause, WrappedAlign64Type};
use cfg_if::cfg_if;
use log::warn;
use std::cell::RefCell;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thread_store::{ThreadSlot, NONE_RESERVATION};

cfg_if! {
    if #[cfg(feature = "max_thread_count_4096")] {
        pub const MAX_THREAD_COUNT: usize = 4096;
    } else if #[cfg(feature = "max_thread_count_256")] {
        pub const MAX_THREAD_COUNT: usize = 256;
    } else {
        pub const MAX_THREAD_COUNT: usize = 16;
    }
}

static SMR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// `(smr id, assigned tid)` pairs this OS thread has ever registered, across every `Smr`
    /// instance it has touched. Registration is permanent for the life of the thread: a thread's
    /// tid is never returned to a free pool, mirroring the original's behavior, where
    /// `GLOBAL_THREAD_ID` only ever increments.
    static TLS_REGISTRATIONS: RefCell<Vec<(u64, u16)>> = RefCell::new(Vec::new());
}

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Caches the last computed minimum reservation across all registered threads so that hot-path
/// scans don't re-walk every slot on every retire.
struct MinEpochCache {
    value: AtomicU64,
    stamped_us: AtomicI64,
}

impl MinEpochCache {
    fn new() -> Self {
        MinEpochCache {
            value: AtomicU64::new(0),
            stamped_us: AtomicI64::new(0),
        }
    }
}

/// RAII handle returned by [`Smr::pin`]. While alive, the calling thread's reservation pins the
/// epoch it was taken at (or, for a linearized operation, the epoch it advanced to): no object
/// retired at or after that epoch will be reclaimed. Dropping the guard releases the reservation.
pub(crate) struct OpGuard<'a> {
    smr: &'a Smr,
    tid: u16,
}

impl<'a> OpGuard<'a> {
    pub(crate) fn epoch(&self) -> u64 {
        self.smr.threads[self.tid as usize].reservation()
    }

    pub(crate) fn retire(&self, reclaim: Box<dyn FnOnce() + Send>) {
        self.smr.retire_from(self.tid, self.epoch(), reclaim);
    }
}

impl<'a> Drop for OpGuard<'a> {
    fn drop(&mut self) {
        self.smr.threads[self.tid as usize].clear_reservation();
    }
}

/// Explicit, opt-in handle from [`Smr::register`]. Holding one does not by itself pin anything;
/// dropping it proactively flushes the owning thread's pending retirements into the shared orphan
/// list instead of waiting for that thread's own slot to cross the retire threshold again. Meant
/// for long-running worker threads that know they are about to go idle.
pub struct ThreadGuard<'a> {
    smr: &'a Smr,
    tid: u16,
}

impl<'a> Drop for ThreadGuard<'a> {
    fn drop(&mut self) {
        let slot = &self.smr.threads[self.tid as usize];
        debug_assert_eq!(
            slot.reservation(),
            NONE_RESERVATION,
            "ThreadGuard dropped while an operation guard is still outstanding"
        );
        slot.relocate_all(&self.smr.orphan);
    }
}

/// Owns one table's worth of epoch/reservation/retire-list state.
///
/// Unlike the original, which kept one process-wide hazard-epoch table, every concurrent table in
/// this crate owns its own `Smr`: there is no shared global, so multiple tables never contend on
/// the same reservation array.
pub(crate) struct Smr {
    id: u64,
    global_epoch: WrappedAlign64Type<AtomicU64>,
    threads: Box<[ThreadSlot]>,
    thread_counter: WrappedAlign64Type<AtomicUsize>,
    retire_threshold: i64,
    min_epoch_cache: MinEpochCache,
    min_epoch_cache_ttl_us: i64,
    waiting_count: WrappedAlign64Type<AtomicI64>,
    /// Receives retirements relocated from threads that proactively flushed via `ThreadGuard`.
    orphan: ThreadSlot,
}

impl Smr {
    pub(crate) fn new(config: &Config) -> Self {
        let n = config.max_threads();
        let threads = (0..n)
            .map(|_| ThreadSlot::default())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Smr {
            id: SMR_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            global_epoch: WrappedAlign64Type(AtomicU64::new(0)),
            threads,
            thread_counter: WrappedAlign64Type(AtomicUsize::new(0)),
            retire_threshold: 64,
            min_epoch_cache: MinEpochCache::new(),
            min_epoch_cache_ttl_us: 200,
            waiting_count: WrappedAlign64Type(AtomicI64::new(0)),
            orphan: ThreadSlot::default(),
        }
    }

    fn tid_for_current_thread(&self) -> Result<u16, Status> {
        TLS_REGISTRATIONS.with(|regs| {
            let mut regs = regs.borrow_mut();
            if let Some(&(_, tid)) = regs.iter().find(|(id, _)| *id == self.id) {
                return Ok(tid);
            }
            let idx = self.thread_counter.fetch_add(1, Ordering::Relaxed);
            if idx >= self.threads.len() {
                warn!(
                    "smr thread registry exhausted (max_threads={})",
                    self.threads.len()
                );
                return Err(Status::ThreadNumOverflow);
            }
            self.threads[idx].mark_enabled(idx as u16);
            regs.push((self.id, idx as u16));
            Ok(idx as u16)
        })
    }

    /// Register the current thread explicitly, for callers that want a handle whose drop flushes
    /// this thread's retire list. Table operations never require this: they register implicitly,
    /// permanently, the first time the thread touches the table.
    pub fn register(&self) -> Result<ThreadGuard<'_>, Status> {
        let tid = self.tid_for_current_thread()?;
        Ok(ThreadGuard { smr: self, tid })
    }

    /// Pin the current thread at the current global epoch for a read-like operation.
    pub(crate) fn pin(&self) -> Result<OpGuard<'_>, Status> {
        let tid = self.tid_for_current_thread()?;
        let epoch = self.global_epoch.load(Ordering::Acquire);
        self.threads[tid as usize].set_reservation(epoch);
        Ok(OpGuard { smr: self, tid })
    }

    /// Pin the current thread at a freshly advanced epoch for a write that must linearize against
    /// every other write. Returns the guard plus the new epoch so the caller can stamp records.
    pub(crate) fn pin_linearized(&self) -> Result<(OpGuard<'_>, u64), Status> {
        let tid = self.tid_for_current_thread()?;
        let epoch = self.global_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.threads[tid as usize].set_reservation(epoch);
        Ok((OpGuard { smr: self, tid }, epoch))
    }

    pub(crate) fn current_epoch(&self) -> u64 {
        self.global_epoch.load(Ordering::Acquire)
    }

    /// Initialize the starting epoch to `epoch`. Only meaningful before any concurrent access:
    /// used by `AdaptiveTable`'s one-shot migration to carry the reference table's `next_epoch`
    /// forward so sort order stays monotonic across the transition.
    pub(crate) fn seed_epoch(&self, epoch: u64) {
        self.global_epoch.store(epoch, Ordering::Release);
    }

    /// Minimum epoch any currently outstanding reservation is pinned at (or the global epoch, if
    /// none are). Monotonically non-decreasing over time: used by the ordered variants to decide
    /// how much of a superseded record's chain can never be observed again and is safe to retire.
    pub(crate) fn min_reservation(&self) -> u64 {
        let cached_at = self.min_epoch_cache.stamped_us.load(Ordering::Relaxed);
        let now = now_us();
        if now.wrapping_sub(cached_at) < self.min_epoch_cache_ttl_us {
            return self.min_epoch_cache.value.load(Ordering::Relaxed);
        }
        let mut min = self.global_epoch.load(Ordering::Acquire);
        for slot in self.threads.iter() {
            if !slot.is_enabled() {
                continue;
            }
            let r = slot.reservation();
            if r != NONE_RESERVATION && r < min {
                min = r;
            }
        }
        self.min_epoch_cache.value.store(min, Ordering::Relaxed);
        self.min_epoch_cache.stamped_us.store(now, Ordering::Relaxed);
        min
    }

    /// Retire an object observed-removed at `retire_epoch`. Once every registered thread's
    /// reservation has advanced past `retire_epoch`, `reclaim` runs and frees it.
    pub(crate) fn retire_from(&self, tid: u16, retire_epoch: u64, reclaim: Box<dyn FnOnce() + Send>) {
        self.threads[tid as usize].push(retire_epoch, reclaim);
        let waiting = self.waiting_count.fetch_add(1, Ordering::Relaxed) + 1;
        if waiting >= self.retire_threshold {
            self.try_reclaim();
        }
    }

    /// Retire on behalf of the current thread, registering it first if necessary. Used by the few
    /// call sites (migration finalization) that do not already hold an `OpGuard`.
    pub(crate) fn retire(&self, retire_epoch: u64, reclaim: Box<dyn FnOnce() + Send>) -> Result<(), Status> {
        let tid = self.tid_for_current_thread()?;
        self.retire_from(tid, retire_epoch, reclaim);
        Ok(())
    }

    /// Scan every slot (including the orphan list) and reclaim whatever has aged out. Safe to
    /// call at any time, from any thread; never blocks.
    pub(crate) fn try_reclaim(&self) {
        let min = self.min_reservation();
        let mut freed = 0i64;
        for slot in self.threads.iter() {
            freed += slot.reclaim(min);
        }
        freed += self.orphan.reclaim(min);
        if freed > 0 {
            self.waiting_count.fetch_sub(freed, Ordering::Relaxed);
        }
    }

    /// Pause briefly; used by migration helpers spinning on another thread's in-progress slot.
    pub(crate) fn backoff() {
        pause();
    }
}

#[cfg(test)]
mod test {
    #[test]
    fn test_pin_advances_reservation_and_releases_on_drop() {
        use crate::config::Config;
        use super::thread_store::NONE_RESERVATION;
        use super::Smr;

        let smr = Smr::new(&Config::default());
        assert_eq!(smr.current_epoch(), 0);
        {
            let (guard, epoch) = smr.pin_linearized().unwrap();
            assert_eq!(epoch, 1);
            assert_eq!(guard.epoch(), 1);
        }
        assert_eq!(smr.min_reservation(), 1);
        let _ = NONE_RESERVATION;
    }

    #[test]
    fn test_retire_reclaims_once_min_reservation_passes() {
        use crate::config::Config;
        use super::Smr;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let smr = Smr::new(&Config::default());
        let freed = Arc::new(AtomicUsize::new(0));
        {
            let (guard, epoch) = smr.pin_linearized().unwrap();
            let freed = freed.clone();
            guard.retire(Box::new(move || {
                freed.fetch_add(1, Ordering::Relaxed);
            }));
            assert_eq!(epoch, 1);
        }
        smr.try_reclaim();
        assert_eq!(freed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_register_exhaustion_reports_thread_num_overflow() {
        use crate::config::Config;
        use crate::error::Status;
        use super::Smr;
        use std::sync::Arc;

        let smr = Arc::new(Smr::new(&Config::default().with_max_threads(1)));
        let first = smr.pin();
        assert!(first.is_ok());
        drop(first);

        let other = smr.clone();
        let result = std::thread::spawn(move || other.pin().err()).join().unwrap();
        assert_eq!(result, Some(Status::ThreadNumOverflow));
    }
}
