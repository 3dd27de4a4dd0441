//! Starts single-threaded, migrates once under contention (§4.7).
//!
//! [`AdaptiveTable`] opens on [`ReferenceTable`]: one coarse lock, no epoch machinery, cheapest
//! possible table for the common case of a single writer. Every write first probes that lock with
//! [`ReferenceTable::try_write_guard`] rather than blocking on it directly; a probe failure is the
//! contention signal (a second writer showed up) and triggers [`AdaptiveTable::migrate_to_concurrent`].
//! The migration is one-shot and unidirectional: it snapshots the reference table's live entries
//! and its `next_epoch` under the table's own write lock, replays them into whichever concurrent
//! variant [`crate::config::AdaptiveTarget`] selects (seeding that variant's own epoch counter from
//! the snapshot so `view(sort = true)` orders consistently across the transition), and atomically
//! swaps a single `AtomicPtr<Dispatch<T>>` to point at it. [`Dispatch::get`]/[`Dispatch::put`]/etc.
//! (via its own `Table` impl) are the only place in the crate that dispatches on table variant at
//! runtime; everywhere else picks its concrete type at compile time.
use crate::config::{AdaptiveTarget, Config};
use crate::dict::Table;
use crate::fingerprint::Hv;
use crate::locked::ordered::LockedOrderedTable;
use crate::locked::unordered::LockedUnorderedTable;
use crate::lockfree::ordered::LockFreeOrderedTable;
use crate::lockfree::unordered::LockFreeUnorderedTable;
use crate::reference::ReferenceTable;
use crate::smr::Smr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// The concrete implementation an [`AdaptiveTable`] is currently dispatching through. Swapping
/// from `Reference` to a concurrent variant happens at most once per table and never reverts.
enum Dispatch<T> {
    Reference(ReferenceTable<T>),
    LockedUnordered(LockedUnorderedTable<T>),
    LockedOrdered(LockedOrderedTable<T>),
    LockFreeUnordered(LockFreeUnorderedTable<T>),
    LockFreeOrdered(LockFreeOrderedTable<T>),
}

impl<T: Clone> Table<T> for Dispatch<T> {
    fn get(&self, hv: Hv) -> (Option<T>, bool)
    where
        T: Clone,
    {
        match self {
            Dispatch::Reference(t) => t.get(hv),
            Dispatch::LockedUnordered(t) => t.get(hv),
            Dispatch::LockedOrdered(t) => t.get(hv),
            Dispatch::LockFreeUnordered(t) => t.get(hv),
            Dispatch::LockFreeOrdered(t) => t.get(hv),
        }
    }

    fn put(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        match self {
            Dispatch::Reference(t) => t.put(hv, item),
            Dispatch::LockedUnordered(t) => t.put(hv, item),
            Dispatch::LockedOrdered(t) => t.put(hv, item),
            Dispatch::LockFreeUnordered(t) => t.put(hv, item),
            Dispatch::LockFreeOrdered(t) => t.put(hv, item),
        }
    }

    fn replace(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        match self {
            Dispatch::Reference(t) => t.replace(hv, item),
            Dispatch::LockedUnordered(t) => t.replace(hv, item),
            Dispatch::LockedOrdered(t) => t.replace(hv, item),
            Dispatch::LockFreeUnordered(t) => t.replace(hv, item),
            Dispatch::LockFreeOrdered(t) => t.replace(hv, item),
        }
    }

    fn add(&self, hv: Hv, item: T) -> bool {
        match self {
            Dispatch::Reference(t) => t.add(hv, item),
            Dispatch::LockedUnordered(t) => t.add(hv, item),
            Dispatch::LockedOrdered(t) => t.add(hv, item),
            Dispatch::LockFreeUnordered(t) => t.add(hv, item),
            Dispatch::LockFreeOrdered(t) => t.add(hv, item),
        }
    }

    fn remove(&self, hv: Hv) -> (Option<T>, bool) {
        match self {
            Dispatch::Reference(t) => t.remove(hv),
            Dispatch::LockedUnordered(t) => t.remove(hv),
            Dispatch::LockedOrdered(t) => t.remove(hv),
            Dispatch::LockFreeUnordered(t) => t.remove(hv),
            Dispatch::LockFreeOrdered(t) => t.remove(hv),
        }
    }

    fn len(&self) -> u64 {
        match self {
            Dispatch::Reference(t) => t.len(),
            Dispatch::LockedUnordered(t) => t.len(),
            Dispatch::LockedOrdered(t) => t.len(),
            Dispatch::LockFreeUnordered(t) => t.len(),
            Dispatch::LockFreeOrdered(t) => t.len(),
        }
    }

    fn view(&self, sort: bool) -> Vec<(T, u64)>
    where
        T: Clone,
    {
        match self {
            Dispatch::Reference(t) => t.view(sort),
            Dispatch::LockedUnordered(t) => t.view(sort),
            Dispatch::LockedOrdered(t) => t.view(sort),
            Dispatch::LockFreeUnordered(t) => t.view(sort),
            Dispatch::LockFreeOrdered(t) => t.view(sort),
        }
    }
}

/// A table that starts as the single-threaded [`ReferenceTable`] and migrates, exactly once, to a
/// concurrent variant the first time a write observes contention on that table's lock.
pub struct AdaptiveTable<T> {
    dispatch: AtomicPtr<Dispatch<T>>,
    /// Guards the lifetime of the `Dispatch<T>` box across the migration swap, not any record
    /// inside it: readers pin a reservation for the duration of one dispatch call so
    /// `migrate_to_concurrent` can't free the old `Dispatch` out from under them.
    smr: Smr,
    config: Config,
}

unsafe impl<T: Send> Sync for AdaptiveTable<T> {}
unsafe impl<T: Send> Send for AdaptiveTable<T> {}

impl<T: Clone> AdaptiveTable<T> {
    pub fn new(config: &Config) -> Self {
        let initial = Dispatch::Reference(ReferenceTable::new(config));
        AdaptiveTable {
            dispatch: AtomicPtr::new(Box::into_raw(Box::new(initial))),
            smr: Smr::new(config),
            config: *config,
        }
    }

    /// True once this table has left the single-threaded reference implementation behind.
    pub fn is_migrated(&self) -> bool {
        !matches!(unsafe { &*self.dispatch.load(Ordering::Acquire) }, Dispatch::Reference(_))
    }

    /// Race to perform the one-shot migration. Safe to call from multiple threads at once: only
    /// the thread that wins the reference table's own write lock does any work, and every other
    /// caller either finds the lock held (spins) or finds `dispatch` already swapped (returns).
    ///
    /// Must only be called while the caller already holds a live `self.smr.pin()` reservation
    /// (every call site here does): that reservation is what keeps the old `Dispatch` box, which
    /// this function dereferences and then retires, from being reclaimed out from under it.
    fn migrate_to_concurrent(&self) {
        loop {
            let current_ptr = self.dispatch.load(Ordering::Acquire);
            let current = unsafe { &*current_ptr };
            let reference = match current {
                Dispatch::Reference(r) => r,
                _ => return, // another thread already finished the migration
            };
            let write_guard = match reference.try_write_guard() {
                Some(g) => g,
                None => {
                    Smr::backoff();
                    continue;
                }
            };
            // Holding the reference table's write lock makes the snapshot-and-swap exclusive: no
            // other writer can mutate it, and no other thread can race this CAS, since `dispatch`
            // only ever changes here.
            let next_epoch = reference.next_epoch_snapshot(&write_guard);
            let entries = reference.snapshot_for_migration(&write_guard);
            let fresh = match self.config.adaptive_target() {
                AdaptiveTarget::LockedUnordered => {
                    Dispatch::LockedUnordered(LockedUnorderedTable::from_snapshot(&self.config, next_epoch, entries))
                }
                AdaptiveTarget::LockedOrdered => {
                    Dispatch::LockedOrdered(LockedOrderedTable::from_snapshot(&self.config, next_epoch, entries))
                }
                AdaptiveTarget::LockFreeUnordered => Dispatch::LockFreeUnordered(LockFreeUnorderedTable::from_snapshot(
                    &self.config,
                    next_epoch,
                    entries,
                )),
                AdaptiveTarget::LockFreeOrdered => {
                    Dispatch::LockFreeOrdered(LockFreeOrderedTable::from_snapshot(&self.config, next_epoch, entries))
                }
            };
            let new_ptr = Box::into_raw(Box::new(fresh));
            self.dispatch.store(new_ptr, Ordering::Release);
            drop(write_guard);
            let epoch = self.smr.current_epoch();
            let _ = self.smr.retire(epoch, Box::new(move || unsafe { drop(Box::from_raw(current_ptr)) }));
            return;
        }
    }

    /// Probe the reference table's write lock; `None` (contention) triggers a migration attempt.
    /// `Some` when `dispatch` is already a concurrent variant, or when the probe found the
    /// reference table's lock free.
    fn admit_write(&self) -> bool {
        match unsafe { &*self.dispatch.load(Ordering::Acquire) } {
            Dispatch::Reference(r) => match r.try_write_guard() {
                Some(g) => {
                    drop(g);
                    true
                }
                None => {
                    self.migrate_to_concurrent();
                    false
                }
            },
            _ => true,
        }
    }
}

impl<T: Clone> Table<T> for AdaptiveTable<T> {
    fn get(&self, hv: Hv) -> (Option<T>, bool)
    where
        T: Clone,
    {
        let guard = match self.smr.pin() {
            Ok(g) => g,
            Err(_) => return (None, false),
        };
        let result = unsafe { &*self.dispatch.load(Ordering::Acquire) }.get(hv);
        drop(guard);
        result
    }

    fn put(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        let mut pending = Some(item);
        loop {
            let guard = match self.smr.pin() {
                Ok(g) => g,
                Err(_) => return (pending.take(), false),
            };
            if !self.admit_write() {
                drop(guard);
                continue;
            }
            let result = unsafe { &*self.dispatch.load(Ordering::Acquire) }.put(hv, pending.take().expect("refilled every retry"));
            drop(guard);
            return result;
        }
    }

    fn replace(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        let mut pending = Some(item);
        loop {
            let guard = match self.smr.pin() {
                Ok(g) => g,
                Err(_) => return (pending.take(), false),
            };
            if !self.admit_write() {
                drop(guard);
                continue;
            }
            let result =
                unsafe { &*self.dispatch.load(Ordering::Acquire) }.replace(hv, pending.take().expect("refilled every retry"));
            drop(guard);
            return result;
        }
    }

    fn add(&self, hv: Hv, item: T) -> bool {
        let mut pending = Some(item);
        loop {
            let guard = match self.smr.pin() {
                Ok(g) => g,
                Err(_) => return false,
            };
            if !self.admit_write() {
                drop(guard);
                continue;
            }
            let result = unsafe { &*self.dispatch.load(Ordering::Acquire) }.add(hv, pending.take().expect("refilled every retry"));
            drop(guard);
            return result;
        }
    }

    fn remove(&self, hv: Hv) -> (Option<T>, bool) {
        loop {
            let guard = match self.smr.pin() {
                Ok(g) => g,
                Err(_) => return (None, false),
            };
            if !self.admit_write() {
                drop(guard);
                continue;
            }
            let result = unsafe { &*self.dispatch.load(Ordering::Acquire) }.remove(hv);
            drop(guard);
            return result;
        }
    }

    fn len(&self) -> u64 {
        let guard = match self.smr.pin() {
            Ok(g) => g,
            Err(_) => return 0,
        };
        let result = unsafe { &*self.dispatch.load(Ordering::Acquire) }.len();
        drop(guard);
        result
    }

    fn view(&self, sort: bool) -> Vec<(T, u64)>
    where
        T: Clone,
    {
        let guard = match self.smr.pin() {
            Ok(g) => g,
            Err(_) => return Vec::new(),
        };
        let result = unsafe { &*self.dispatch.load(Ordering::Acquire) }.view(sort);
        drop(guard);
        result
    }
}

impl<T> Drop for AdaptiveTable<T> {
    fn drop(&mut self) {
        let ptr = self.dispatch.load(Ordering::Acquire);
        unsafe { drop(Box::from_raw(ptr)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AdaptiveTable<i64> {
        AdaptiveTable::new(&Config::default().with_min_store_size(4))
    }

    #[test]
    fn test_starts_on_reference_table() {
        let t = table();
        assert!(!t.is_migrated());
        assert_eq!(t.put(Hv::new(0, 1), 10), (None, false));
        assert_eq!(t.get(Hv::new(0, 1)), (Some(10), true));
        assert!(!t.is_migrated(), "single-threaded use must never trigger a migration");
    }

    #[test]
    fn test_put_overwrite_reports_previous() {
        let t = table();
        t.put(Hv::new(0, 1), 10);
        assert_eq!(t.put(Hv::new(0, 1), 20), (Some(10), true));
    }

    #[test]
    fn test_add_and_remove_semantics() {
        let t = table();
        assert!(t.add(Hv::new(0, 1), 1));
        assert!(!t.add(Hv::new(0, 1), 2));
        assert_eq!(t.remove(Hv::new(0, 1)), (Some(1), true));
        assert!(t.add(Hv::new(0, 1), 3));
    }

    #[test]
    fn test_replace_only_if_present() {
        let t = table();
        assert_eq!(t.replace(Hv::new(0, 1), 1), (None, false));
        t.put(Hv::new(0, 1), 1);
        assert_eq!(t.replace(Hv::new(0, 1), 2), (Some(1), true));
    }

    #[test]
    fn test_migrates_under_concurrent_writers_and_preserves_contents() {
        use std::sync::Arc;
        use std::thread;

        let t = Arc::new(AdaptiveTable::<i64>::new(&Config::default().with_min_store_size(16)));
        for i in 0..50u64 {
            t.put(Hv::new(0, i), i as i64);
        }
        let mut handles = Vec::new();
        for w in 0..4u64 {
            let t = t.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200u64 {
                    t.put(Hv::new(w + 1, i), i as i64);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(t.is_migrated());
        for i in 0..50u64 {
            assert_eq!(t.get(Hv::new(0, i)), (Some(i as i64), true));
        }
        for w in 0..4u64 {
            for i in 0..200u64 {
                assert_eq!(t.get(Hv::new(w + 1, i)), (Some(i as i64), true));
            }
        }
        assert_eq!(t.len(), 50 + 4 * 200);
    }

    #[test]
    fn test_migration_target_selection() {
        use crate::config::AdaptiveTarget;

        let t = table();
        t.put(Hv::new(0, 1), 1);
        // Force a migration without a second real thread: drain the lock once to simulate the
        // contention signal a second writer would have produced.
        let cfg = Config::default().with_min_store_size(4).with_adaptive_target(AdaptiveTarget::LockFreeUnordered);
        let direct = AdaptiveTable::<i64>::new(&cfg);
        direct.migrate_to_concurrent_for_test();
        assert!(direct.is_migrated());
        assert_eq!(direct.get(Hv::new(0, 1)), (None, false));
    }

    impl<T: Clone> AdaptiveTable<T> {
        /// Test-only hook: force the migration path without needing genuine lock contention.
        fn migrate_to_concurrent_for_test(&self) {
            let guard = self.smr.pin().expect("fresh table always has room to register");
            self.migrate_to_concurrent();
            drop(guard);
        }
    }
}
