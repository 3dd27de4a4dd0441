//! The single-threaded reference table.
//!
//! Grounded on §4.3: a flat, linearly-probed bucket array with no epoch
//! machinery at all. It exists for two reasons: as a deterministic oracle the concurrent variants'
//! tests check their own results against, and as the seed state of [`crate::adaptive::AdaptiveTable`],
//! which starts here and migrates away the moment it detects a second writer.
//!
//! "Single-threaded" describes the *algorithm*, not the type's thread-safety: every operation
//! takes one coarse [`SpinLock`] for its whole duration, so the table is trivially safe to share,
//! it just serializes every caller rather than overlapping them. [`ReferenceTable::try_write_guard`]
//! exposes a non-blocking acquire of that same lock; failure there is exactly the contention signal
//! `AdaptiveTable` watches for.
use crate::config::Config;
use crate::dict::Table;
use crate::fingerprint::Hv;
use crate::spin_lock::{SpinLock, SpinLockGuard};
use crate::store_math::{bucket_index, compute_threshold, next_index};
use std::cell::UnsafeCell;

struct RefBucket<T> {
    hv: Hv,
    item: Option<T>,
    create_epoch: u64,
    deleted: bool,
}

impl<T> RefBucket<T> {
    fn empty() -> Self {
        RefBucket {
            hv: Hv::UNUSED,
            item: None,
            create_epoch: 0,
            deleted: false,
        }
    }
}

enum Probe {
    Match(usize),
    Empty(usize),
}

struct RefStore<T> {
    last_slot: usize,
    threshold: usize,
    used_count: usize,
    del_count: usize,
    buckets: Vec<RefBucket<T>>,
}

impl<T> RefStore<T> {
    fn with_size(size: usize) -> Self {
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, RefBucket::empty);
        RefStore {
            last_slot: size - 1,
            threshold: compute_threshold(size),
            used_count: 0,
            del_count: 0,
            buckets,
        }
    }

    fn size(&self) -> usize {
        self.last_slot + 1
    }

    /// Linear-probe for `hv`. Either the bucket already holding it, or the first unused bucket a
    /// writer would claim for it. A full wrap without resolving is an invariant violation: it
    /// cannot happen while `used_count < size`.
    fn probe(&self, hv: Hv) -> Probe {
        let start = bucket_index(hv, self.last_slot);
        let mut bix = start;
        loop {
            let b = &self.buckets[bix];
            if b.hv == hv {
                return Probe::Match(bix);
            }
            if b.hv.is_unused() {
                return Probe::Empty(bix);
            }
            bix = next_index(bix, self.last_slot);
            assert!(bix != start, "store full: probe wrapped without finding a slot");
        }
    }

    fn live_entries(&self) -> Vec<(Hv, T, u64)>
    where
        T: Clone,
    {
        self.buckets
            .iter()
            .filter(|b| !b.hv.is_unused() && !b.deleted)
            .map(|b| (b.hv, b.item.clone().expect("live bucket must hold an item"), b.create_epoch))
            .collect()
    }
}

pub struct ReferenceTable<T> {
    store: UnsafeCell<RefStore<T>>,
    next_epoch: UnsafeCell<u64>,
    min_store_size: usize,
    lock: SpinLock,
}

// SAFETY: every access to `store`/`next_epoch` happens while `lock` is held (either via the
// blocking `Table` methods or via a guard obtained through `try_write_guard`), so at most one
// thread ever touches the interior at a time.
unsafe impl<T: Send> Sync for ReferenceTable<T> {}

impl<T: Clone> ReferenceTable<T> {
    pub fn new(config: &Config) -> Self {
        ReferenceTable {
            store: UnsafeCell::new(RefStore::with_size(config.min_store_size().next_power_of_two())),
            next_epoch: UnsafeCell::new(0),
            min_store_size: config.min_store_size().next_power_of_two(),
            lock: SpinLock::default(),
        }
    }

    /// Non-blocking acquire of the table's single lock. `AdaptiveTable` uses failure here as its
    /// contention signal: if another writer already holds this table busy, a second writer has
    /// shown up and it's time to migrate to a concurrent variant.
    pub(crate) fn try_write_guard(&self) -> Option<SpinLockGuard<'_>> {
        self.lock.try_lock_guard()
    }

    /// Snapshot `next_epoch` so `AdaptiveTable` can seed the concurrent variant it migrates into,
    /// keeping sort order monotonic across the transition.
    pub(crate) fn next_epoch_snapshot(&self, _guard: &SpinLockGuard<'_>) -> u64 {
        unsafe { *self.next_epoch.get() }
    }

    /// Snapshot every live entry, in insertion order. Used by `AdaptiveTable` to replay the
    /// reference table's contents into the concurrent variant it migrates into.
    pub(crate) fn snapshot_for_migration(&self, _guard: &SpinLockGuard<'_>) -> Vec<(Hv, T, u64)>
    where
        T: Clone,
    {
        let store = unsafe { &*self.store.get() };
        store.live_entries()
    }

    fn migrate_if_needed(&self, store: &mut RefStore<T>) {
        if store.used_count <= store.threshold {
            return;
        }
        let live = store.live_entries();
        let new_size = crate::store_math::new_size(store.size(), live.len() + 1, self.min_store_size, false);
        let mut fresh = RefStore::with_size(new_size);
        for (hv, item, create_epoch) in live {
            match fresh.probe(hv) {
                Probe::Empty(bix) => {
                    fresh.buckets[bix] = RefBucket {
                        hv,
                        item: Some(item),
                        create_epoch,
                        deleted: false,
                    };
                    fresh.used_count += 1;
                }
                Probe::Match(_) => unreachable!("fresh store cannot already contain hv"),
            }
        }
        *store = fresh;
    }

    fn get_locked(&self, store: &RefStore<T>, hv: Hv) -> (Option<T>, bool)
    where
        T: Clone,
    {
        match store.probe(hv) {
            Probe::Match(bix) => {
                let b = &store.buckets[bix];
                if b.deleted {
                    (None, false)
                } else {
                    (b.item.clone(), true)
                }
            }
            Probe::Empty(_) => (None, false),
        }
    }

    fn put_locked(&self, store: &mut RefStore<T>, next_epoch: &mut u64, hv: Hv, item: T) -> (Option<T>, bool) {
        match store.probe(hv) {
            Probe::Match(bix) => {
                let b = &mut store.buckets[bix];
                let was_tombstone = b.deleted;
                let old = if was_tombstone { None } else { b.item.take() };
                let found = !was_tombstone;
                if was_tombstone {
                    store.del_count -= 1;
                    // A tombstone counts as absent: reinserting starts a fresh lifetime rather
                    // than inheriting the one that ended at the remove.
                    b.create_epoch = *next_epoch;
                    *next_epoch += 1;
                }
                b.item = Some(item);
                b.deleted = false;
                (old, found)
            }
            Probe::Empty(bix) => {
                let epoch = *next_epoch;
                *next_epoch += 1;
                store.buckets[bix] = RefBucket {
                    hv,
                    item: Some(item),
                    create_epoch: epoch,
                    deleted: false,
                };
                store.used_count += 1;
                self.migrate_if_needed(store);
                (None, false)
            }
        }
    }

    fn replace_locked(&self, store: &mut RefStore<T>, hv: Hv, item: T) -> (Option<T>, bool) {
        match store.probe(hv) {
            Probe::Match(bix) => {
                let b = &mut store.buckets[bix];
                if b.deleted {
                    (None, false)
                } else {
                    let old = b.item.take();
                    b.item = Some(item);
                    (old, true)
                }
            }
            Probe::Empty(_) => (None, false),
        }
    }

    fn add_locked(&self, store: &mut RefStore<T>, next_epoch: &mut u64, hv: Hv, item: T) -> bool {
        match store.probe(hv) {
            Probe::Match(bix) => {
                let b = &mut store.buckets[bix];
                if !b.deleted {
                    return false;
                }
                b.item = Some(item);
                b.deleted = false;
                b.create_epoch = *next_epoch;
                *next_epoch += 1;
                store.del_count -= 1;
                true
            }
            Probe::Empty(bix) => {
                let epoch = *next_epoch;
                *next_epoch += 1;
                store.buckets[bix] = RefBucket {
                    hv,
                    item: Some(item),
                    create_epoch: epoch,
                    deleted: false,
                };
                store.used_count += 1;
                self.migrate_if_needed(store);
                true
            }
        }
    }

    fn remove_locked(&self, store: &mut RefStore<T>, hv: Hv) -> (Option<T>, bool) {
        match store.probe(hv) {
            Probe::Match(bix) => {
                let b = &mut store.buckets[bix];
                if b.deleted {
                    (None, false)
                } else {
                    let old = b.item.take();
                    b.deleted = true;
                    store.del_count += 1;
                    (old, true)
                }
            }
            Probe::Empty(_) => (None, false),
        }
    }
}

impl<T: Clone> Table<T> for ReferenceTable<T> {
    fn get(&self, hv: Hv) -> (Option<T>, bool)
    where
        T: Clone,
    {
        let _g = self.lock.lock_guard();
        let store = unsafe { &*self.store.get() };
        self.get_locked(store, hv)
    }

    fn put(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        let _g = self.lock.lock_guard();
        let store = unsafe { &mut *self.store.get() };
        let next_epoch = unsafe { &mut *self.next_epoch.get() };
        self.put_locked(store, next_epoch, hv, item)
    }

    fn replace(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        let _g = self.lock.lock_guard();
        let store = unsafe { &mut *self.store.get() };
        self.replace_locked(store, hv, item)
    }

    fn add(&self, hv: Hv, item: T) -> bool {
        let _g = self.lock.lock_guard();
        let store = unsafe { &mut *self.store.get() };
        let next_epoch = unsafe { &mut *self.next_epoch.get() };
        self.add_locked(store, next_epoch, hv, item)
    }

    fn remove(&self, hv: Hv) -> (Option<T>, bool) {
        let _g = self.lock.lock_guard();
        let store = unsafe { &mut *self.store.get() };
        self.remove_locked(store, hv)
    }

    fn len(&self) -> u64 {
        let _g = self.lock.lock_guard();
        let store = unsafe { &*self.store.get() };
        (store.used_count - store.del_count) as u64
    }

    fn view(&self, sort: bool) -> Vec<(T, u64)>
    where
        T: Clone,
    {
        let _g = self.lock.lock_guard();
        let store = unsafe { &*self.store.get() };
        let mut out: Vec<(T, u64)> = store
            .live_entries()
            .into_iter()
            .map(|(_, item, epoch)| (item, epoch))
            .collect();
        if sort {
            out.sort_by_key(|(_, epoch)| *epoch);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ReferenceTable<i64> {
        ReferenceTable::new(&Config::default().with_min_store_size(4))
    }

    #[test]
    fn test_put_then_get() {
        let t = table();
        assert_eq!(t.put(Hv::new(0, 1), 10), (None, false));
        assert_eq!(t.get(Hv::new(0, 1)), (Some(10), true));
        assert_eq!(t.get(Hv::new(0, 2)), (None, false));
    }

    #[test]
    fn test_put_overwrites_and_reports_previous() {
        let t = table();
        t.put(Hv::new(0, 1), 10);
        assert_eq!(t.put(Hv::new(0, 1), 20), (Some(10), true));
        assert_eq!(t.get(Hv::new(0, 1)), (Some(20), true));
    }

    #[test]
    fn test_remove_then_get_not_found() {
        let t = table();
        t.put(Hv::new(0, 1), 10);
        assert_eq!(t.remove(Hv::new(0, 1)), (Some(10), true));
        assert_eq!(t.get(Hv::new(0, 1)), (None, false));
        assert_eq!(t.remove(Hv::new(0, 1)), (None, false));
    }

    #[test]
    fn test_add_semantics() {
        let t = table();
        assert!(t.add(Hv::new(0, 1), 1));
        assert!(!t.add(Hv::new(0, 1), 2));
        t.remove(Hv::new(0, 1));
        assert!(t.add(Hv::new(0, 1), 3));
        assert_eq!(t.get(Hv::new(0, 1)), (Some(3), true));
    }

    #[test]
    fn test_replace_only_if_present() {
        let t = table();
        assert_eq!(t.replace(Hv::new(0, 1), 1), (None, false));
        t.put(Hv::new(0, 1), 1);
        assert_eq!(t.replace(Hv::new(0, 1), 2), (Some(1), true));
    }

    #[test]
    fn test_grows_past_threshold_and_preserves_entries() {
        let t = table();
        for i in 1..=100u64 {
            t.put(Hv::new(0, i), i as i64);
        }
        assert_eq!(t.len(), 100);
        for i in 1..=100u64 {
            assert_eq!(t.get(Hv::new(0, i)), (Some(i as i64), true));
        }
    }

    #[test]
    fn test_view_sorted_preserves_create_epoch_across_reinsert() {
        let t = table();
        for i in 1..=10u64 {
            t.put(Hv::new(0, i), i as i64);
        }
        for i in 1..=5u64 {
            t.remove(Hv::new(0, i));
        }
        for i in 1..=10u64 {
            t.put(Hv::new(0, i), i as i64);
        }
        let items: Vec<i64> = t.view(true).into_iter().map(|(v, _)| v).collect();
        assert_eq!(items, vec![6, 7, 8, 9, 10, 1, 2, 3, 4, 5]);
    }
}
