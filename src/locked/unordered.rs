//! Per-bucket-locked table with a single record slot per bucket (§4.4, unordered flavor).
//!
//! Each bucket pairs a [`SpinLock`] guarding writes with a plain `AtomicPtr<Record<T>>` so readers
//! never need the lock: they open an SMR reservation, load the pointer, and dereference — the
//! record can't be freed out from under them because SMR won't reclaim anything retired at or
//! after their reservation's epoch.
//!
//! `view()` is always a `Fast`, possibly-inconsistent enumeration: with no per-bucket history
//! there is nothing to linearize against, so a concurrent writer can make the same key appear
//! zero or more than once, or a just-removed key still appear, in the returned vector. Use
//! [`crate::locked::ordered`] for a `Consistent` view.
use crate::config::Config;
use crate::dict::Table;
use crate::fingerprint::Hv;
use crate::hv_slot::HvSlot;
use crate::record::{self, Record};
use crate::smr::Smr;
use crate::spin_lock::SpinLock;
use crate::store_math::{bucket_index, compute_threshold, new_size, next_index};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

struct Bucket<T> {
    hv: HvSlot,
    lock: SpinLock,
    migrated: AtomicBool,
    current: AtomicPtr<Record<T>>,
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Bucket {
            hv: HvSlot::default(),
            lock: SpinLock::default(),
            migrated: AtomicBool::new(false),
            current: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

struct Store<T> {
    last_slot: usize,
    threshold: usize,
    used_count: AtomicUsize,
    del_count: AtomicUsize,
    buckets: Box<[Bucket<T>]>,
}

impl<T> Store<T> {
    fn with_size(size: usize) -> Self {
        let mut v = Vec::with_capacity(size);
        v.resize_with(size, Bucket::default);
        Store {
            last_slot: size - 1,
            threshold: compute_threshold(size),
            used_count: AtomicUsize::new(0),
            del_count: AtomicUsize::new(0),
            buckets: v.into_boxed_slice(),
        }
    }

    fn size(&self) -> usize {
        self.last_slot + 1
    }
}

/// Find `hv`'s bucket, claiming the first unused one if no match exists yet.
fn probe_claim<T>(store: &Store<T>, hv: Hv) -> usize {
    let start = bucket_index(hv, store.last_slot);
    let mut bix = start;
    loop {
        let b = &store.buckets[bix];
        match b.hv.load() {
            Some(h) if h == hv => return bix,
            Some(_) => {}
            None => {
                if b.hv.try_claim() {
                    b.hv.publish(hv);
                    return bix;
                }
                continue; // lost the claim race; re-examine this same bucket
            }
        }
        bix = next_index(bix, store.last_slot);
        assert!(bix != start, "store full: probe wrapped without finding a slot");
    }
}

/// Find `hv`'s bucket without claiming anything. `None` if absent in this store.
fn probe_find<T>(store: &Store<T>, hv: Hv) -> Option<usize> {
    let start = bucket_index(hv, store.last_slot);
    let mut bix = start;
    loop {
        let b = &store.buckets[bix];
        match b.hv.load() {
            Some(h) if h == hv => return Some(bix),
            Some(_) => {}
            None => return None,
        }
        bix = next_index(bix, store.last_slot);
        if bix == start {
            return None;
        }
    }
}

pub struct LockedUnorderedTable<T> {
    store_current: AtomicPtr<Store<T>>,
    migrate_mutex: SpinLock,
    min_store_size: usize,
    smr: Smr,
}

unsafe impl<T: Send> Sync for LockedUnorderedTable<T> {}
unsafe impl<T: Send> Send for LockedUnorderedTable<T> {}

impl<T> LockedUnorderedTable<T> {
    pub fn new(config: &Config) -> Self {
        let size = config.min_store_size().next_power_of_two();
        LockedUnorderedTable {
            store_current: AtomicPtr::new(Box::into_raw(Box::new(Store::with_size(size)))),
            migrate_mutex: SpinLock::default(),
            min_store_size: size,
            smr: Smr::new(config),
        }
    }

    fn store(&self) -> &Store<T> {
        unsafe { &*self.store_current.load(Ordering::Acquire) }
    }

    /// Build a table pre-populated from another backend's snapshot, continuing its epoch sequence
    /// rather than starting a fresh one. Used by `AdaptiveTable`'s one-shot migration so sort order
    /// stays monotonic across the transition.
    pub(crate) fn from_snapshot(config: &Config, next_epoch: u64, entries: Vec<(Hv, T, u64)>) -> Self {
        let min_size = config.min_store_size().next_power_of_two();
        let size = new_size(min_size, entries.len() + 1, min_size, false);
        let store = Store::with_size(size);
        for (hv, item, create_epoch) in entries {
            let bix = probe_claim(&store, hv);
            let rec = record::alloc(Record::new(Some(item), create_epoch, false, ptr::null_mut()));
            unsafe { &*rec }.commit_write(create_epoch);
            store.buckets[bix].current.store(rec, Ordering::Relaxed);
            store.used_count.fetch_add(1, Ordering::Relaxed);
        }
        let table = LockedUnorderedTable {
            store_current: AtomicPtr::new(Box::into_raw(Box::new(store))),
            migrate_mutex: SpinLock::default(),
            min_store_size: min_size,
            smr: Smr::new(config),
        };
        table.smr.seed_epoch(next_epoch);
        table
    }

    /// Runs a mutating closure against `hv`'s bucket, retrying against a fresh store whenever the
    /// bucket we locked turns out to have just been migrated away. `claim` selects whether an
    /// absent key should claim a fresh bucket (`put`/`add`) or be reported as not-found
    /// (`replace`/`remove`).
    fn with_write<R>(
        &self,
        hv: Hv,
        claim: bool,
        not_found: R,
        f: impl Fn(&Store<T>, &Bucket<T>) -> (R, bool),
    ) -> R {
        loop {
            let store = self.store();
            let bix = if claim {
                Some(probe_claim(store, hv))
            } else {
                probe_find(store, hv)
            };
            let bix = match bix {
                Some(b) => b,
                None => return not_found,
            };
            let bucket = &store.buckets[bix];
            let _g = bucket.lock.lock_guard();
            if bucket.migrated.load(Ordering::Acquire) {
                continue; // retry against store_current, which has since advanced
            }
            let (result, just_claimed) = f(store, bucket);
            drop(_g);
            // Claiming a fresh bucket may have pushed used_count past the resize threshold.
            if claim && just_claimed && store.used_count.load(Ordering::Relaxed) > store.threshold {
                self.migrate();
            }
            return result;
        }
    }

    fn migrate(&self) {
        let _mg = self.migrate_mutex.lock_guard();
        let old_ptr = self.store_current.load(Ordering::Acquire);
        let old = unsafe { &*old_ptr };

        let guards: Vec<_> = old.buckets.iter().map(|b| b.lock.lock_guard()).collect();
        // Someone else may have completed a migration while we waited for every lock.
        if !ptr::eq(old_ptr, self.store_current.load(Ordering::Acquire)) {
            return;
        }

        let mut live = 0usize;
        for b in old.buckets.iter() {
            if b.hv.load().is_some() && !b.current.load(Ordering::Relaxed).is_null() {
                live += 1;
            }
        }
        let new_size_val = new_size(old.size(), live + 1, self.min_store_size, false);
        let fresh = Store::with_size(new_size_val);

        for b in old.buckets.iter() {
            b.migrated.store(true, Ordering::Release);
            let hv = match b.hv.load() {
                Some(hv) => hv,
                None => continue,
            };
            let rec_ptr = b.current.load(Ordering::Relaxed);
            if rec_ptr.is_null() {
                continue;
            }
            if unsafe { &*rec_ptr }.is_tombstone() {
                // Tombstones don't need to survive a migration.
                let epoch = self.smr.current_epoch();
                let _ = self.smr.retire(epoch, Box::new(move || unsafe { record::reclaim(rec_ptr) }));
                continue;
            }
            let dst_bix = probe_claim(&fresh, hv);
            fresh.buckets[dst_bix].current.store(rec_ptr, Ordering::Relaxed);
            fresh.used_count.fetch_add(1, Ordering::Relaxed);
        }

        let new_ptr = Box::into_raw(Box::new(fresh));
        self.store_current.store(new_ptr, Ordering::Release);
        drop(guards);
        let epoch = self.smr.current_epoch();
        let _ = self
            .smr
            .retire(epoch, Box::new(move || unsafe { drop(Box::from_raw(old_ptr)) }));
    }

    fn read<R>(&self, hv: Hv, absent: R, f: impl FnOnce(&Record<T>) -> R) -> R {
        let guard = match self.smr.pin() {
            Ok(g) => g,
            Err(_) => return absent,
        };
        let store = self.store();
        let bix = match probe_find(store, hv) {
            Some(b) => b,
            None => return absent,
        };
        let rec_ptr = store.buckets[bix].current.load(Ordering::Acquire);
        if rec_ptr.is_null() {
            return absent;
        }
        let rec = unsafe { &*rec_ptr };
        if rec.is_tombstone() {
            absent
        } else {
            f(rec)
        }
    }
}

impl<T: Clone> Table<T> for LockedUnorderedTable<T> {
    fn get(&self, hv: Hv) -> (Option<T>, bool)
    where
        T: Clone,
    {
        self.read(hv, (None, false), |rec| (rec.item.clone(), true))
    }

    fn put(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        let cell = std::cell::RefCell::new(Some(item));
        self.with_write(hv, true, (None, false), |store, bucket| {
            let prev_ptr = bucket.current.load(Ordering::Acquire);
            let (prev_was_tombstone, create_epoch) = match unsafe { prev_ptr.as_ref() } {
                Some(prev) => (prev.is_tombstone(), prev.create_epoch),
                None => (false, 0),
            };
            let guard = match self.smr.pin_linearized() {
                Ok(g) => g,
                Err(_) => return ((None, false), false),
            };
            let epoch = guard.epoch();
            // A tombstone counts as absent: reinserting a removed key starts a fresh lifetime
            // rather than inheriting the one that ended at the remove.
            let create_epoch = if prev_ptr.is_null() || prev_was_tombstone { epoch } else { create_epoch };
            let item = cell.borrow_mut().take().expect("put closure runs once");
            let rec = record::alloc(Record::new(Some(item), create_epoch, false, ptr::null_mut()));
            unsafe { &*rec }.commit_write(epoch);
            bucket.current.store(rec, Ordering::Release);
            let just_claimed = prev_ptr.is_null();
            if !prev_ptr.is_null() {
                let prev = prev_ptr;
                guard.retire(Box::new(move || unsafe { record::reclaim(prev) }));
            }
            if prev_was_tombstone {
                store.del_count.fetch_sub(1, Ordering::Relaxed);
            }
            if just_claimed {
                store.used_count.fetch_add(1, Ordering::Relaxed);
            }
            let old_item = unsafe { prev_ptr.as_ref() }
                .filter(|p| !p.is_tombstone())
                .and_then(|p| p.item.clone());
            let found = unsafe { prev_ptr.as_ref() }.map(|p| !p.is_tombstone()).unwrap_or(false);
            ((old_item, found), just_claimed)
        })
    }

    fn replace(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        let cell = std::cell::RefCell::new(Some(item));
        self.with_write(hv, false, (None, false), |_store, bucket| {
            let prev_ptr = bucket.current.load(Ordering::Acquire);
            let prev = match unsafe { prev_ptr.as_ref() } {
                Some(p) if !p.is_tombstone() => p,
                _ => return ((None, false), false),
            };
            let guard = match self.smr.pin_linearized() {
                Ok(g) => g,
                Err(_) => return ((None, false), false),
            };
            let epoch = guard.epoch();
            let create_epoch = prev.create_epoch;
            let item = cell.borrow_mut().take().expect("replace closure runs once");
            let rec = record::alloc(Record::new(Some(item), create_epoch, false, ptr::null_mut()));
            unsafe { &*rec }.commit_write(epoch);
            bucket.current.store(rec, Ordering::Release);
            let old_item = prev.item.clone();
            guard.retire(Box::new(move || unsafe { record::reclaim(prev_ptr) }));
            ((old_item, true), false)
        })
    }

    fn add(&self, hv: Hv, item: T) -> bool {
        let cell = std::cell::RefCell::new(Some(item));
        self.with_write(hv, true, false, |store, bucket| {
            let prev_ptr = bucket.current.load(Ordering::Acquire);
            if let Some(prev) = unsafe { prev_ptr.as_ref() } {
                if !prev.is_tombstone() {
                    return (false, false);
                }
            }
            let guard = match self.smr.pin_linearized() {
                Ok(g) => g,
                Err(_) => return (false, false),
            };
            let epoch = guard.epoch();
            let just_claimed = prev_ptr.is_null();
            let item = cell.borrow_mut().take().expect("add closure runs once");
            let rec = record::alloc(Record::new(Some(item), epoch, false, ptr::null_mut()));
            unsafe { &*rec }.commit_write(epoch);
            bucket.current.store(rec, Ordering::Release);
            if !prev_ptr.is_null() {
                store.del_count.fetch_sub(1, Ordering::Relaxed);
                guard.retire(Box::new(move || unsafe { record::reclaim(prev_ptr) }));
            }
            if just_claimed {
                store.used_count.fetch_add(1, Ordering::Relaxed);
            }
            (true, just_claimed)
        })
    }

    fn remove(&self, hv: Hv) -> (Option<T>, bool) {
        self.with_write(hv, false, (None, false), |store, bucket| {
            let prev_ptr = bucket.current.load(Ordering::Acquire);
            let prev = match unsafe { prev_ptr.as_ref() } {
                Some(p) if !p.is_tombstone() => p,
                _ => return ((None, false), false),
            };
            let guard = match self.smr.pin_linearized() {
                Ok(g) => g,
                Err(_) => return ((None, false), false),
            };
            let epoch = guard.epoch();
            let create_epoch = prev.create_epoch;
            let rec = record::alloc(Record::new(None, create_epoch, true, ptr::null_mut()));
            unsafe { &*rec }.commit_write(epoch);
            bucket.current.store(rec, Ordering::Release);
            let old_item = prev.item.clone();
            store.del_count.fetch_add(1, Ordering::Relaxed);
            guard.retire(Box::new(move || unsafe { record::reclaim(prev_ptr) }));
            ((old_item, true), false)
        })
    }

    fn len(&self) -> u64 {
        let store = self.store();
        let used = store.used_count.load(Ordering::Relaxed);
        let del = store.del_count.load(Ordering::Relaxed);
        (used - del) as u64
    }

    fn view(&self, sort: bool) -> Vec<(T, u64)>
    where
        T: Clone,
    {
        let _guard = match self.smr.pin() {
            Ok(g) => g,
            Err(_) => return Vec::new(),
        };
        let store = self.store();
        let mut out = Vec::new();
        for b in store.buckets.iter() {
            if b.hv.load().is_none() {
                continue;
            }
            let rec_ptr = b.current.load(Ordering::Acquire);
            if rec_ptr.is_null() {
                continue;
            }
            let rec = unsafe { &*rec_ptr };
            if rec.is_tombstone() {
                continue;
            }
            if let Some(item) = rec.item.clone() {
                out.push((item, rec.create_epoch));
            }
        }
        if sort {
            out.sort_by_key(|(_, epoch)| *epoch);
        }
        out
    }
}

impl<T> Drop for LockedUnorderedTable<T> {
    fn drop(&mut self) {
        let store_ptr = self.store_current.load(Ordering::Acquire);
        let store = unsafe { Box::from_raw(store_ptr) };
        for b in store.buckets.iter() {
            let rec_ptr = b.current.load(Ordering::Relaxed);
            unsafe { record::reclaim(rec_ptr) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LockedUnorderedTable<i64> {
        LockedUnorderedTable::new(&Config::default().with_min_store_size(4))
    }

    #[test]
    fn test_put_then_get() {
        let t = table();
        assert_eq!(t.put(Hv::new(0, 1), 10), (None, false));
        assert_eq!(t.get(Hv::new(0, 1)), (Some(10), true));
    }

    #[test]
    fn test_put_overwrite_reports_previous() {
        let t = table();
        t.put(Hv::new(0, 1), 10);
        assert_eq!(t.put(Hv::new(0, 1), 20), (Some(10), true));
    }

    #[test]
    fn test_remove_then_get() {
        let t = table();
        t.put(Hv::new(0, 1), 10);
        assert_eq!(t.remove(Hv::new(0, 1)), (Some(10), true));
        assert_eq!(t.get(Hv::new(0, 1)), (None, false));
    }

    #[test]
    fn test_add_semantics() {
        let t = table();
        assert!(t.add(Hv::new(0, 1), 1));
        assert!(!t.add(Hv::new(0, 1), 2));
        t.remove(Hv::new(0, 1));
        assert!(t.add(Hv::new(0, 1), 3));
    }

    #[test]
    fn test_grows_past_threshold() {
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
    fn test_parallel_puts_converge() {
        use std::sync::Arc;
        use std::thread;

        let t = Arc::new(LockedUnorderedTable::<i64>::new(&Config::default().with_min_store_size(16)));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let t = t.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200u64 {
                    t.put(Hv::new(0, i), i as i64);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.len(), 200);
        for i in 0..200u64 {
            assert_eq!(t.get(Hv::new(0, i)), (Some(i as i64), true));
        }
    }
}
