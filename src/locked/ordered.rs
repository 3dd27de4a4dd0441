//! Per-bucket-locked table with a reverse-chained record history per bucket (§4.4, ordered flavor).
//!
//! Each write prepends a record to its bucket's chain (`new.next = old_head`) while holding that
//! bucket's [`SpinLock`]; the old head is then handed to SMR via `retire`, which only *schedules*
//! its eventual reclamation — the chain link to it stays intact until no reader's reservation
//! could still reach it, so a `view()` that pinned an earlier epoch can keep walking past nodes a
//! writer has already superseded.
//!
//! `view(sort = true)`/`view(sort = false)` both take an SMR linearized-op reservation first and
//! walk each bucket's chain for the newest record with `write_epoch <= E`: every `view()` on this
//! variant is `Consistent`, reflecting one real point in the table's history.
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
    head: AtomicPtr<Record<T>>,
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Bucket {
            hv: HvSlot::default(),
            lock: SpinLock::default(),
            migrated: AtomicBool::new(false),
            head: AtomicPtr::new(ptr::null_mut()),
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
                continue;
            }
        }
        bix = next_index(bix, store.last_slot);
        assert!(bix != start, "store full: probe wrapped without finding a slot");
    }
}

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

/// Walk a chain from `head` for the newest record committed at or before `at_epoch`. `None` if
/// the bucket was empty or tombstoned as of that epoch.
unsafe fn record_as_of<T>(head: *mut Record<T>, at_epoch: u64) -> Option<&'static Record<T>> {
    let mut cur = head;
    while !cur.is_null() {
        let rec = &*cur;
        if rec.write_epoch() <= at_epoch {
            return if rec.is_tombstone() { None } else { Some(rec) };
        }
        cur = rec.next;
    }
    None
}

pub struct LockedOrderedTable<T> {
    store_current: AtomicPtr<Store<T>>,
    migrate_mutex: SpinLock,
    min_store_size: usize,
    smr: Smr,
}

unsafe impl<T: Send> Sync for LockedOrderedTable<T> {}
unsafe impl<T: Send> Send for LockedOrderedTable<T> {}

impl<T> LockedOrderedTable<T> {
    pub fn new(config: &Config) -> Self {
        let size = config.min_store_size().next_power_of_two();
        LockedOrderedTable {
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
    /// stays monotonic across the transition. Each entry seeds a single-node chain; there is no
    /// prior write history to carry forward at migration time.
    pub(crate) fn from_snapshot(config: &Config, next_epoch: u64, entries: Vec<(Hv, T, u64)>) -> Self {
        let min_size = config.min_store_size().next_power_of_two();
        let size = new_size(min_size, entries.len() + 1, min_size, false);
        let store = Store::with_size(size);
        for (hv, item, create_epoch) in entries {
            let bix = probe_claim(&store, hv);
            let rec = record::alloc(Record::new(Some(item), create_epoch, false, ptr::null_mut()));
            unsafe { &*rec }.commit_write(create_epoch);
            store.buckets[bix].head.store(rec, Ordering::Relaxed);
            store.used_count.fetch_add(1, Ordering::Relaxed);
        }
        let table = LockedOrderedTable {
            store_current: AtomicPtr::new(Box::into_raw(Box::new(store))),
            migrate_mutex: SpinLock::default(),
            min_store_size: min_size,
            smr: Smr::new(config),
        };
        table.smr.seed_epoch(next_epoch);
        table
    }

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
                continue;
            }
            let (result, just_claimed) = f(store, bucket);
            drop(_g);
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
        if !ptr::eq(old_ptr, self.store_current.load(Ordering::Acquire)) {
            return;
        }

        let mut live = 0usize;
        for b in old.buckets.iter() {
            let head = b.head.load(Ordering::Relaxed);
            if b.hv.load().is_some() && !head.is_null() && !unsafe { &*head }.is_tombstone() {
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
            let head = b.head.load(Ordering::Relaxed);
            if head.is_null() {
                continue;
            }
            if unsafe { &*head }.is_tombstone() {
                self.retire_chain(head);
                continue;
            }
            // The chain (head plus its whole history) moves to the new store unchanged: a
            // `view()` that pinned an epoch before this migration published may still need to
            // walk past nodes this migration is carrying forward.
            let dst_bix = probe_claim(&fresh, hv);
            fresh.buckets[dst_bix].head.store(head, Ordering::Relaxed);
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

    /// Retire every node in a (now-unreachable-from-the-new-store) chain.
    fn retire_chain(&self, head: *mut Record<T>) {
        let epoch = self.smr.current_epoch();
        let mut cur = head;
        while !cur.is_null() {
            let next = unsafe { &*cur }.next;
            let _ = self.smr.retire(epoch, Box::new(move || unsafe { record::reclaim(cur) }));
            cur = next;
        }
    }

    /// Walk the chain from `head` for the first record whose `write_epoch` has fallen behind every
    /// outstanding reservation, detach everything past it, and return the detached tail. Sound for
    /// the same reason as the migration path: `record_as_of` returns as soon as it finds a record
    /// with `write_epoch <= its pinned epoch`, never reading that record's `next`, so once a
    /// record's `write_epoch` is below `self.smr.min_reservation()` no present or future reader can
    /// ever walk past it again.
    unsafe fn split_dead_tail(head: *mut Record<T>, floor: u64) -> Option<*mut Record<T>> {
        let mut cur = head;
        while !cur.is_null() {
            let rec = &*cur;
            if rec.write_epoch() <= floor {
                let tail = rec.next;
                if tail.is_null() {
                    return None;
                }
                (*cur).next = ptr::null_mut();
                return Some(tail);
            }
            cur = rec.next;
        }
        None
    }

    /// Prune and retire whatever of `displaced`'s own chain has already aged out, now that it's
    /// been pushed one link deeper by a fresh write.
    fn prune_superseded(&self, displaced: *mut Record<T>) {
        if displaced.is_null() {
            return;
        }
        if let Some(dead_tail) = unsafe { Self::split_dead_tail(displaced, self.smr.min_reservation()) } {
            self.retire_chain(dead_tail);
        }
    }
}

impl<T: Clone> Table<T> for LockedOrderedTable<T> {
    fn get(&self, hv: Hv) -> (Option<T>, bool)
    where
        T: Clone,
    {
        let guard = match self.smr.pin() {
            Ok(g) => g,
            Err(_) => return (None, false),
        };
        let _ = &guard;
        let store = self.store();
        let bix = match probe_find(store, hv) {
            Some(b) => b,
            None => return (None, false),
        };
        let head = store.buckets[bix].head.load(Ordering::Acquire);
        if head.is_null() {
            return (None, false);
        }
        let rec = unsafe { &*head };
        if rec.is_tombstone() {
            (None, false)
        } else {
            (rec.item.clone(), true)
        }
    }

    fn put(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        let cell = std::cell::RefCell::new(Some(item));
        self.with_write(hv, true, (None, false), |store, bucket| {
            let old_head = bucket.head.load(Ordering::Acquire);
            let (prev_item, found, create_epoch, prev_tombstone) = match unsafe { old_head.as_ref() } {
                Some(p) if !p.is_tombstone() => (p.item.clone(), true, p.create_epoch, false),
                Some(p) => (None, false, p.create_epoch, true),
                None => (None, false, 0, false),
            };
            let guard = match self.smr.pin_linearized() {
                Ok(g) => g,
                Err(_) => return ((None, false), false),
            };
            let epoch = guard.epoch();
            // A tombstone counts as absent: reinserting a removed key starts a fresh lifetime
            // rather than inheriting the one that ended at the remove.
            let create_epoch = if old_head.is_null() || prev_tombstone { epoch } else { create_epoch };
            let item = cell.borrow_mut().take().expect("put closure runs once");
            let rec = record::alloc(Record::new(Some(item), create_epoch, false, old_head));
            unsafe { &*rec }.commit_write(epoch);
            bucket.head.store(rec, Ordering::Release);
            self.prune_superseded(old_head);
            let just_claimed = old_head.is_null();
            if prev_tombstone {
                store.del_count.fetch_sub(1, Ordering::Relaxed);
            }
            if just_claimed {
                store.used_count.fetch_add(1, Ordering::Relaxed);
            }
            ((prev_item, found), just_claimed)
        })
    }

    fn replace(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        let cell = std::cell::RefCell::new(Some(item));
        self.with_write(hv, false, (None, false), |_store, bucket| {
            let old_head = bucket.head.load(Ordering::Acquire);
            let prev = match unsafe { old_head.as_ref() } {
                Some(p) if !p.is_tombstone() => p,
                _ => return ((None, false), false),
            };
            let guard = match self.smr.pin_linearized() {
                Ok(g) => g,
                Err(_) => return ((None, false), false),
            };
            let epoch = guard.epoch();
            let create_epoch = prev.create_epoch;
            let prev_item = prev.item.clone();
            let item = cell.borrow_mut().take().expect("replace closure runs once");
            let rec = record::alloc(Record::new(Some(item), create_epoch, false, old_head));
            unsafe { &*rec }.commit_write(epoch);
            bucket.head.store(rec, Ordering::Release);
            self.prune_superseded(old_head);
            ((prev_item, true), false)
        })
    }

    fn add(&self, hv: Hv, item: T) -> bool {
        let cell = std::cell::RefCell::new(Some(item));
        self.with_write(hv, true, false, |store, bucket| {
            let old_head = bucket.head.load(Ordering::Acquire);
            if let Some(p) = unsafe { old_head.as_ref() } {
                if !p.is_tombstone() {
                    return (false, false);
                }
            }
            let guard = match self.smr.pin_linearized() {
                Ok(g) => g,
                Err(_) => return (false, false),
            };
            let epoch = guard.epoch();
            let just_claimed = old_head.is_null();
            let item = cell.borrow_mut().take().expect("add closure runs once");
            let rec = record::alloc(Record::new(Some(item), epoch, false, old_head));
            unsafe { &*rec }.commit_write(epoch);
            bucket.head.store(rec, Ordering::Release);
            self.prune_superseded(old_head);
            if !old_head.is_null() {
                store.del_count.fetch_sub(1, Ordering::Relaxed);
            }
            if just_claimed {
                store.used_count.fetch_add(1, Ordering::Relaxed);
            }
            (true, just_claimed)
        })
    }

    fn remove(&self, hv: Hv) -> (Option<T>, bool) {
        self.with_write(hv, false, (None, false), |store, bucket| {
            let old_head = bucket.head.load(Ordering::Acquire);
            let prev = match unsafe { old_head.as_ref() } {
                Some(p) if !p.is_tombstone() => p,
                _ => return ((None, false), false),
            };
            let guard = match self.smr.pin_linearized() {
                Ok(g) => g,
                Err(_) => return ((None, false), false),
            };
            let epoch = guard.epoch();
            let create_epoch = prev.create_epoch;
            let prev_item = prev.item.clone();
            let rec = record::alloc(Record::new(None, create_epoch, true, old_head));
            unsafe { &*rec }.commit_write(epoch);
            bucket.head.store(rec, Ordering::Release);
            self.prune_superseded(old_head);
            store.del_count.fetch_add(1, Ordering::Relaxed);
            ((prev_item, true), false)
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
        let (guard, epoch) = match self.smr.pin_linearized() {
            Ok(g) => g,
            Err(_) => return Vec::new(),
        };
        let _ = &guard;
        let store = self.store();
        let mut out = Vec::new();
        for b in store.buckets.iter() {
            if b.hv.load().is_none() {
                continue;
            }
            let head = b.head.load(Ordering::Acquire);
            if head.is_null() {
                continue;
            }
            if let Some(rec) = unsafe { record_as_of(head, epoch) } {
                if let Some(item) = rec.item.clone() {
                    out.push((item, rec.create_epoch));
                }
            }
        }
        if sort {
            out.sort_by_key(|(_, epoch)| *epoch);
        }
        out
    }
}

impl<T> Drop for LockedOrderedTable<T> {
    fn drop(&mut self) {
        let store_ptr = self.store_current.load(Ordering::Acquire);
        let store = unsafe { Box::from_raw(store_ptr) };
        for b in store.buckets.iter() {
            let mut cur = b.head.load(Ordering::Relaxed);
            while !cur.is_null() {
                let next = unsafe { &*cur }.next;
                unsafe { record::reclaim(cur) };
                cur = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LockedOrderedTable<i64> {
        LockedOrderedTable::new(&Config::default().with_min_store_size(4))
    }

    #[test]
    fn test_put_then_get() {
        let t = table();
        assert_eq!(t.put(Hv::new(0, 1), 10), (None, false));
        assert_eq!(t.get(Hv::new(0, 1)), (Some(10), true));
    }

    #[test]
    fn test_ordering_preserves_create_epoch_across_reinsert() {
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

    #[test]
    fn test_add_semantics() {
        let t = table();
        assert!(t.add(Hv::new(0, 1), 1));
        assert!(!t.add(Hv::new(0, 1), 2));
        t.remove(Hv::new(0, 1));
        assert!(t.add(Hv::new(0, 1), 3));
    }

    #[test]
    fn test_grows_past_threshold_preserves_entries() {
        let t = table();
        for i in 1..=100u64 {
            t.put(Hv::new(0, i), i as i64);
        }
        assert_eq!(t.len(), 100);
        for i in 1..=100u64 {
            assert_eq!(t.get(Hv::new(0, i)), (Some(i as i64), true));
        }
    }
}
