//! Machinery shared by both lock-free table flavors (§4.5): the tagged record pointer, the
//! bucket/store shapes, probing, and the migration protocol. `unordered.rs` and `ordered.rs` each
//! wrap a [`LockFreeCore`] and differ only in whether a write keeps the displaced record reachable
//! through `Record::next` (ordered) or retires it outright (unordered), and in how `view()` reads
//! the result back.
use crate::config::Config;
use crate::fingerprint::Hv;
use crate::hv_slot::HvSlot;
use crate::record::{self, Record};
use crate::smr::Smr;
use crate::store_math::{bucket_index, compute_threshold, next_index};
use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicUsize, Ordering};

pub(crate) const TAG_USED: usize = 1;
pub(crate) const TAG_RMD: usize = 2;
pub(crate) const TAG_MOVING: usize = 4;
pub(crate) const TAG_MOVED: usize = 8;
const TAG_MASK: usize = 0b1111;

#[inline]
pub(crate) fn pack<T>(ptr: *mut Record<T>, tag: usize) -> usize {
    debug_assert_eq!(ptr as usize & TAG_MASK, 0, "Record<T> must reserve 4 tag bits");
    (ptr as usize) | (tag & TAG_MASK)
}

#[inline]
pub(crate) fn unpack<T>(bits: usize) -> (*mut Record<T>, usize) {
    ((bits & !TAG_MASK) as *mut Record<T>, bits & TAG_MASK)
}

pub(crate) struct Bucket<T> {
    pub(crate) hv: HvSlot,
    /// A tagged `*mut Record<T>` packed into the low 4 bits: `USED`/`RMD`/`MOVING`/`MOVED`.
    pub(crate) slot: AtomicUsize,
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Bucket {
            hv: HvSlot::default(),
            slot: AtomicUsize::new(pack(ptr::null_mut(), 0)),
        }
    }
}

pub(crate) struct Store<T> {
    pub(crate) last_slot: usize,
    pub(crate) threshold: usize,
    pub(crate) used_count: AtomicUsize,
    pub(crate) del_count: AtomicUsize,
    pub(crate) store_next: AtomicPtr<Store<T>>,
    pub(crate) buckets: Box<[Bucket<T>]>,
}

impl<T> Store<T> {
    pub(crate) fn with_size(size: usize) -> Self {
        let mut v = Vec::with_capacity(size);
        v.resize_with(size, Bucket::default);
        Store {
            last_slot: size - 1,
            threshold: compute_threshold(size),
            used_count: AtomicUsize::new(0),
            del_count: AtomicUsize::new(0),
            store_next: AtomicPtr::new(ptr::null_mut()),
            buckets: v.into_boxed_slice(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.last_slot + 1
    }
}

/// Find `hv`'s bucket, claiming the first unused one if no match exists yet. Spins past
/// claim-in-progress buckets via `HvSlot::load`'s internal publish wait.
pub(crate) fn probe_claim<T>(store: &Store<T>, hv: Hv) -> usize {
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

pub(crate) fn probe_find<T>(store: &Store<T>, hv: Hv) -> Option<usize> {
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

/// Shared state behind both lock-free flavors: the live store pointer, SMR, and the wait-free
/// help-escalation counter.
pub(crate) struct LockFreeCore<T> {
    store_current: AtomicPtr<Store<T>>,
    min_store_size: usize,
    retry_threshold: u32,
    help_needed: AtomicI64,
    pub(crate) smr: Smr,
}

unsafe impl<T: Send> Sync for LockFreeCore<T> {}
unsafe impl<T: Send> Send for LockFreeCore<T> {}

impl<T> LockFreeCore<T> {
    pub(crate) fn new(config: &Config) -> Self {
        let size = config.min_store_size().next_power_of_two();
        LockFreeCore {
            store_current: AtomicPtr::new(Box::into_raw(Box::new(Store::with_size(size)))),
            min_store_size: size,
            retry_threshold: config.retry_threshold(),
            help_needed: AtomicI64::new(0),
            smr: Smr::new(config),
        }
    }

    pub(crate) fn store(&self) -> &Store<T> {
        unsafe { &*self.store_current.load(Ordering::Acquire) }
    }

    pub(crate) fn len(&self) -> u64 {
        let store = self.store();
        let used = store.used_count.load(Ordering::Relaxed);
        let del = store.del_count.load(Ordering::Relaxed);
        used.saturating_sub(del) as u64
    }

    fn help_active(&self) -> bool {
        self.help_needed.load(Ordering::Relaxed) > 0
    }

    /// Race to migrate `store` (the store a writer just observed `MOVING` on, or pushed past
    /// threshold). All progress is idempotent: whichever thread gets there first does the work,
    /// everyone else's attempt degenerates into no-ops against already-`MOVED` buckets.
    ///
    /// `keep_chain` must match the flavor calling in: `false` (unordered) lets a tombstoned bucket
    /// be reclaimed and dropped on the floor during the copy, since nothing needs its history;
    /// `true` (ordered) carries a tombstoned bucket's whole chain forward instead, because an
    /// in-flight `view()` pinned at an epoch before this migration may still need to walk past it.
    pub(crate) fn migrate(&self, store: &Store<T>, keep_chain: bool) {
        // Freeze: no further writes to `store` are possible once every bucket carries MOVING.
        for b in store.buckets.iter() {
            loop {
                let observed = b.slot.load(Ordering::Acquire);
                let (ptr, tag) = unpack::<T>(observed);
                if tag & TAG_MOVING != 0 {
                    break;
                }
                let frozen = pack(ptr, tag | TAG_MOVING);
                match b.slot.compare_exchange_weak(observed, frozen, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => break,
                    Err(_) => continue,
                }
            }
        }

        // Install successor: first migrator to get here allocates it; losers retire-unused theirs.
        let mut next_ptr = store.store_next.load(Ordering::Acquire);
        if next_ptr.is_null() {
            let live_guess = store.used_count.load(Ordering::Relaxed).saturating_sub(store.del_count.load(Ordering::Relaxed));
            let size = crate::store_math::new_size(store.size(), live_guess + 1, self.min_store_size, self.help_active());
            let candidate = Box::into_raw(Box::new(Store::with_size(size)));
            match store.store_next.compare_exchange(ptr::null_mut(), candidate, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => next_ptr = candidate,
                Err(existing) => {
                    unsafe { drop(Box::from_raw(candidate)) };
                    next_ptr = existing;
                }
            }
        }
        let next_store = unsafe { &*next_ptr };

        // Copy: every source bucket becomes MOVED exactly once. Destination counters are bumped
        // only by whichever thread's CAS actually claims the destination slot, so concurrent
        // migrators helping the same migration never double-count.
        for b in store.buckets.iter() {
            loop {
                let observed = b.slot.load(Ordering::Acquire);
                let (ptr, tag) = unpack::<T>(observed);
                if tag & TAG_MOVED != 0 {
                    break;
                }
                let is_tombstone = tag & TAG_RMD != 0;
                if ptr.is_null() || (is_tombstone && !keep_chain) {
                    if !ptr.is_null() {
                        let epoch = self.smr.current_epoch();
                        let _ = self.smr.retire(epoch, Box::new(move || unsafe { record::reclaim(ptr) }));
                    }
                    let moved = pack::<T>(ptr::null_mut(), tag | TAG_MOVED);
                    match b.slot.compare_exchange(observed, moved, Ordering::AcqRel, Ordering::Acquire) {
                        Ok(_) => break,
                        Err(_) => continue,
                    }
                } else {
                    let hv = b.hv.load().expect("a USED bucket always has a published fingerprint");
                    let dst_bix = probe_claim(next_store, hv);
                    let dst = &next_store.buckets[dst_bix];
                    let dst_observed = dst.slot.load(Ordering::Acquire);
                    let (dst_ptr, _) = unpack::<T>(dst_observed);
                    if dst_ptr.is_null() {
                        let dst_tag = if is_tombstone { TAG_RMD } else { TAG_USED };
                        let cleared = pack(ptr, dst_tag);
                        if dst.slot.compare_exchange(dst_observed, cleared, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                            next_store.used_count.fetch_add(1, Ordering::Relaxed);
                            if is_tombstone {
                                next_store.del_count.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        // Losing this CAS is success too: someone else already migrated it, and
                        // already bumped the counters above.
                    }
                    let moved = pack(ptr, tag | TAG_MOVED);
                    match b.slot.compare_exchange(observed, moved, Ordering::AcqRel, Ordering::Acquire) {
                        Ok(_) => break,
                        Err(_) => continue,
                    }
                }
            }
        }

        // Finalize: publish the successor; only the winning CAS retires the old store.
        let old_ptr = store as *const Store<T> as *mut Store<T>;
        if self
            .store_current
            .compare_exchange(old_ptr, next_ptr, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let epoch = self.smr.current_epoch();
            let _ = self.smr.retire(epoch, Box::new(move || unsafe { drop(Box::from_raw(old_ptr)) }));
        }
    }

    /// Build a core pre-populated from another backend's snapshot, continuing its epoch sequence
    /// rather than starting a fresh one. Used by `AdaptiveTable`'s one-shot migration so sort order
    /// stays monotonic across the transition.
    pub(crate) fn from_snapshot(config: &Config, next_epoch: u64, entries: Vec<(Hv, T, u64)>) -> Self {
        let min_size = config.min_store_size().next_power_of_two();
        let size = crate::store_math::new_size(min_size, entries.len() + 1, min_size, false);
        let store = Store::with_size(size);
        for (hv, item, create_epoch) in entries {
            let bix = probe_claim(&store, hv);
            let rec = record::alloc(Record::new(Some(item), create_epoch, false, ptr::null_mut()));
            unsafe { &*rec }.commit_write(create_epoch);
            store.buckets[bix].slot.store(pack(rec, TAG_USED), Ordering::Relaxed);
            store.used_count.fetch_add(1, Ordering::Relaxed);
        }
        let core = LockFreeCore {
            store_current: AtomicPtr::new(Box::into_raw(Box::new(store))),
            min_store_size: min_size,
            retry_threshold: config.retry_threshold(),
            help_needed: AtomicI64::new(0),
            smr: Smr::new(config),
        };
        core.smr.seed_epoch(next_epoch);
        core
    }

    /// Free every live and tombstoned record still reachable from the current store. Only valid
    /// once the owning table is being dropped and no concurrent access can occur.
    pub(crate) fn drop_all_records(&mut self) {
        let store_ptr = self.store_current.load(Ordering::Acquire);
        let store = unsafe { Box::from_raw(store_ptr) };
        for b in store.buckets.iter() {
            let (mut cur, _) = unpack::<T>(b.slot.load(Ordering::Acquire));
            while !cur.is_null() {
                let next = unsafe { &*cur }.next;
                unsafe { record::reclaim(cur) };
                cur = next;
            }
        }
    }
}

/// Tracks migrate-and-retry attempts for one operation and raises `help_needed` once the retry
/// count crosses `Config::retry_threshold`, for the duration of the whole operation (not just one
/// migration): this is what makes the overall algorithm wait-free with a small constant bound.
pub(crate) struct RetryState<'a, T> {
    core: &'a LockFreeCore<T>,
    count: u32,
    raised: bool,
}

impl<'a, T> RetryState<'a, T> {
    pub(crate) fn new(core: &'a LockFreeCore<T>) -> Self {
        RetryState {
            core,
            count: 0,
            raised: false,
        }
    }

    /// Record a migrate-and-retry cycle and perform the migration.
    pub(crate) fn migrate_and_retry(&mut self, store: &Store<T>, keep_chain: bool) {
        self.count += 1;
        if self.count >= self.core.retry_threshold && !self.raised {
            self.core.help_needed.fetch_add(1, Ordering::Relaxed);
            self.raised = true;
        }
        self.core.migrate(store, keep_chain);
    }
}

impl<'a, T> Drop for RetryState<'a, T> {
    fn drop(&mut self) {
        if self.raised {
            self.core.help_needed.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// Walk a chain from `head` for the newest record committed at or before `at_epoch`. Shared with
/// `locked::ordered`'s identical helper, duplicated here since it closes over a plain `*mut`
/// pointer rather than an `AtomicPtr`-guarded one and the two modules otherwise share no types.
pub(crate) unsafe fn record_as_of<T>(head: *mut Record<T>, at_epoch: u64) -> Option<&'static Record<T>> {
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

/// Walk the chain from `head` for the first record whose `write_epoch` has already fallen behind
/// every outstanding reservation (`floor`), detach everything past it, and return the detached
/// tail. Sound because any reader's `record_as_of` stops and returns as soon as it reaches a
/// record with `write_epoch <= its pinned epoch`, never reading that record's `next` — and since
/// `floor` is the minimum over every currently live reservation, every present and future reader's
/// pinned epoch is `>= floor >= this record's write_epoch`, so no reader ever reaches past it again.
unsafe fn split_dead_tail<T>(head: *mut Record<T>, floor: u64) -> Option<*mut Record<T>> {
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

/// Retire every record in a chain starting at `tail`, each stamped at the current epoch —
/// conservative, since every node here already has a `write_epoch` at or below that.
fn retire_chain<T>(core: &LockFreeCore<T>, tail: *mut Record<T>) {
    let epoch = core.smr.current_epoch();
    let mut cur = tail;
    while !cur.is_null() {
        let next = unsafe { &*cur }.next;
        let _ = core.smr.retire(epoch, Box::new(move || unsafe { record::reclaim(cur) }));
        cur = next;
    }
}

/// Prune and retire whatever of `displaced`'s own chain has already aged out, now that it's been
/// pushed one link deeper by a fresh write. No-op for the unordered flavor, which never builds a
/// chain in the first place (`keep_chain = false` always passes `next_link = null`).
fn prune_superseded<T>(core: &LockFreeCore<T>, displaced: *mut Record<T>, keep_chain: bool) {
    if !keep_chain || displaced.is_null() {
        return;
    }
    if let Some(dead_tail) = unsafe { split_dead_tail(displaced, core.smr.min_reservation()) } {
        retire_chain(core, dead_tail);
    }
}

pub(crate) fn do_get<T: Clone>(core: &LockFreeCore<T>, hv: Hv) -> (Option<T>, bool) {
    let guard = match core.smr.pin() {
        Ok(g) => g,
        Err(_) => return (None, false),
    };
    let _ = &guard;
    let store = core.store();
    let bix = match probe_find(store, hv) {
        Some(b) => b,
        None => return (None, false),
    };
    let (ptr, tag) = unpack::<T>(store.buckets[bix].slot.load(Ordering::Acquire));
    if tag & TAG_USED == 0 || ptr.is_null() {
        return (None, false);
    }
    (unsafe { &*ptr }.item.clone(), true)
}

/// Shared writer state machine (§4.5): locate/claim the bucket, wait out a `MOVING` bucket by
/// helping the migration along and retrying, then CAS a freshly built candidate record in. Losing
/// the CAS to anything other than a freshly-frozen bucket means another writer's candidate won the
/// race; per the wait-free contract that counts as this write having happened and immediately been
/// overwritten, so the caller's own item is handed back with `found = true` rather than retried.
///
/// `keep_chain` selects the two flavors' only real difference: `true` (ordered) links the
/// displaced record in as `candidate.next` instead of retiring it, so a linearized `view()` can
/// still walk back to it.
pub(crate) fn do_put<T: Clone>(core: &LockFreeCore<T>, hv: Hv, item: T, keep_chain: bool) -> (Option<T>, bool) {
    let mut retry = RetryState::new(core);
    let mut pending = Some(item);
    loop {
        let store = core.store();
        let bix = probe_claim(store, hv);
        let bucket = &store.buckets[bix];
        let observed = bucket.slot.load(Ordering::Acquire);
        let (obs_ptr, obs_tag) = unpack::<T>(observed);
        if obs_tag & TAG_MOVING != 0 {
            retry.migrate_and_retry(store, keep_chain);
            continue;
        }
        let guard = match core.smr.pin_linearized() {
            Ok(g) => g,
            Err(_) => return (pending.take(), false),
        };
        let epoch = guard.epoch();
        // A tombstone counts as absent for create_epoch purposes: the key was logically removed,
        // so reinserting it starts a fresh lifetime rather than inheriting the old one.
        let create_epoch = if obs_ptr.is_null() || obs_tag & TAG_RMD != 0 {
            epoch
        } else {
            unsafe { &*obs_ptr }.create_epoch
        };
        let next_link = if keep_chain { obs_ptr } else { ptr::null_mut() };
        let candidate = record::alloc(Record::new(pending.take(), create_epoch, false, next_link));
        unsafe { &*candidate }.commit_write(epoch);
        match bucket.slot.compare_exchange(observed, pack(candidate, TAG_USED), Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                let was_used = obs_tag & TAG_USED != 0;
                let was_tombstone = obs_tag & TAG_RMD != 0;
                let just_claimed = obs_ptr.is_null();
                let old_item = if was_used { unsafe { &*obs_ptr }.item.clone() } else { None };
                if !keep_chain && !obs_ptr.is_null() {
                    let to_free = obs_ptr;
                    guard.retire(Box::new(move || unsafe { record::reclaim(to_free) }));
                } else {
                    prune_superseded(core, obs_ptr, keep_chain);
                }
                if was_tombstone {
                    store.del_count.fetch_sub(1, Ordering::Relaxed);
                }
                if just_claimed {
                    store.used_count.fetch_add(1, Ordering::Relaxed);
                }
                let over_threshold = store.used_count.load(Ordering::Relaxed) > store.threshold;
                drop(guard);
                if just_claimed && over_threshold {
                    core.migrate(store, keep_chain);
                }
                return (old_item, was_used);
            }
            Err(now) => {
                let (_, now_tag) = unpack::<T>(now);
                let recovered = unsafe { Box::from_raw(candidate) }.item;
                if now_tag & TAG_MOVING != 0 {
                    pending = recovered;
                    retry.migrate_and_retry(store, keep_chain);
                    continue;
                }
                return (recovered, true);
            }
        }
    }
}

pub(crate) fn do_replace<T: Clone>(core: &LockFreeCore<T>, hv: Hv, item: T, keep_chain: bool) -> (Option<T>, bool) {
    let mut retry = RetryState::new(core);
    let mut pending = Some(item);
    loop {
        let store = core.store();
        let bix = match probe_find(store, hv) {
            Some(b) => b,
            None => return (pending.take(), false),
        };
        let bucket = &store.buckets[bix];
        let observed = bucket.slot.load(Ordering::Acquire);
        let (obs_ptr, obs_tag) = unpack::<T>(observed);
        if obs_tag & TAG_MOVING != 0 {
            retry.migrate_and_retry(store, keep_chain);
            continue;
        }
        if obs_tag & TAG_USED == 0 || obs_ptr.is_null() {
            return (pending.take(), false);
        }
        let guard = match core.smr.pin_linearized() {
            Ok(g) => g,
            Err(_) => return (pending.take(), false),
        };
        let epoch = guard.epoch();
        let create_epoch = unsafe { &*obs_ptr }.create_epoch;
        let next_link = if keep_chain { obs_ptr } else { ptr::null_mut() };
        let candidate = record::alloc(Record::new(pending.take(), create_epoch, false, next_link));
        unsafe { &*candidate }.commit_write(epoch);
        match bucket.slot.compare_exchange(observed, pack(candidate, TAG_USED), Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                let old_item = unsafe { &*obs_ptr }.item.clone();
                if !keep_chain {
                    let to_free = obs_ptr;
                    guard.retire(Box::new(move || unsafe { record::reclaim(to_free) }));
                } else {
                    prune_superseded(core, obs_ptr, keep_chain);
                }
                return (old_item, true);
            }
            Err(now) => {
                let (_, now_tag) = unpack::<T>(now);
                let recovered = unsafe { Box::from_raw(candidate) }.item;
                if now_tag & TAG_MOVING != 0 {
                    pending = recovered;
                    retry.migrate_and_retry(store, keep_chain);
                    continue;
                }
                return (recovered, true);
            }
        }
    }
}

pub(crate) fn do_add<T: Clone>(core: &LockFreeCore<T>, hv: Hv, item: T, keep_chain: bool) -> bool {
    let mut retry = RetryState::new(core);
    let mut pending = Some(item);
    loop {
        let store = core.store();
        let bix = probe_claim(store, hv);
        let bucket = &store.buckets[bix];
        let observed = bucket.slot.load(Ordering::Acquire);
        let (obs_ptr, obs_tag) = unpack::<T>(observed);
        if obs_tag & TAG_MOVING != 0 {
            retry.migrate_and_retry(store, keep_chain);
            continue;
        }
        if obs_tag & TAG_USED != 0 {
            return false;
        }
        let guard = match core.smr.pin_linearized() {
            Ok(g) => g,
            Err(_) => return false,
        };
        let epoch = guard.epoch();
        let just_claimed = obs_ptr.is_null();
        let was_tombstone = obs_tag & TAG_RMD != 0;
        let next_link = if keep_chain { obs_ptr } else { ptr::null_mut() };
        let candidate = record::alloc(Record::new(pending.take(), epoch, false, next_link));
        unsafe { &*candidate }.commit_write(epoch);
        match bucket.slot.compare_exchange(observed, pack(candidate, TAG_USED), Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                if !keep_chain && !obs_ptr.is_null() {
                    let to_free = obs_ptr;
                    guard.retire(Box::new(move || unsafe { record::reclaim(to_free) }));
                } else {
                    prune_superseded(core, obs_ptr, keep_chain);
                }
                if was_tombstone {
                    store.del_count.fetch_sub(1, Ordering::Relaxed);
                }
                if just_claimed {
                    store.used_count.fetch_add(1, Ordering::Relaxed);
                }
                let over_threshold = store.used_count.load(Ordering::Relaxed) > store.threshold;
                drop(guard);
                if just_claimed && over_threshold {
                    core.migrate(store, keep_chain);
                }
                true
            }
            Err(now) => {
                let (_, now_tag) = unpack::<T>(now);
                pending = unsafe { Box::from_raw(candidate) }.item;
                if now_tag & TAG_MOVING != 0 {
                    retry.migrate_and_retry(store, keep_chain);
                    continue;
                }
                // Someone else's write beat ours to a slot we thought was free: `add` loses.
                false
            }
        }
    }
}

pub(crate) fn do_remove<T: Clone>(core: &LockFreeCore<T>, hv: Hv, keep_chain: bool) -> (Option<T>, bool) {
    let mut retry = RetryState::new(core);
    loop {
        let store = core.store();
        let bix = match probe_find(store, hv) {
            Some(b) => b,
            None => return (None, false),
        };
        let bucket = &store.buckets[bix];
        let observed = bucket.slot.load(Ordering::Acquire);
        let (obs_ptr, obs_tag) = unpack::<T>(observed);
        if obs_tag & TAG_MOVING != 0 {
            retry.migrate_and_retry(store, keep_chain);
            continue;
        }
        if obs_tag & TAG_USED == 0 || obs_ptr.is_null() {
            return (None, false);
        }
        let guard = match core.smr.pin_linearized() {
            Ok(g) => g,
            Err(_) => return (None, false),
        };
        let epoch = guard.epoch();
        let create_epoch = unsafe { &*obs_ptr }.create_epoch;
        let next_link = if keep_chain { obs_ptr } else { ptr::null_mut() };
        let candidate = record::alloc(Record::new(None, create_epoch, true, next_link));
        unsafe { &*candidate }.commit_write(epoch);
        match bucket.slot.compare_exchange(observed, pack(candidate, TAG_RMD), Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                let old_item = unsafe { &*obs_ptr }.item.clone();
                store.del_count.fetch_add(1, Ordering::Relaxed);
                if !keep_chain {
                    let to_free = obs_ptr;
                    guard.retire(Box::new(move || unsafe { record::reclaim(to_free) }));
                } else {
                    prune_superseded(core, obs_ptr, keep_chain);
                }
                return (old_item, true);
            }
            Err(now) => {
                let (_, now_tag) = unpack::<T>(now);
                unsafe { record::reclaim(candidate) };
                if now_tag & TAG_MOVING != 0 {
                    retry.migrate_and_retry(store, keep_chain);
                    continue;
                }
                // Another writer raced our remove; per the wait-free contract this counts as
                // having removed whatever was there and lets the caller observe no old value.
                return (None, true);
            }
        }
    }
}

/// Unordered flavor's view: no per-bucket history to linearize against, so this just reads each
/// bucket's current slot under a plain (non-linearized) reservation. A concurrent writer may make
/// a key appear zero or more than once across a single call, or a just-removed key still appear.
pub(crate) fn view_fast<T: Clone>(core: &LockFreeCore<T>, sort: bool) -> Vec<(T, u64)> {
    let guard = match core.smr.pin() {
        Ok(g) => g,
        Err(_) => return Vec::new(),
    };
    let _ = &guard;
    let store = core.store();
    let mut out = Vec::new();
    for b in store.buckets.iter() {
        let (ptr, tag) = unpack::<T>(b.slot.load(Ordering::Acquire));
        if tag & TAG_USED == 0 || ptr.is_null() {
            continue;
        }
        let rec = unsafe { &*ptr };
        if let Some(item) = rec.item.clone() {
            out.push((item, rec.create_epoch));
        }
    }
    if sort {
        out.sort_by_key(|(_, epoch)| *epoch);
    }
    out
}

/// Ordered flavor's view: pin a single linearized epoch, then walk each bucket's chain for the
/// newest record committed at or before it. Every call returns a real, single point in the
/// table's history.
pub(crate) fn view_linearized<T: Clone>(core: &LockFreeCore<T>, sort: bool) -> Vec<(T, u64)> {
    let (guard, epoch) = match core.smr.pin_linearized() {
        Ok(g) => g,
        Err(_) => return Vec::new(),
    };
    let _ = &guard;
    let store = core.store();
    let mut out = Vec::new();
    for b in store.buckets.iter() {
        let (ptr, _) = unpack::<T>(b.slot.load(Ordering::Acquire));
        if ptr.is_null() {
            continue;
        }
        if let Some(rec) = unsafe { record_as_of(ptr, epoch) } {
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

/// Like [`view_linearized`], but keeps each entry's fingerprint. Used by `crate::set`, which must
/// merge two tables' views by key rather than only by insertion order.
pub(crate) fn view_keyed<T: Clone>(core: &LockFreeCore<T>, sort: bool) -> Vec<(Hv, T, u64)> {
    let (guard, epoch) = match core.smr.pin_linearized() {
        Ok(g) => g,
        Err(_) => return Vec::new(),
    };
    let _ = &guard;
    let store = core.store();
    let mut out = Vec::new();
    for b in store.buckets.iter() {
        let (ptr, _) = unpack::<T>(b.slot.load(Ordering::Acquire));
        if ptr.is_null() {
            continue;
        }
        let hv = match b.hv.load() {
            Some(hv) => hv,
            None => continue,
        };
        if let Some(rec) = unsafe { record_as_of(ptr, epoch) } {
            if let Some(item) = rec.item.clone() {
                out.push((hv, item, rec.create_epoch));
            }
        }
    }
    if sort {
        out.sort_by_key(|(_, _, epoch)| *epoch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_roundtrip() {
        let rec: *mut Record<u32> = std::ptr::null_mut();
        let bits = pack(rec, TAG_USED | TAG_MOVED);
        let (p, tag) = unpack::<u32>(bits);
        assert_eq!(p, rec);
        assert_eq!(tag, TAG_USED | TAG_MOVED);
    }
}
