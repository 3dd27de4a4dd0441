//! The value-bearing allocation every concurrent table variant stores behind a bucket.
//!
//! One `Record<T>` shape serves both bucket families in this crate. The locked variants
//! ([`crate::locked`]) reach it through a plain, mutex-guarded `AtomicPtr`; the lock-free variants
//! ([`crate::lockfree`]) reach it through a tagged pointer (see `lockfree::tagged_ptr`) whose low
//! bits encode bucket-level migration/tombstone state. Either way the record itself carries the
//! same epoch metadata, because that's what the view builder and SMR actually care about.
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

/// `create_epoch`/`write_epoch` never exceed 2^63; reserve the top bit as a "not yet committed"
/// sentinel so a freshly allocated-but-not-yet-published record is visibly distinct from one
/// committed at epoch 0.
pub(crate) const UNCOMMITTED: u64 = u64::MAX;

/// Ensures at least 4 free low-order bits on every `*mut Record<T>` for the lock-free variants'
/// tagged pointer (`lockfree::tagged_ptr`). Harmless overalignment for the locked variants, which
/// never pack tag bits into the pointer.
#[repr(align(16))]
pub(crate) struct Record<T> {
    pub(crate) item: Option<T>,
    /// Epoch at which this key first entered the table; inherited across overwrites so that
    /// `view(sort=true)` orders by original insertion, not by last write.
    pub(crate) create_epoch: u64,
    pub(crate) write_epoch: AtomicU64,
    pub(crate) deleted: bool,
    /// Reverse-chain link for the ordered variants, written once at construction. Mutated exactly
    /// once more, later, to prune a dead tail once this record's `write_epoch` has fallen below
    /// every live reservation: at that point no reader's chain walk (`record_as_of`) can still be
    /// on its way toward reading this field, since such a walk always returns as soon as it finds
    /// a record whose `write_epoch` satisfies its pin, without looking at that record's `next`.
    pub(crate) next: *mut Record<T>,
}

impl<T> Record<T> {
    pub(crate) fn new(item: Option<T>, create_epoch: u64, deleted: bool, next: *mut Record<T>) -> Self {
        Record {
            item,
            create_epoch,
            write_epoch: AtomicU64::new(UNCOMMITTED),
            deleted,
            next,
        }
    }

    pub(crate) fn write_epoch(&self) -> u64 {
        self.write_epoch.load(Ordering::Acquire)
    }

    /// Stamp `write_epoch` with the SMR epoch this record was actually committed at.
    ///
    /// Monotonic: if a cooperative helper (e.g. a concurrent `view`'s chain walk) observes the
    /// slot before the writer itself stamps it, both converge on the same, non-decreasing value —
    /// never overwriting a later stamp with an earlier one.
    pub(crate) fn commit_write(&self, epoch: u64) {
        let mut cur = self.write_epoch.load(Ordering::Acquire);
        loop {
            if cur != UNCOMMITTED && cur >= epoch {
                return;
            }
            match self.write_epoch.compare_exchange_weak(
                cur,
                epoch,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => cur = observed,
            }
        }
    }

    #[inline]
    pub(crate) fn is_tombstone(&self) -> bool {
        self.deleted
    }
}

/// Box-allocate a record and leak it into a raw pointer for storage in an atomic bucket slot.
pub(crate) fn alloc<T>(record: Record<T>) -> *mut Record<T> {
    Box::into_raw(Box::new(record))
}

/// Reclaim a record previously produced by [`alloc`]. Callers must only invoke this through SMR
/// retirement, once no reservation can still observe the pointer.
pub(crate) unsafe fn reclaim<T>(ptr: *mut Record<T>) {
    if !ptr.is_null() {
        drop(Box::from_raw(ptr));
    }
}

pub(crate) const fn null_record<T>() -> *mut Record<T> {
    ptr::null_mut()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_write_is_monotonic() {
        let r: Record<u32> = Record::new(Some(1), 0, false, null_record());
        r.commit_write(5);
        assert_eq!(r.write_epoch(), 5);
        r.commit_write(3);
        assert_eq!(r.write_epoch(), 5, "must not regress below an already-committed epoch");
        r.commit_write(9);
        assert_eq!(r.write_epoch(), 9);
    }

    #[test]
    fn test_alignment_leaves_tag_bits() {
        assert!(std::mem::align_of::<Record<u64>>() >= 16);
    }
}
