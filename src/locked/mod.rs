//! Per-bucket-locked, multi-writer table variants (§4.4).
//!
//! Both flavors share a per-bucket [`crate::spin_lock::SpinLock`] for write exclusion and a
//! table-wide `migrate_mutex` so exactly one writer performs a given migration. They differ only
//! in how many records a bucket remembers: [`unordered::LockedUnorderedTable`] keeps just the
//! current record (fast, `Fast`-only views); [`ordered::LockedOrderedTable`] keeps the full
//! reverse-chain history needed for `Consistent`, epoch-linearized views.
pub mod ordered;
pub mod unordered;

pub use ordered::LockedOrderedTable;
pub use unordered::LockedUnorderedTable;
