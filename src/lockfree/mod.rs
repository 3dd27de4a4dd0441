//! Lock-free, wait-free-bounded table variants (§4.5).
//!
//! Both flavors share one bucket/store shape and one writer state machine, implemented once in
//! [`common`] and wrapped by [`unordered::LockFreeUnorderedTable`] and
//! [`ordered::LockFreeOrderedTable`]. A bucket's record pointer and migration state share one
//! `AtomicUsize` via the tag bits in [`common::TAG_USED`]/[`common::TAG_RMD`]/
//! [`common::TAG_MOVING`]/[`common::TAG_MOVED`], packed by [`common::pack`]/[`common::unpack`].
//! `Record<T>`'s `#[repr(align(16))]` is what makes the low 4 bits free for this.
pub(crate) mod common;
pub mod ordered;
pub mod unordered;

pub use ordered::LockFreeOrderedTable;
pub use unordered::LockFreeUnorderedTable;
