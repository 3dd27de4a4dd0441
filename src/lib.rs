//! A family of concurrent hash tables sharing one epoch-based reclamation and migration core.
//!
//! Every table variant in this crate exposes the same [`dict::Table`] dictionary surface — `get`,
//! `put`, `replace`, `add`, `remove`, `len`, `view` — over keys represented solely by a 128-bit
//! [`fingerprint::Hv`]. Variants differ only in concurrency strategy:
//!
//! - [`reference::ReferenceTable`]: single-threaded, no concurrency machinery. Used both as a
//!   deterministic oracle in tests and as the seed state of [`adaptive::AdaptiveTable`].
//! - [`locked`]: per-bucket-lock, multi-writer, locked migration. `locked::unordered` and
//!   `locked::ordered` flavors.
//! - [`lockfree`]: lock-free/wait-free, CAS-driven, with a help-counter escalation protocol.
//!   `lockfree::unordered` and `lockfree::ordered` flavors.
//! - [`adaptive::AdaptiveTable`]: starts as the single-threaded reference table and migrates
//!   one-shot to a concurrent variant (chosen at construction) the moment a second writer shows up.
//!
//! [`set::Set`] layers set algebra (union, intersection, difference, ...) atop the ordered
//! lock-free variant's linearized view builder. [`smr`] is the epoch-based reclamation engine
//! every concurrent variant and the view builder share.
#![allow(dead_code)]

#[macro_use]
extern crate log;

pub mod adaptive;
pub mod config;
pub mod dict;
pub mod error;
pub mod fingerprint;
mod hv_slot;
pub mod locked;
pub mod lockfree;
mod record;
pub mod reference;
pub mod ring_buffer;
pub mod set;
pub(crate) mod smr;
mod spin_lock;
mod store_math;
pub mod util;
pub mod view;

pub use config::Config;
pub use dict::Table;
pub use fingerprint::Hv;
