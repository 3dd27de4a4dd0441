use epoch_hash::adaptive::AdaptiveTable;
use epoch_hash::config::Config;
use epoch_hash::fingerprint::Hv;
use epoch_hash::locked::{LockedOrderedTable, LockedUnorderedTable};
use epoch_hash::lockfree::{LockFreeOrderedTable, LockFreeUnorderedTable};
use epoch_hash::reference::ReferenceTable;
use epoch_hash::Table;

/// Deterministic 128-bit fingerprint for a `u64` test key, mirroring the bench harness.
pub fn hash_key(key: u64) -> Hv {
    let digest = xxhash_rust::xxh3::xxh3_128(&key.to_le_bytes());
    Hv::new((digest >> 64) as u64, digest as u64)
}

fn config() -> Config {
    Config::default().with_min_store_size(4)
}

/// Runs `body` once per concrete variant, small-sized so migrations happen early and often.
pub fn for_each_variant<F>(mut body: F)
where
    F: FnMut(&str, Box<dyn Table<u64> + Send + Sync>),
{
    let c = config();
    body("reference", Box::new(ReferenceTable::<u64>::new(&c)));
    body("locked_unordered", Box::new(LockedUnorderedTable::<u64>::new(&c)));
    body("locked_ordered", Box::new(LockedOrderedTable::<u64>::new(&c)));
    body("lockfree_unordered", Box::new(LockFreeUnorderedTable::<u64>::new(&c)));
    body("lockfree_ordered", Box::new(LockFreeOrderedTable::<u64>::new(&c)));
    body("adaptive", Box::new(AdaptiveTable::<u64>::new(&c)));
}

/// Like [`for_each_variant`], restricted to the variants whose `view()` is epoch-linearized
/// (the unordered flavors only ever offer the `Fast`, possibly-duplicating enumeration).
pub fn for_each_linearized_variant<F>(mut body: F)
where
    F: FnMut(&str, Box<dyn Table<u64> + Send + Sync>),
{
    let c = config();
    body("reference", Box::new(ReferenceTable::<u64>::new(&c)));
    body("locked_ordered", Box::new(LockedOrderedTable::<u64>::new(&c)));
    body("lockfree_ordered", Box::new(LockFreeOrderedTable::<u64>::new(&c)));
    body("adaptive", Box::new(AdaptiveTable::<u64>::new(&c)));
}
