//! Lock-free table with a reverse-chained record history per bucket (§4.5, ordered flavor).
//!
//! Identical writer state machine to [`crate::lockfree::unordered`], with one difference: a
//! successful write links the displaced record in as `candidate.next` rather than retiring it, so
//! the chain stays walkable. `view()` therefore pins a single linearized epoch and walks each
//! bucket's chain for the newest record committed at or before it — every returned snapshot is a
//! real, single point in the table's history. See [`crate::lockfree::common::view_linearized`].
use crate::config::Config;
use crate::dict::Table;
use crate::fingerprint::Hv;
use crate::lockfree::common::{self, LockFreeCore};

pub struct LockFreeOrderedTable<T> {
    core: LockFreeCore<T>,
}

impl<T> LockFreeOrderedTable<T> {
    pub fn new(config: &Config) -> Self {
        LockFreeOrderedTable {
            core: LockFreeCore::new(config),
        }
    }

    pub(crate) fn core(&self) -> &LockFreeCore<T> {
        &self.core
    }

    /// Linearized snapshot keeping each entry's fingerprint, for `crate::set`'s cross-set algebra.
    pub(crate) fn view_keyed(&self, sort: bool) -> Vec<(Hv, T, u64)>
    where
        T: Clone,
    {
        common::view_keyed(&self.core, sort)
    }

    /// Build a table pre-populated from another backend's snapshot, continuing its epoch sequence.
    /// Used by `AdaptiveTable`'s one-shot migration so sort order stays monotonic across the
    /// transition. Each entry seeds a single-node chain; there is no prior write history to carry
    /// forward at migration time.
    pub(crate) fn from_snapshot(config: &Config, next_epoch: u64, entries: Vec<(Hv, T, u64)>) -> Self {
        LockFreeOrderedTable {
            core: LockFreeCore::from_snapshot(config, next_epoch, entries),
        }
    }
}

impl<T: Clone> Table<T> for LockFreeOrderedTable<T> {
    fn get(&self, hv: Hv) -> (Option<T>, bool)
    where
        T: Clone,
    {
        common::do_get(&self.core, hv)
    }

    fn put(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        common::do_put(&self.core, hv, item, true)
    }

    fn replace(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        common::do_replace(&self.core, hv, item, true)
    }

    fn add(&self, hv: Hv, item: T) -> bool {
        common::do_add(&self.core, hv, item, true)
    }

    fn remove(&self, hv: Hv) -> (Option<T>, bool) {
        common::do_remove(&self.core, hv, true)
    }

    fn len(&self) -> u64 {
        self.core.len()
    }

    fn view(&self, sort: bool) -> Vec<(T, u64)>
    where
        T: Clone,
    {
        common::view_linearized(&self.core, sort)
    }
}

impl<T> Drop for LockFreeOrderedTable<T> {
    fn drop(&mut self) {
        self.core.drop_all_records();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LockFreeOrderedTable<i64> {
        LockFreeOrderedTable::new(&Config::default().with_min_store_size(4))
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
        for i in 1..=200u64 {
            t.put(Hv::new(0, i), i as i64);
        }
        assert_eq!(t.len(), 200);
        for i in 1..=200u64 {
            assert_eq!(t.get(Hv::new(0, i)), (Some(i as i64), true));
        }
    }

    #[test]
    fn test_view_after_migration_still_consistent() {
        let t = table();
        for i in 1..=50u64 {
            t.put(Hv::new(0, i), i as i64);
        }
        for i in 1..=50u64 {
            t.put(Hv::new(0, i), (i as i64) * 10);
        }
        let mut items: Vec<i64> = t.view(false).into_iter().map(|(v, _)| v).collect();
        items.sort();
        let mut expected: Vec<i64> = (1..=50u64).map(|i| (i as i64) * 10).collect();
        expected.sort();
        assert_eq!(items, expected);
    }

    #[test]
    fn test_parallel_puts_converge() {
        use std::sync::Arc;
        use std::thread;

        let t = Arc::new(table());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let t = t.clone();
            handles.push(thread::spawn(move || {
                for i in 0..300u64 {
                    t.put(Hv::new(0, i), i as i64);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.len(), 300);
        for i in 0..300u64 {
            assert_eq!(t.get(Hv::new(0, i)), (Some(i as i64), true));
        }
    }
}
