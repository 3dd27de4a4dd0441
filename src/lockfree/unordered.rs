//! Lock-free table with a single tagged record slot per bucket (§4.5, unordered flavor).
//!
//! Writers never block: a bucket observed mid-migration (`MOVING`) is helped along by performing
//! the migration itself before retrying, bounding every operation to a small constant number of
//! migrate-and-retry cycles (the wait-free contract). `view()` has no history to linearize
//! against, so it reads the live slot of each bucket under a plain SMR reservation rather than a
//! linearized one: see [`crate::lockfree::common::view_fast`] for exactly what that does and does
//! not guarantee.
use crate::config::Config;
use crate::dict::Table;
use crate::fingerprint::Hv;
use crate::lockfree::common::{self, LockFreeCore};

pub struct LockFreeUnorderedTable<T> {
    core: LockFreeCore<T>,
}

impl<T> LockFreeUnorderedTable<T> {
    pub fn new(config: &Config) -> Self {
        LockFreeUnorderedTable {
            core: LockFreeCore::new(config),
        }
    }

    /// Build a table pre-populated from another backend's snapshot, continuing its epoch sequence.
    /// Used by `AdaptiveTable`'s one-shot migration so sort order stays monotonic across the
    /// transition.
    pub(crate) fn from_snapshot(config: &Config, next_epoch: u64, entries: Vec<(Hv, T, u64)>) -> Self {
        LockFreeUnorderedTable {
            core: LockFreeCore::from_snapshot(config, next_epoch, entries),
        }
    }
}

impl<T: Clone> Table<T> for LockFreeUnorderedTable<T> {
    fn get(&self, hv: Hv) -> (Option<T>, bool)
    where
        T: Clone,
    {
        common::do_get(&self.core, hv)
    }

    fn put(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        common::do_put(&self.core, hv, item, false)
    }

    fn replace(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        common::do_replace(&self.core, hv, item, false)
    }

    fn add(&self, hv: Hv, item: T) -> bool {
        common::do_add(&self.core, hv, item, false)
    }

    fn remove(&self, hv: Hv) -> (Option<T>, bool) {
        common::do_remove(&self.core, hv, false)
    }

    fn len(&self) -> u64 {
        self.core.len()
    }

    fn view(&self, sort: bool) -> Vec<(T, u64)>
    where
        T: Clone,
    {
        common::view_fast(&self.core, sort)
    }
}

impl<T> Drop for LockFreeUnorderedTable<T> {
    fn drop(&mut self) {
        self.core.drop_all_records();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LockFreeUnorderedTable<i64> {
        LockFreeUnorderedTable::new(&Config::default().with_min_store_size(4))
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
        assert_eq!(t.remove(Hv::new(0, 1)), (None, false));
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
    fn test_replace_only_if_present() {
        let t = table();
        assert_eq!(t.replace(Hv::new(0, 1), 1), (None, false));
        t.put(Hv::new(0, 1), 1);
        assert_eq!(t.replace(Hv::new(0, 1), 2), (Some(1), true));
    }

    #[test]
    fn test_grows_past_threshold() {
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

    #[test]
    fn test_parallel_put_and_remove_no_corruption() {
        use std::sync::Arc;
        use std::thread;

        let t = Arc::new(table());
        for i in 0..100u64 {
            t.put(Hv::new(0, i), i as i64);
        }
        let writer = {
            let t = t.clone();
            thread::spawn(move || {
                for i in 0..100u64 {
                    t.remove(Hv::new(0, i));
                    t.put(Hv::new(1, i), i as i64);
                }
            })
        };
        let reader = {
            let t = t.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let _ = t.view(false);
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        for i in 0..100u64 {
            assert_eq!(t.get(Hv::new(1, i)), (Some(i as i64), true));
        }
    }
}
