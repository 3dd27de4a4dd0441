//! S5 (migration under load): prefill a small table, then hammer it with concurrent writers
//! so an `AdaptiveTable` must migrate off its single-threaded fast path mid-run. Each writer
//! owns a disjoint slice of the key space, so the final state of every key is determined by
//! exactly one thread's local op sequence, no cross-thread race to reconcile.
mod common;
use common::{for_each_variant, hash_key};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

const THREADS: u64 = 8;
const KEYSPACE: u64 = 100;
const CYCLES_PER_KEY: u64 = 500;

/// Keys a third of the way around the ring are driven to end up absent; the rest end present.
fn ends_absent(key: u64) -> bool {
    key % 3 == 0
}

#[test]
fn test_s5_migration_under_concurrent_load() {
    for_each_variant(|name, table| {
        for key in 0..KEYSPACE {
            table.put(hash_key(key), key);
        }

        let table = Arc::new(table);
        let handles: Vec<_> = (0..THREADS)
            .map(|thread_id| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let mut key = thread_id;
                    while key < KEYSPACE {
                        for _ in 0..CYCLES_PER_KEY {
                            table.remove(hash_key(key));
                            table.put(hash_key(key), key);
                        }
                        if ends_absent(key) {
                            table.remove(hash_key(key));
                        }
                        key += THREADS;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker thread panicked");
        }

        let expected_present: HashSet<u64> = (0..KEYSPACE).filter(|k| !ends_absent(*k)).collect();
        for key in 0..KEYSPACE {
            let want = expected_present.contains(&key);
            assert_eq!(
                table.get(hash_key(key)),
                if want { (Some(key), true) } else { (None, false) },
                "{name}: key {key} final state"
            );
        }
        assert_eq!(table.len(), expected_present.len() as u64, "{name}: final len");

        let seen: HashSet<u64> = table.view(false).into_iter().map(|(v, _)| v).collect();
        assert_eq!(seen, expected_present, "{name}: view matches final state");
    });
}
