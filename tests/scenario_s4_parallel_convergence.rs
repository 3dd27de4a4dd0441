//! S4 (parallel convergence): several threads each put the same key range; once joined, the
//! table must agree with every thread on every key and report the right count.
mod common;
use common::{for_each_variant, hash_key};
use std::sync::Arc;
use std::thread;

const THREADS: u64 = 8;
const MAX_KEY: u64 = 500;

#[test]
fn test_s4_parallel_put_converges() {
    for_each_variant(|name, table| {
        let table = Arc::new(table);
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..=MAX_KEY {
                        table.put(hash_key(i), i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker thread panicked");
        }

        for i in 0..=MAX_KEY {
            assert_eq!(table.get(hash_key(i)), (Some(i), true), "{name}: key {i} after convergence");
        }
        assert_eq!(table.len(), MAX_KEY + 1, "{name}");
    });
}
