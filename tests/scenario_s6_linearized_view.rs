//! S6 (linearized view): a `Consistent`-mode view taken mid-write must reflect some single
//! point in the table's history, never a mix of two. Two angles, since epoch numbers
//! themselves aren't part of the public surface: a single-threaded exact-prefix check, and a
//! concurrent check that a linearized view never reports the same key twice.
mod common;
use common::{for_each_linearized_variant, hash_key};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_s6_sorted_view_is_an_exact_prefix_in_time() {
    for_each_linearized_variant(|name, table| {
        for i in 1..=20u64 {
            table.put(hash_key(i), i);
        }
        for i in 1..=10u64 {
            table.remove(hash_key(i));
        }
        for i in 21..=30u64 {
            table.put(hash_key(i), i);
        }

        let items: Vec<u64> = table.view(true).into_iter().map(|(v, _)| v).collect();
        let expected: Vec<u64> = (11..=30).collect();
        assert_eq!(items, expected, "{name}: sorted view is an exact history prefix");
    });
}

#[test]
fn test_s6_consistent_view_never_duplicates_a_key_under_concurrent_writes() {
    for_each_linearized_variant(|name, table| {
        for i in 0..200u64 {
            table.put(hash_key(i), i);
        }

        let table = Arc::new(table);
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let table = Arc::clone(&table);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    for i in 0..200u64 {
                        table.remove(hash_key(i));
                        table.put(hash_key(i), i);
                    }
                }
            })
        };

        for _ in 0..50 {
            let snapshot: Vec<u64> = table.view(false).into_iter().map(|(v, _)| v).collect();
            let unique: HashSet<u64> = snapshot.iter().copied().collect();
            assert_eq!(
                unique.len(),
                snapshot.len(),
                "{name}: a linearized view must not report a key twice"
            );
            thread::sleep(Duration::from_micros(200));
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().expect("writer thread panicked");
    });
}
