//! S2 (ordering): put 1..=100, remove 1..=50, put 1..=100 again. The second batch of 1..=50
//! re-enters at later epochs than 51..=100's untouched original insert, so a sorted view puts
//! 51..=100 first.
mod common;
use common::{for_each_variant, hash_key};

#[test]
fn test_s2_reinsertion_reorders_by_create_epoch() {
    for_each_variant(|name, table| {
        for i in 1..=100u64 {
            table.put(hash_key(i), i);
        }
        for i in 1..=50u64 {
            table.remove(hash_key(i));
        }
        for i in 1..=100u64 {
            table.put(hash_key(i), i);
        }

        let items: Vec<u64> = table.view(true).into_iter().map(|(v, _)| v).collect();
        let expected: Vec<u64> = (51..=100).chain(1..=50).collect();
        assert_eq!(items, expected, "{name}");
    });
}
