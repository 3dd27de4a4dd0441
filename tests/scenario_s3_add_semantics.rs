//! S3 (add semantics): `add` only ever claims an absent-or-tombstoned key. A second `add`
//! against the same live key must fail and leave the original value untouched; removing the
//! key and re-`add`ing succeeds and takes the new value.
mod common;
use common::{for_each_variant, hash_key};

#[test]
fn test_s3_add_only_claims_absent_keys() {
    for_each_variant(|name, table| {
        for i in 1..=100u64 {
            assert!(table.add(hash_key(i), i), "{name}: first add of {i} should succeed");
        }

        for i in 1..=100u64 {
            assert!(!table.add(hash_key(i), i + 1000), "{name}: re-add of live key {i} should fail");
            assert_eq!(table.get(hash_key(i)), (Some(i), true), "{name}: key {i} unchanged by failed add");
        }

        for i in 1..=100u64 {
            table.remove(hash_key(i));
        }

        for i in 1..=100u64 {
            assert!(table.add(hash_key(i), i + 1), "{name}: add over removed key {i} should succeed");
            assert_eq!(table.get(hash_key(i)), (Some(i + 1), true), "{name}: key {i} holds new value");
        }
        assert_eq!(table.len(), 100, "{name}");
    });
}
