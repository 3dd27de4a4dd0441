//! The `(item, sort_epoch)` snapshot type every variant's `view()` returns, plus the shared sort.
use crate::fingerprint::Hv;

/// One entry in a table snapshot: the stored item and the epoch it should sort by
/// (`create_epoch`, so re-inserted keys retain their original ordering position).
pub type ViewEntry<T> = (T, u64);

/// Sort a raw view by `sort_epoch` ascending, matching every variant's `view(sort = true)`.
pub(crate) fn sort_by_epoch<T>(mut entries: Vec<ViewEntry<T>>) -> Vec<ViewEntry<T>> {
    entries.sort_by_key(|(_, epoch)| *epoch);
    entries
}

/// A view entry carrying its fingerprint too, used internally by set algebra (`crate::set`),
/// which must merge two tables' views by key rather than only by insertion order. Each `Set`
/// owns its own table and its own SMR epoch clock, so `sort_epoch` here is only comparable
/// within one table's entries — cross-set operations order by `Hv` instead.
pub(crate) type KeyedViewEntry<T> = (Hv, T, u64);

pub(crate) fn sort_keyed_by_hv<T>(mut entries: Vec<KeyedViewEntry<T>>) -> Vec<KeyedViewEntry<T>> {
    entries.sort_by(|a, b| (a.0.hi, a.0.lo).cmp(&(b.0.hi, b.0.lo)));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_by_epoch_orders_ascending() {
        let v = vec![(3, 30u64), (1, 10u64), (2, 20u64)];
        assert_eq!(sort_by_epoch(v), vec![(1, 10), (2, 20), (3, 30)]);
    }
}
