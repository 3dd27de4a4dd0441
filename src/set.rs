//! Set algebra atop the ordered lock-free table (§4.6).
//!
//! [`Set<T>`] wraps a [`LockFreeOrderedTable<T>`] and adds the cross-set operations a dictionary
//! alone can't express: equality, subset/superset, disjointness, union, intersection, difference,
//! disjunction. Each `Set` is independently linearized at its own most recent epoch when a cross-set
//! op snapshots it — there is no joint epoch across two distinct tables, since each owns its own SMR.
//! Two sets each number their own inserts from epoch 1, so `sort_epoch` is only meaningful within
//! one `Set`'s own entries; it carries no information across a pair of sets. Every cross-set
//! algorithm therefore sorts both operand views by fingerprint and merges them in one pass,
//! including [`Set::union`], whose output is ordered by fingerprint rather than by either
//! operand's insertion history.
use crate::config::Config;
use crate::dict::Table;
use crate::fingerprint::Hv;
use crate::lockfree::LockFreeOrderedTable;
use crate::view::sort_keyed_by_hv;

pub struct Set<T> {
    table: LockFreeOrderedTable<T>,
}

impl<T: Clone> Set<T> {
    pub fn new(config: &Config) -> Self {
        Set {
            table: LockFreeOrderedTable::new(config),
        }
    }

    pub fn contains(&self, hv: Hv) -> bool {
        self.table.get(hv).1
    }

    pub fn put(&self, hv: Hv, item: T) -> (Option<T>, bool) {
        self.table.put(hv, item)
    }

    pub fn add(&self, hv: Hv, item: T) -> bool {
        self.table.add(hv, item)
    }

    pub fn remove(&self, hv: Hv) -> (Option<T>, bool) {
        self.table.remove(hv)
    }

    pub fn len(&self) -> u64 {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Possibly-unordered snapshot of every item currently in the set.
    pub fn items(&self) -> Vec<T> {
        self.table.view(false).into_iter().map(|(item, _)| item).collect()
    }

    /// Snapshot ordered by insertion (`sort_epoch`, i.e. `create_epoch`).
    pub fn items_sort(&self) -> Vec<T> {
        self.table.view(true).into_iter().map(|(item, _)| item).collect()
    }

    fn keyed_sorted_by_hv(&self) -> Vec<(Hv, T, u64)> {
        sort_keyed_by_hv(self.table.view_keyed(false))
    }

    /// Same membership as `other`: both sets hold exactly the same keys.
    pub fn is_eq(&self, other: &Set<T>) -> bool {
        let merged = merge_by_hv(self.keyed_sorted_by_hv(), other.keyed_sorted_by_hv());
        merged.only_left.is_empty() && merged.only_right.is_empty()
    }

    /// Whether every key in `self` is also in `other`. `proper` additionally requires `other` to
    /// hold at least one key `self` doesn't.
    pub fn is_subset(&self, other: &Set<T>, proper: bool) -> bool {
        let merged = merge_by_hv(self.keyed_sorted_by_hv(), other.keyed_sorted_by_hv());
        merged.only_left.is_empty() && (!proper || !merged.only_right.is_empty())
    }

    /// Whether every key in `other` is also in `self`. `proper` additionally requires `self` to
    /// hold at least one key `other` doesn't.
    pub fn is_superset(&self, other: &Set<T>, proper: bool) -> bool {
        other.is_subset(self, proper)
    }

    /// Whether `self` and `other` share no keys.
    pub fn is_disjoint(&self, other: &Set<T>) -> bool {
        let merged = merge_by_hv(self.keyed_sorted_by_hv(), other.keyed_sorted_by_hv());
        merged.both.is_empty()
    }

    /// Keys in `self` but not in `other`.
    pub fn difference(&self, other: &Set<T>) -> Vec<T> {
        let merged = merge_by_hv(self.keyed_sorted_by_hv(), other.keyed_sorted_by_hv());
        merged.only_left.into_iter().map(|(_, item, _)| item).collect()
    }

    /// Keys present in both `self` and `other`, with `self`'s item for each.
    pub fn intersection(&self, other: &Set<T>) -> Vec<T> {
        let merged = merge_by_hv(self.keyed_sorted_by_hv(), other.keyed_sorted_by_hv());
        merged.both.into_iter().map(|(_, item, _)| item).collect()
    }

    /// Every key in either set, each exactly once, ordered by fingerprint. The two operands'
    /// `create_epoch`s come from independent SMR clocks and aren't comparable, so this is not
    /// an insertion-order merge — just a deterministic one.
    pub fn union(&self, other: &Set<T>) -> Vec<T> {
        let merged = merge_by_hv(self.keyed_sorted_by_hv(), other.keyed_sorted_by_hv());
        let mut all: Vec<(Hv, T, u64)> = Vec::with_capacity(merged.only_left.len() + merged.only_right.len() + merged.both.len());
        all.extend(merged.only_left);
        all.extend(merged.only_right);
        all.extend(merged.both);
        sort_keyed_by_hv(all).into_iter().map(|(_, item, _)| item).collect()
    }

    /// Keys in exactly one of the two sets (symmetric difference).
    pub fn disjunction(&self, other: &Set<T>) -> Vec<T> {
        let merged = merge_by_hv(self.keyed_sorted_by_hv(), other.keyed_sorted_by_hv());
        merged
            .only_left
            .into_iter()
            .chain(merged.only_right)
            .map(|(_, item, _)| item)
            .collect()
    }
}

struct Merged<T> {
    only_left: Vec<(Hv, T, u64)>,
    only_right: Vec<(Hv, T, u64)>,
    /// Keys present in both operands, carrying the left operand's entry.
    both: Vec<(Hv, T, u64)>,
}

/// Merge-join two fingerprint-sorted snapshots in one linear pass.
fn merge_by_hv<T>(left: Vec<(Hv, T, u64)>, right: Vec<(Hv, T, u64)>) -> Merged<T> {
    let mut li = left.into_iter().peekable();
    let mut ri = right.into_iter().peekable();
    let mut only_left = Vec::new();
    let mut only_right = Vec::new();
    let mut both = Vec::new();
    loop {
        match (li.peek(), ri.peek()) {
            (Some(l), Some(r)) => {
                let key = (l.0.hi, l.0.lo).cmp(&(r.0.hi, r.0.lo));
                match key {
                    std::cmp::Ordering::Less => only_left.push(li.next().unwrap()),
                    std::cmp::Ordering::Greater => only_right.push(ri.next().unwrap()),
                    std::cmp::Ordering::Equal => {
                        both.push(li.next().unwrap());
                        ri.next();
                    }
                }
            }
            (Some(_), None) => only_left.push(li.next().unwrap()),
            (None, Some(_)) => only_right.push(ri.next().unwrap()),
            (None, None) => break,
        }
    }
    Merged { only_left, only_right, both }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> Set<i64> {
        Set::new(&Config::default().with_min_store_size(4))
    }

    #[test]
    fn test_contains_and_put() {
        let s = set();
        assert!(!s.contains(Hv::new(0, 1)));
        s.put(Hv::new(0, 1), 10);
        assert!(s.contains(Hv::new(0, 1)));
    }

    #[test]
    fn test_is_eq() {
        let a = set();
        let b = set();
        for i in 1..=5u64 {
            a.put(Hv::new(0, i), i as i64);
            b.put(Hv::new(0, i), (i * 100) as i64);
        }
        assert!(a.is_eq(&b), "equality is by key, not by stored item");
        b.remove(Hv::new(0, 5));
        assert!(!a.is_eq(&b));
    }

    #[test]
    fn test_subset_superset() {
        let a = set();
        let b = set();
        for i in 1..=3u64 {
            a.put(Hv::new(0, i), i as i64);
        }
        for i in 1..=5u64 {
            b.put(Hv::new(0, i), i as i64);
        }
        assert!(a.is_subset(&b, false));
        assert!(a.is_subset(&b, true));
        assert!(b.is_superset(&a, true));
        assert!(!b.is_subset(&a, false));
        assert!(a.is_subset(&a, false));
        assert!(!a.is_subset(&a, true), "a set is never a proper subset of itself");
    }

    #[test]
    fn test_disjoint() {
        let a = set();
        let b = set();
        a.put(Hv::new(0, 1), 1);
        b.put(Hv::new(1, 1), 1);
        assert!(a.is_disjoint(&b));
        b.put(Hv::new(0, 1), 1);
        assert!(!a.is_disjoint(&b));
    }

    #[test]
    fn test_union_intersection_difference_disjunction() {
        let a = set();
        let b = set();
        for i in 1..=5u64 {
            a.put(Hv::new(0, i), i as i64);
        }
        for i in 3..=8u64 {
            b.put(Hv::new(0, i), i as i64);
        }

        let mut union: Vec<i64> = a.union(&b);
        union.sort();
        assert_eq!(union, (1..=8).collect::<Vec<_>>());

        let mut inter: Vec<i64> = a.intersection(&b);
        inter.sort();
        assert_eq!(inter, vec![3, 4, 5]);

        let mut diff: Vec<i64> = a.difference(&b);
        diff.sort();
        assert_eq!(diff, vec![1, 2]);

        let mut disj: Vec<i64> = a.disjunction(&b);
        disj.sort();
        assert_eq!(disj, vec![1, 2, 6, 7, 8]);
    }

    #[test]
    fn test_union_orders_by_fingerprint_not_by_either_operands_epoch() {
        let a = set();
        let b = set();
        // b's entries get lower create_epochs than a's despite being inserted after — the two
        // sets' epoch clocks are independent. Union must still come out in Hv order, (1,2,3,4)
        // here, not group by which set an entry came from.
        a.put(Hv::new(0, 1), 1);
        a.put(Hv::new(0, 2), 2);
        b.put(Hv::new(0, 3), 3);
        b.put(Hv::new(0, 4), 4);
        assert_eq!(a.union(&b), vec![1, 2, 3, 4]);
    }
}
