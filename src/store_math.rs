//! Store sizing and probing arithmetic shared by every store shape in the crate.
//!
//! Grounded on the distilled store contracts: bucket index is a mask over the fingerprint's low
//! half, the resize threshold is a fixed fraction of the store size, and successor sizing is
//! either "fit the live count" or, under the wait-free help protocol, "double unconditionally".
use crate::fingerprint::Hv;

/// Bucket index for `hv` within a store whose size is `last_slot + 1`.
#[inline]
pub(crate) fn bucket_index(hv: Hv, last_slot: usize) -> usize {
    hv.bucket_index(last_slot)
}

/// Next bucket index when probing wraps linearly around the store.
#[inline]
pub(crate) fn next_index(bix: usize, last_slot: usize) -> usize {
    (bix + 1) & last_slot
}

/// ~75% of `size`, computed once per store and never revisited.
#[inline]
pub(crate) fn compute_threshold(size: usize) -> usize {
    size - (size >> 2)
}

/// Size of a migration's successor store.
///
/// Ordinarily a power of two at least `2 * live_count`, floored at `min_size`. When the wait-free
/// help protocol is active (`help_needed > 0`), the fitted computation is skipped entirely and the
/// store unconditionally doubles: this bounds the number of migrations any single writer can be
/// forced through before its operation linearizes.
pub(crate) fn new_size(old_size: usize, live_count: usize, min_size: usize, help_active: bool) -> usize {
    if help_active {
        return old_size.checked_mul(2).expect("store size overflow");
    }
    crate::util::next_pow2_at_least(live_count.saturating_mul(2).max(1), min_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_threshold() {
        assert_eq!(compute_threshold(16), 12);
        assert_eq!(compute_threshold(1024), 768);
    }

    #[test]
    fn test_next_index_wraps() {
        assert_eq!(next_index(15, 15), 0);
        assert_eq!(next_index(3, 15), 4);
    }

    #[test]
    fn test_new_size_fits_live_count() {
        assert_eq!(new_size(16, 5, 16, false), 16);
        assert_eq!(new_size(16, 20, 16, false), 64);
    }

    #[test]
    fn test_new_size_doubles_when_help_active() {
        assert_eq!(new_size(16, 1, 16, true), 32);
        assert_eq!(new_size(1024, 1, 16, true), 2048);
    }
}
