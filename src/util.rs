//! Small shared helpers used throughout the crate.
use std::ops::{Deref, DerefMut};

/// Pads/aligns the wrapped value to a full cache line (64 bytes on every target this crate
/// cares about) so that independently-hot fields belonging to different threads do not share a
/// cache line ([`False sharing`](https://en.wikipedia.org/wiki/False_sharing)).
#[repr(align(64))]
pub struct WrappedAlign64Type<T>(pub T);

impl<T> Default for WrappedAlign64Type<T>
where
    T: Default,
{
    fn default() -> Self {
        WrappedAlign64Type(T::default())
    }
}

impl<T> Deref for WrappedAlign64Type<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for WrappedAlign64Type<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Yield the core to a sibling hyperthread without yielding the OS scheduler quantum. Used on
/// every spin-retry loop in the crate: bucket CAS retries, spin-lock acquisition, migration
/// helper spins.
#[inline]
pub fn pause() {
    std::hint::spin_loop();
}

/// Rounds `n` up to the next power of two, never returning less than `min` (which must itself
/// already be a power of two, e.g. `Config::min_store_size`).
///
/// # Panics
///
/// Panics if the result would not fit in a `usize`. Per the crate's error taxonomy (see
/// `error::Status`), a requested size that cannot be represented as a power of two is a fatal,
/// unrecoverable programmer/caller fault, not a condition tables retry around.
pub fn next_pow2_at_least(n: usize, min: usize) -> usize {
    let mut size = min.next_power_of_two().max(1);
    while size < n {
        size = size
            .checked_shl(1)
            .expect("requested store size exceeds representable power of two");
    }
    size
}

#[cfg(test)]
mod test {
    #[test]
    fn test_next_pow2_at_least() {
        use super::next_pow2_at_least;
        assert_eq!(next_pow2_at_least(1, 16), 16);
        assert_eq!(next_pow2_at_least(16, 16), 16);
        assert_eq!(next_pow2_at_least(17, 16), 32);
        assert_eq!(next_pow2_at_least(100, 4), 128);
    }

    #[test]
    fn test_wrapped_align_64() {
        use super::WrappedAlign64Type;
        let w: WrappedAlign64Type<u64> = WrappedAlign64Type(5);
        assert_eq!(*w, 5);
        assert_eq!(std::mem::align_of::<WrappedAlign64Type<u64>>(), 64);
    }
}
