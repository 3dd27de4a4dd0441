//! 128-bit key fingerprints.
//!
//! Tables in this crate never store or compare keys directly: a key is represented only by its
//! 128-bit hash. Identity is the hash. Callers are responsible for producing a deterministic,
//! well-distributed fingerprint (e.g. a 128-bit XXH3 digest) before calling any dictionary
//! operation; see `src/bin/bench.rs` for a worked example using the `xxhash-rust` crate.
use std::fmt;

/// A 128-bit opaque fingerprint identifying a key.
///
/// The all-zero fingerprint (`Hv::UNUSED`) is reserved to mean "this bucket has never held a
/// key"; callers must never produce it for a real key (a well-distributed 128-bit hash makes
/// colliding with all-zero astronomically unlikely, and the crate does not guard against it
/// beyond this documentation).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(C)]
pub struct Hv {
    pub hi: u64,
    pub lo: u64,
}

impl Hv {
    /// The reserved "bucket unused" sentinel.
    pub const UNUSED: Hv = Hv { hi: 0, lo: 0 };

    #[inline]
    pub const fn new(hi: u64, lo: u64) -> Self {
        Hv { hi, lo }
    }

    #[inline]
    pub fn is_unused(&self) -> bool {
        *self == Hv::UNUSED
    }

    /// Initial bucket index within a store of `last_slot + 1` buckets: `lo & last_slot`.
    #[inline]
    pub fn bucket_index(&self, last_slot: usize) -> usize {
        (self.lo as usize) & last_slot
    }
}

impl fmt::Debug for Hv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hv({:016x}{:016x})", self.hi, self.lo)
    }
}

#[cfg(test)]
mod test {
    #[test]
    fn test_unused_is_zero() {
        use super::Hv;
        assert!(Hv::UNUSED.is_unused());
        assert!(!Hv::new(0, 1).is_unused());
    }

    #[test]
    fn test_bucket_index_masks() {
        use super::Hv;
        let hv = Hv::new(0, 0b1011_0111);
        assert_eq!(hv.bucket_index(0b1111), 0b0111);
    }
}
