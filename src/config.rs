//! Crate-wide configuration, recognized by every table constructor.
use crate::smr::MAX_THREAD_COUNT;

/// Whether `view()` must deliver a single-epoch-linearized snapshot or may return a faster,
/// possibly-inconsistent enumeration.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ViewMode {
    /// Walk buckets without synchronizing against a single epoch. Cheaper, but a concurrent
    /// writer may cause the same key to appear zero or more than once, or a just-removed key to
    /// still appear, in the returned vector.
    Fast,
    /// Take an SMR linearized-op reservation first and only emit records committed at or before
    /// that epoch. Every returned snapshot corresponds to a real, single point in the table's
    /// history.
    Consistent,
}

/// Which concurrent backend the adaptive table migrates into the first time it observes
/// contention.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AdaptiveTarget {
    LockedUnordered,
    LockedOrdered,
    LockFreeUnordered,
    LockFreeOrdered,
}

/// Configuration shared by every table variant.
///
/// Constructed with [`Config::default`] or via the builder methods, mirroring the small,
/// chained-setter configuration style used throughout this crate's sibling collections.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    min_store_size: usize,
    retry_threshold: u32,
    max_threads: usize,
    view_mode: ViewMode,
    adaptive_target: AdaptiveTarget,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            min_store_size: 16,
            retry_threshold: 8,
            max_threads: MAX_THREAD_COUNT,
            view_mode: ViewMode::Fast,
            adaptive_target: AdaptiveTarget::LockFreeOrdered,
        }
    }
}

impl Config {
    /// Minimum store size a table (and every migration target) will ever allocate. Rounded up to
    /// a power of two at use.
    pub fn with_min_store_size(mut self, min_store_size: usize) -> Self {
        assert!(min_store_size > 0, "min_store_size must be positive");
        self.min_store_size = min_store_size;
        self
    }

    /// Number of migrate-and-retry cycles a lock-free writer tolerates before raising
    /// `help_needed`, forcing the next migration to unconditionally double the store instead of
    /// fitting it to the live count. Not load-bearing for correctness; any small positive value
    /// gives the same wait-free bound.
    pub fn with_retry_threshold(mut self, retry_threshold: u32) -> Self {
        assert!(retry_threshold > 0, "retry_threshold must be positive");
        self.retry_threshold = retry_threshold;
        self
    }

    /// Upper bound on the number of threads that may hold an SMR registration at once. Must not
    /// exceed the compiled-in `MAX_THREAD_COUNT` (selected via the `max_thread_count_*`
    /// features).
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        assert!(
            max_threads <= MAX_THREAD_COUNT,
            "max_threads ({}) exceeds compiled-in MAX_THREAD_COUNT ({})",
            max_threads,
            MAX_THREAD_COUNT
        );
        assert!(max_threads > 0, "max_threads must be positive");
        self.max_threads = max_threads;
        self
    }

    pub fn with_view_mode(mut self, view_mode: ViewMode) -> Self {
        self.view_mode = view_mode;
        self
    }

    pub fn with_adaptive_target(mut self, adaptive_target: AdaptiveTarget) -> Self {
        self.adaptive_target = adaptive_target;
        self
    }

    pub fn min_store_size(&self) -> usize {
        self.min_store_size
    }

    pub fn retry_threshold(&self) -> u32 {
        self.retry_threshold
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn adaptive_target(&self) -> AdaptiveTarget {
        self.adaptive_target
    }
}

#[cfg(test)]
mod test {
    #[test]
    fn test_default_config() {
        use super::Config;
        let c = Config::default();
        assert_eq!(c.min_store_size(), 16);
        assert_eq!(c.retry_threshold(), 8);
    }

    #[test]
    fn test_builder_chaining() {
        use super::{AdaptiveTarget, Config, ViewMode};
        let c = Config::default()
            .with_min_store_size(64)
            .with_retry_threshold(4)
            .with_view_mode(ViewMode::Consistent)
            .with_adaptive_target(AdaptiveTarget::LockedOrdered);
        assert_eq!(c.min_store_size(), 64);
        assert_eq!(c.retry_threshold(), 4);
        assert_eq!(c.view_mode(), ViewMode::Consistent);
        assert_eq!(c.adaptive_target(), AdaptiveTarget::LockedOrdered);
    }

    #[test]
    #[should_panic]
    fn test_max_threads_over_limit_panics() {
        use super::Config;
        let _ = Config::default().with_max_threads(usize::MAX);
    }
}
