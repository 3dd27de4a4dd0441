//! User-mode spin lock.
//!
//! Reworked from the original, which reached `lock`/`unlock` through `&mut self` and a nightly
//! `intrinsics::atomic_cxchg`. Locked table variants share one `SpinLock` per bucket across every
//! thread that might touch it concurrently, so it has to be usable behind a plain `&self`; the
//! CAS moves to a stable `AtomicBool`.
use crate::util::pause;
use std::sync::atomic::{AtomicBool, Ordering};

/// User mode spin lock.
pub struct SpinLock {
    locked: AtomicBool,
}

impl Default for SpinLock {
    fn default() -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
        }
    }
}

impl SpinLock {
    /// Keep trying to lock until success.
    pub fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.is_locked() {
                pause();
            }
        }
    }

    /// Keep trying to lock until success, then return a guard that unlocks on drop.
    pub fn lock_guard(&self) -> SpinLockGuard<'_> {
        self.lock();
        SpinLockGuard { spin_lock: self }
    }

    /// Unlock if locked, else panic.
    pub fn unlock(&self) {
        let was_locked = self.locked.swap(false, Ordering::Release);
        assert!(was_locked, "unlock called on a SpinLock that was not held");
    }

    /// Return true if locked.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Return true if locked successfully.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Non-blocking version of [`SpinLock::lock_guard`]; `None` if already held. The adaptive
    /// table's contention detection (`crate::adaptive`) is built entirely on this: a writer that
    /// finds the reference table's lock already taken knows a second writer has shown up.
    pub fn try_lock_guard(&self) -> Option<SpinLockGuard<'_>> {
        if self.try_lock() {
            Some(SpinLockGuard { spin_lock: self })
        } else {
            None
        }
    }
}

/// Guard of a [`SpinLock`]; unlocks it when dropped.
pub struct SpinLockGuard<'a> {
    spin_lock: &'a SpinLock,
}

impl<'a> Drop for SpinLockGuard<'a> {
    fn drop(&mut self) {
        self.spin_lock.unlock();
    }
}

#[cfg(test)]
mod test {
    #[test]
    fn test_spin_lock() {
        use super::SpinLock;
        let lock = SpinLock::default();
        lock.lock();
        assert!(lock.is_locked());
        lock.unlock();
        assert!(!lock.is_locked());

        {
            let _guard = lock.lock_guard();
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_try_lock_fails_when_held() {
        use super::SpinLock;
        let lock = SpinLock::default();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
    }
}
