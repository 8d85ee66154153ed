//! Advisory memory manager and temp-space accounting.
//!
//! The memory manager reports an advisory ceiling; nothing here reserves or
//! enforces anything. The space tracker counts bytes of on-disk scratch data
//! so tests and operators can observe that sorters return their temp space.
//!
//! Counters use relaxed atomics: they are pure accounting and never
//! establish ordering for other shared state. Over-release is a bug and is
//! caught by a debug assertion.
//!
//! Both types have a process-wide default, but every consumer takes an
//! explicit handle so tests can inject their own instances.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Default advisory memory ceiling (512 MiB).
pub const DEFAULT_MEMORY_LIMIT: u64 = 512 * 1024 * 1024;

/// Advisory memory budget source.
///
/// Consumers read `available_bytes` once at sizing time; no lock is held
/// across any operation.
#[derive(Debug)]
pub struct MemoryManager {
    limit: AtomicU64,
}

impl MemoryManager {
    /// Creates a manager with the given advisory limit.
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit: AtomicU64::new(limit),
        }
    }

    /// Bytes the process should consider itself allowed to use.
    #[inline]
    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    /// Adjusts the advisory limit.
    pub fn set_limit(&self, limit: u64) {
        self.limit.store(limit, Ordering::Relaxed);
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_LIMIT)
    }
}

/// Process-wide default memory manager.
pub fn global_memory() -> &'static MemoryManager {
    static GLOBAL: OnceLock<MemoryManager> = OnceLock::new();
    GLOBAL.get_or_init(MemoryManager::default)
}

/// Counter for bytes of scratch data currently on disk.
#[derive(Debug, Default)]
pub struct SpaceTracker {
    used: AtomicU64,
}

impl SpaceTracker {
    /// Creates a tracker at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `bytes` of new scratch data.
    pub fn add(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records removal of `bytes` of scratch data.
    pub fn sub(&self, bytes: u64) {
        let prev = self.used.fetch_sub(bytes, Ordering::Relaxed);
        debug_assert!(prev >= bytes, "temp-space accounting went negative");
    }

    /// Scratch bytes currently accounted for.
    #[inline]
    #[must_use]
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }
}

/// Process-wide default temp-space tracker.
pub fn temp_space() -> Arc<SpaceTracker> {
    static GLOBAL: OnceLock<Arc<SpaceTracker>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(SpaceTracker::new())).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_reports_and_updates_limit() {
        let manager = MemoryManager::new(1024);
        assert_eq!(manager.available_bytes(), 1024);
        manager.set_limit(2048);
        assert_eq!(manager.available_bytes(), 2048);
    }

    #[test]
    fn tracker_balances_to_zero() {
        let tracker = SpaceTracker::new();
        tracker.add(100);
        tracker.add(50);
        assert_eq!(tracker.used(), 150);
        tracker.sub(100);
        tracker.sub(50);
        assert_eq!(tracker.used(), 0);
    }
}
