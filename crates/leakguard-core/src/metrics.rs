//! Atomic counters for tracker observability.
//!
//! All counters use relaxed ordering; they are advisory counters,
//! not synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-tracker operation counters.
#[derive(Debug)]
pub struct TrackerMetrics {
    /// Blocks handed to the application (allocate + zeroed-allocate).
    pub allocated_blocks: AtomicU64,
    /// Blocks released back through `release`.
    pub released_blocks: AtomicU64,
    /// Blocks moved through `resize`.
    pub resized_blocks: AtomicU64,
    /// Payload bytes handed out.
    pub allocated_bytes: AtomicU64,
    /// Payload bytes released.
    pub released_bytes: AtomicU64,
}

impl TrackerMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocated_blocks: AtomicU64::new(0),
            released_blocks: AtomicU64::new(0),
            resized_blocks: AtomicU64::new(0),
            allocated_bytes: AtomicU64::new(0),
            released_bytes: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_allocate(&self, bytes: usize) {
        self.allocated_blocks.fetch_add(1, Ordering::Relaxed);
        self.allocated_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self, bytes: usize) {
        self.released_blocks.fetch_add(1, Ordering::Relaxed);
        self.released_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_resize(&self, old_bytes: usize, new_bytes: usize) {
        self.resized_blocks.fetch_add(1, Ordering::Relaxed);
        self.allocated_bytes.fetch_add(new_bytes as u64, Ordering::Relaxed);
        self.released_bytes.fetch_add(old_bytes as u64, Ordering::Relaxed);
    }

    /// Snapshot all counters into plain values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocated_blocks: self.allocated_blocks.load(Ordering::Relaxed),
            released_blocks: self.released_blocks.load(Ordering::Relaxed),
            resized_blocks: self.resized_blocks.load(Ordering::Relaxed),
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            released_bytes: self.released_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for TrackerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the tracker counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub allocated_blocks: u64,
    pub released_blocks: u64,
    pub resized_blocks: u64,
    pub allocated_bytes: u64,
    pub released_bytes: u64,
}

impl MetricsSnapshot {
    /// Blocks currently alive: allocations issued minus releases completed.
    #[must_use]
    pub fn live_blocks(&self) -> u64 {
        self.allocated_blocks - self.released_blocks
    }

    /// Payload bytes currently alive. Resize retires the old extent's bytes
    /// and charges the new extent's, so this tracks the live set exactly.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.allocated_bytes - self.released_bytes
    }
}
