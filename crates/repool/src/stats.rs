//! Per-manager counters and the teardown report.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one shard. Updated with relaxed atomics; exact ordering
/// between counters is not part of any snapshot guarantee.
#[derive(Debug, Default)]
pub(crate) struct ShardCounters {
    /// Buffers requested through this shard.
    pub(crate) requests: AtomicU64,
    /// Buffers returned through this shard.
    pub(crate) releases: AtomicU64,
    /// Requests served from the free list.
    pub(crate) recycled: AtomicU64,
    /// Requests that created a new buffer.
    pub(crate) created: AtomicU64,
    /// Allocation failures recovered by a global drain and retry.
    pub(crate) oom_retries: AtomicU64,
    /// Release hints that named the wrong shard.
    pub(crate) bad_hints: AtomicU64,
    /// Buffers handed back to the backing allocator by cleanups.
    pub(crate) cleaned: AtomicU64,
}

/// Aggregated counter snapshot for one buffer manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Buffers requested from the manager.
    pub requests: u64,
    /// Buffers released back to the manager.
    pub releases: u64,
    /// Requests served by reusing a free buffer.
    pub recycled: u64,
    /// Requests that had to create a new buffer.
    pub created: u64,
    /// Allocation failures recovered by a global drain and retry.
    pub oom_retries: u64,
    /// Release hints that named the wrong shard.
    pub bad_hints: u64,
    /// Buffers handed back to the backing allocator by cleanups.
    pub cleaned: u64,
    /// Buffers currently handed out.
    pub in_use: u64,
    /// Buffers currently sitting in free lists.
    pub free: u64,
}

impl ManagerStats {
    /// Fraction of requests served by reuse (0.0 - 1.0).
    pub fn recycle_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.recycled as f64 / self.requests as f64
        }
    }

    pub(crate) fn absorb(&mut self, counters: &ShardCounters) {
        self.requests += counters.requests.load(Ordering::Relaxed);
        self.releases += counters.releases.load(Ordering::Relaxed);
        self.recycled += counters.recycled.load(Ordering::Relaxed);
        self.created += counters.created.load(Ordering::Relaxed);
        self.oom_retries += counters.oom_retries.load(Ordering::Relaxed);
        self.bad_hints += counters.bad_hints.load(Ordering::Relaxed);
        self.cleaned += counters.cleaned.load(Ordering::Relaxed);
    }
}

/// Emit the one-line-per-metric teardown summary for a manager.
///
/// Managers that never saw traffic stay silent.
#[cfg(feature = "teardown-report")]
pub(crate) fn report_teardown(
    element: &'static str,
    backing: &'static str,
    stats: &ManagerStats,
    still_in_use: u64,
) {
    if stats.requests == 0 && stats.recycled == 0 && stats.created == 0 && stats.oom_retries == 0 {
        return;
    }
    tracing::info!(
        element,
        backing,
        requests = stats.requests,
        recycled = stats.recycled,
        created = stats.created,
        oom_retries = stats.oom_retries,
        cleaned = stats.cleaned,
        bad_hints = stats.bad_hints,
        still_in_use,
        recycle_rate_pct = stats.recycle_rate() * 100.0,
        "buffer manager teardown"
    );
}
