//! Sharded buffer manager, one per (element, backing allocator) pair.
//!
//! A manager splits its pool into [`SHARD_COUNT`](crate::SHARD_COUNT)
//! independently locked shards. Each shard tracks the buffers it handed
//! out in an in-use table and keeps released buffers in a free list,
//! most recently released first. Lookups scan the free list from the
//! front, so a shard always prefers the cache-warmest candidate of the
//! exact requested count; there is no best-fit or size-class rounding.
//!
//! Storage reuse works for any element type; aggressive (content-managed)
//! reuse is the [`BufferElement`]-gated subset.

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::backing::BackingAllocator;
use crate::element::BufferElement;
use crate::entry::BufferEntry;
use crate::error::{PoolError, Result};
use crate::stats::{ManagerStats, ShardCounters};
use crate::sync::PoolMutex;

struct ShardState<T> {
    /// Buffers currently handed out, keyed by base address.
    in_use: HashMap<usize, BufferEntry<T>>,
    /// Released buffers, most recently released first.
    free: VecDeque<BufferEntry<T>>,
}

struct Shard<T> {
    state: PoolMutex<ShardState<T>>,
    counters: ShardCounters,
}

impl<T> Shard<T> {
    fn new() -> Self {
        Self {
            state: PoolMutex::new(ShardState {
                in_use: HashMap::new(),
                free: VecDeque::new(),
            }),
            counters: ShardCounters::default(),
        }
    }
}

/// Pool of recyclable buffers for one (element, backing allocator) pair.
pub(crate) struct BufferManager<T, A: BackingAllocator<T>> {
    shards: Box<[Shard<T>]>,
    backing: A,
}

impl<T, A: BackingAllocator<T>> BufferManager<T, A> {
    pub(crate) fn new() -> Self {
        let shards = (0..crate::SHARD_COUNT)
            .map(|_| Shard::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            backing: A::default(),
        }
    }

    /// Hand out a buffer of exactly `count` uninitialized-storage
    /// elements; the caller constructs and destroys element values.
    pub(crate) fn acquire_plain(&self, count: usize, hint: Option<usize>) -> Result<NonNull<T>> {
        self.acquire_with(count, hint, BufferEntry::destroy_content)
    }

    /// Hand out a buffer of exactly `count` elements, reusing a free one
    /// when the hinted shard has a match.
    ///
    /// A missing hint is treated as shard 0; an out-of-range hint wraps.
    /// `reconcile` brings a candidate entry's content state in line with
    /// the requested mode before it is handed out; it also runs on
    /// freshly created entries, which start with dead content. When the
    /// backing allocator fails, every free list in the process is
    /// drained and the allocation is retried exactly once.
    fn acquire_with<F>(&self, count: usize, hint: Option<usize>, reconcile: F) -> Result<NonNull<T>>
    where
        F: Fn(&mut BufferEntry<T>),
    {
        assert!(count > 0, "buffer element count must be at least 1");
        let shard_index = hint.unwrap_or(0) % self.shards.len();
        let shard = &self.shards[shard_index];
        shard.counters.requests.fetch_add(1, Ordering::Relaxed);

        let mut state = shard.state.lock();
        if let Some(base) =
            Self::recycle_from_free(&mut state, &shard.counters, count, &reconcile)
        {
            return Ok(base);
        }

        match self.backing.allocate(count) {
            Ok(base) => Ok(Self::admit(
                &mut state,
                &shard.counters,
                base,
                count,
                shard_index,
                &reconcile,
            )),
            Err(_) => {
                // The shard lock must not be held while the recycler fans
                // out across every shard in the process.
                drop(state);
                tracing::warn!(
                    element = std::any::type_name::<T>(),
                    count,
                    "allocation failed, draining unused buffers and retrying"
                );
                crate::recycler::drain_all_free();

                let mut state = shard.state.lock();
                // A racing release may have repopulated the free list
                // while the lock was dropped.
                if let Some(base) =
                    Self::recycle_from_free(&mut state, &shard.counters, count, &reconcile)
                {
                    return Ok(base);
                }
                let base = self.backing.allocate(count)?;
                shard.counters.oom_retries.fetch_add(1, Ordering::Relaxed);
                Ok(Self::admit(
                    &mut state,
                    &shard.counters,
                    base,
                    count,
                    shard_index,
                    &reconcile,
                ))
            }
        }
    }

    /// Take an exact-count buffer back into circulation, reconciling its
    /// content state with the requested mode.
    fn recycle_from_free<F>(
        state: &mut ShardState<T>,
        counters: &ShardCounters,
        count: usize,
        reconcile: &F,
    ) -> Option<NonNull<T>>
    where
        F: Fn(&mut BufferEntry<T>),
    {
        let position = state.free.iter().position(|entry| entry.count() == count)?;
        let mut entry = state.free.remove(position)?;
        reconcile(&mut entry);

        let base = entry.base();
        state.in_use.insert(entry.addr(), entry);
        counters.recycled.fetch_add(1, Ordering::Relaxed);
        Some(base)
    }

    /// Track a freshly created buffer as handed out.
    fn admit<F>(
        state: &mut ShardState<T>,
        counters: &ShardCounters,
        base: NonNull<T>,
        count: usize,
        shard_index: usize,
        reconcile: &F,
    ) -> NonNull<T>
    where
        F: Fn(&mut BufferEntry<T>),
    {
        let mut entry = BufferEntry::new(base, count, shard_index);
        reconcile(&mut entry);
        state.in_use.insert(entry.addr(), entry);
        counters.created.fetch_add(1, Ordering::Relaxed);
        base
    }

    /// Move a handed-out buffer to the front of its shard's free list.
    ///
    /// The hinted shard is probed first; on a miss the remaining shards
    /// are probed in ascending index order. Never calls into the backing
    /// allocator.
    pub(crate) fn release(
        &self,
        base: NonNull<T>,
        count: usize,
        hint: Option<usize>,
    ) -> Result<()> {
        let addr = base.as_ptr() as usize;
        let hinted = hint.map(|h| h % self.shards.len());

        if let Some(index) = hinted {
            if self.try_reclaim(index, addr, count) {
                return Ok(());
            }
            self.shards[index]
                .counters
                .bad_hints
                .fetch_add(1, Ordering::Relaxed);
        }

        for index in 0..self.shards.len() {
            if hinted == Some(index) {
                continue;
            }
            if self.try_reclaim(index, addr, count) {
                return Ok(());
            }
        }

        Err(PoolError::UnknownBuffer { addr })
    }

    fn try_reclaim(&self, index: usize, addr: usize, count: usize) -> bool {
        let shard = &self.shards[index];
        let mut state = shard.state.lock();
        match state.in_use.remove(&addr) {
            Some(entry) => {
                assert_eq!(
                    entry.count(),
                    count,
                    "buffer released with a different element count than it was acquired with"
                );
                debug_assert_eq!(entry.locality(), index);
                state.free.push_front(entry);
                shard.counters.releases.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Return every free buffer to the backing allocator, destroying
    /// live content first.
    pub(crate) fn drain_free(&self) {
        for shard in self.shards.iter() {
            let mut state = shard.state.lock();
            let drained = state.free.len() as u64;
            for mut entry in state.free.drain(..) {
                entry.destroy_content();
                // Safety: the entry owns storage produced by this
                // manager's backing allocator.
                unsafe { self.backing.deallocate(entry.base(), entry.count()) };
            }
            shard.counters.cleaned.fetch_add(drained, Ordering::Relaxed);
        }
    }

    /// Return every buffer to the backing allocator, handed out or not.
    ///
    /// Only sound when no caller still uses a handed-out buffer; this is
    /// the end-of-run force-cleanup path.
    pub(crate) fn destroy_all(&self) {
        #[cfg(feature = "teardown-report")]
        let mut still_in_use = 0u64;

        for shard in self.shards.iter() {
            let mut state = shard.state.lock();
            let reclaimed = (state.free.len() + state.in_use.len()) as u64;
            #[cfg(feature = "teardown-report")]
            {
                still_in_use += state.in_use.len() as u64;
            }
            for mut entry in state.free.drain(..) {
                entry.destroy_content();
                // Safety: as in `drain_free`.
                unsafe { self.backing.deallocate(entry.base(), entry.count()) };
            }
            for (_, mut entry) in state.in_use.drain() {
                entry.destroy_content();
                // Safety: the caller vouches that the buffer is no longer
                // referenced.
                unsafe { self.backing.deallocate(entry.base(), entry.count()) };
            }
            shard
                .counters
                .cleaned
                .fetch_add(reclaimed, Ordering::Relaxed);
        }

        #[cfg(feature = "teardown-report")]
        crate::stats::report_teardown(
            std::any::type_name::<T>(),
            std::any::type_name::<A>(),
            &self.stats(),
            still_in_use,
        );
    }

    /// Aggregate counters and current occupancy across all shards.
    pub(crate) fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats::default();
        for shard in self.shards.iter() {
            stats.absorb(&shard.counters);
            let state = shard.state.lock();
            stats.in_use += state.in_use.len() as u64;
            stats.free += state.free.len() as u64;
        }
        stats
    }
}

impl<T: BufferElement, A: BackingAllocator<T>> BufferManager<T, A> {
    /// Hand out a buffer of exactly `count` value-initialized-or-reused
    /// elements; content stays live while the buffer sits in the pool.
    pub(crate) fn acquire_aggressive(
        &self,
        count: usize,
        hint: Option<usize>,
    ) -> Result<NonNull<T>> {
        self.acquire_with(count, hint, BufferEntry::value_initialize)
    }
}

impl<T, A: BackingAllocator<T>> Drop for BufferManager<T, A> {
    fn drop(&mut self) {
        // Teardown may run after the caller's runtime is gone; exclusive
        // access replaces locking here, counters included.
        #[cfg(feature = "teardown-report")]
        let mut stats = ManagerStats::default();
        #[cfg(feature = "teardown-report")]
        let mut still_in_use = 0u64;

        for shard in self.shards.iter_mut() {
            let state = shard.state.get_mut();
            #[cfg(feature = "teardown-report")]
            {
                stats.absorb(&shard.counters);
                stats.in_use += state.in_use.len() as u64;
                stats.free += state.free.len() as u64;
                still_in_use += state.in_use.len() as u64;
            }
            for mut entry in state.free.drain(..) {
                entry.destroy_content();
                // Safety: the entry owns storage produced by this
                // manager's backing allocator.
                unsafe { self.backing.deallocate(entry.base(), entry.count()) };
            }
            for (_, mut entry) in state.in_use.drain() {
                entry.destroy_content();
                // Safety: nothing can reach the pool once the manager is
                // being dropped.
                unsafe { self.backing.deallocate(entry.base(), entry.count()) };
            }
        }

        #[cfg(feature = "teardown-report")]
        crate::stats::report_teardown(
            std::any::type_name::<T>(),
            std::any::type_name::<A>(),
            &stats,
            still_in_use,
        );
    }
}
