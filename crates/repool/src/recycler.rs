//! Process-wide recycler: manager registry and global cleanup fan-out.
//!
//! The recycler owns no buffers. It remembers every buffer manager the
//! process has touched through a pair of cleanup callbacks per manager
//! and replays them, in registration order, for the two global cleanup
//! operations. Managers are keyed by their (element, backing allocator)
//! type pair so that each parameterization shares one pool across all
//! callers.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::backing::BackingAllocator;
use crate::element::BufferElement;
use crate::error::Result;
use crate::manager::BufferManager;
use crate::stats::ManagerStats;
use crate::sync::PoolMutex;

type CleanupCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct CallbackLists {
    drain: Vec<CleanupCallback>,
    destroy: Vec<CleanupCallback>,
}

struct Recycler {
    callbacks: PoolMutex<CallbackLists>,
}

impl Recycler {
    fn register(&self, drain: CleanupCallback, destroy: CleanupCallback) {
        let mut lists = self.callbacks.lock();
        lists.drain.push(drain);
        lists.destroy.push(destroy);
    }

    fn drain_all_free(&self) {
        let lists = self.callbacks.lock();
        for callback in &lists.drain {
            callback();
        }
    }

    fn destroy_everything(&self) {
        let lists = self.callbacks.lock();
        for callback in &lists.destroy {
            callback();
        }
    }
}

static RECYCLER: Lazy<Recycler> = Lazy::new(|| Recycler {
    callbacks: PoolMutex::new(CallbackLists::default()),
});

type ManagerKey = (TypeId, TypeId);

static MANAGERS: Lazy<PoolMutex<HashMap<ManagerKey, Arc<dyn Any + Send + Sync>>>> =
    Lazy::new(|| PoolMutex::new(HashMap::new()));

/// Fetch the process-wide manager for `(T, A)`, creating it and wiring
/// its cleanup callbacks into the recycler on first use.
fn manager<T: Send + Sync + 'static, A: BackingAllocator<T>>() -> Arc<BufferManager<T, A>> {
    let key = (TypeId::of::<T>(), TypeId::of::<A>());
    let mut managers = MANAGERS.lock();
    if let Some(existing) = managers.get(&key) {
        match Arc::clone(existing).downcast::<BufferManager<T, A>>() {
            Ok(found) => return found,
            Err(_) => unreachable!("registry entries are keyed by their type ids"),
        }
    }

    let created = Arc::new(BufferManager::<T, A>::new());
    managers.insert(key, Arc::clone(&created) as Arc<dyn Any + Send + Sync>);

    // First use of this parameterization: register both callbacks, once.
    // Lock order is registry before recycler, never the reverse.
    let drain = Arc::clone(&created);
    let destroy = Arc::clone(&created);
    RECYCLER.register(
        Box::new(move || drain.drain_free()),
        Box::new(move || destroy.destroy_all()),
    );
    created
}

/// Hand out a buffer of exactly `count` elements of `T`, produced by the
/// backing allocator `A` on a miss.
///
/// `aggressive` selects whether the pool manages the content lifetime
/// (value-initialized storage that survives between users) or only the
/// storage; both modes share one pool per parameterization. `hint`
/// selects the shard to serve from; a missing hint maps to shard 0 and
/// an out-of-range hint wraps.
///
/// This flagged entry point requires [`BufferElement`]. Plain-mode reuse
/// for element types with real drop glue goes through
/// [`RecycleAllocator`](crate::RecycleAllocator).
pub fn acquire<T: BufferElement, A: BackingAllocator<T>>(
    count: usize,
    aggressive: bool,
    hint: Option<usize>,
) -> Result<NonNull<T>> {
    let manager = manager::<T, A>();
    if aggressive {
        manager.acquire_aggressive(count, hint)
    } else {
        manager.acquire_plain(count, hint)
    }
}

/// Storage-only acquire for arbitrary element types; the caller
/// constructs and destroys element values.
pub(crate) fn acquire_plain<T: Send + Sync + 'static, A: BackingAllocator<T>>(
    count: usize,
    hint: Option<usize>,
) -> Result<NonNull<T>> {
    manager::<T, A>().acquire_plain(count, hint)
}

/// Return a buffer to the pool for reuse. Never calls into the backing
/// allocator.
///
/// `count` must equal the count passed to the matching [`acquire`]; a
/// mismatch asserts. A wrong `hint` costs a wider probe but still
/// succeeds.
///
/// # Safety
///
/// `base` must have been returned by [`acquire`] with the same `(T, A)`
/// parameterization and must not be used after this call; the pool may
/// hand the storage to another caller immediately.
pub unsafe fn release<T: Send + Sync + 'static, A: BackingAllocator<T>>(
    base: NonNull<T>,
    count: usize,
    hint: Option<usize>,
) -> Result<()> {
    manager::<T, A>().release(base, count, hint)
}

/// Counter snapshot for the `(T, A)` manager.
pub fn manager_stats<T: Send + Sync + 'static, A: BackingAllocator<T>>() -> ManagerStats {
    manager::<T, A>().stats()
}

/// Deallocate every buffer currently sitting in a free list, across all
/// managers. Safe at any time; buffers handed out stay untouched.
pub fn cleanup() {
    RECYCLER.drain_all_free();
}

/// Destroy every buffer in the process, including those still handed
/// out, and leave every pool empty.
///
/// # Safety
///
/// No caller may use any pooled buffer after this returns; pointers and
/// handles obtained earlier dangle. Intended only for end-of-run
/// teardown.
pub unsafe fn force_cleanup() {
    RECYCLER.destroy_everything();
}

/// Drain used by the out-of-memory retry path inside managers. Must be
/// called with no shard lock held.
pub(crate) fn drain_all_free() {
    RECYCLER.drain_all_free();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::HeapAllocator;

    macro_rules! probe_element {
        ($name:ident) => {
            #[derive(Debug, Clone, Copy)]
            #[allow(dead_code)]
            struct $name(u64);
            // Safety: zero is a valid value and the type has no drop glue.
            unsafe impl BufferElement for $name {}
        };
    }

    #[test]
    fn test_registry_returns_one_manager_per_parameterization() {
        probe_element!(Probe);

        let first = manager::<Probe, HeapAllocator>();
        let second = manager::<Probe, HeapAllocator>();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_distinct_types_get_distinct_managers() {
        probe_element!(Traffic);
        probe_element!(Bystander);

        let before = manager_stats::<Bystander, HeapAllocator>();
        let base = acquire::<Traffic, HeapAllocator>(4, false, None).unwrap();
        unsafe { release::<Traffic, HeapAllocator>(base, 4, None).unwrap() };

        // Traffic on one parameterization is invisible to the other.
        let after = manager_stats::<Bystander, HeapAllocator>();
        assert_eq!(before, after);
    }

    #[test]
    fn test_global_roundtrip_counts() {
        probe_element!(Roundtrip);

        let base = acquire::<Roundtrip, HeapAllocator>(16, false, Some(2)).unwrap();
        unsafe { release::<Roundtrip, HeapAllocator>(base, 16, Some(2)).unwrap() };

        let stats = manager_stats::<Roundtrip, HeapAllocator>();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[test]
    fn test_cleanup_empties_free_lists() {
        probe_element!(Drained);

        let base = acquire::<Drained, HeapAllocator>(8, false, None).unwrap();
        unsafe { release::<Drained, HeapAllocator>(base, 8, None).unwrap() };

        cleanup();
        let stats = manager_stats::<Drained, HeapAllocator>();
        assert_eq!(stats.free, 0);
        assert!(stats.cleaned >= 1);
    }
}
