//! Backing allocator contract and built-in implementations.
//!
//! The pool consumes storage producers through a narrow contract: obtain
//! `count` elements, give them back, nothing else. Implementations are
//! stateless value types, so any instance can free what another instance
//! of the same type allocated.

use std::alloc::{self, Layout};
use std::any;
use std::ptr::NonNull;

use crate::error::{PoolError, Result};

/// Default alignment for [`AlignedAllocator`], sized for device-transfer
/// staging buffers.
pub const DEFAULT_ALIGNMENT: usize = 256;

/// Contract the pool demands from an underlying storage producer.
///
/// Implementations must be stateless: two instances of the same type
/// compare equal and are interchangeable for allocate/deallocate pairing.
pub trait BackingAllocator<T>: Default + Clone + Send + Sync + 'static {
    /// Obtain storage for `count` elements. The returned storage is
    /// uninitialized.
    fn allocate(&self, count: usize) -> Result<NonNull<T>>;

    /// Return storage previously obtained from
    /// [`allocate`](BackingAllocator::allocate). Must not fail.
    ///
    /// # Safety
    ///
    /// `base` must have been produced by `allocate(count)` on an instance
    /// of the same allocator type and must not be used afterwards.
    unsafe fn deallocate(&self, base: NonNull<T>, count: usize);
}

fn array_layout<T>(count: usize) -> Result<Layout> {
    debug_assert!(count > 0);
    let layout = Layout::array::<T>(count).map_err(|_| PoolError::OutOfMemory {
        count,
        element: any::type_name::<T>(),
    })?;
    assert!(layout.size() > 0, "zero-sized element types cannot be pooled");
    Ok(layout)
}

fn aligned_layout<T>(count: usize, align: usize) -> Result<Layout> {
    let layout = array_layout::<T>(count)?;
    assert!(align.is_power_of_two(), "alignment must be a power of two");
    let align = align.max(layout.align());
    Layout::from_size_align(layout.size(), align).map_err(|_| PoolError::OutOfMemory {
        count,
        element: any::type_name::<T>(),
    })
}

/// System-heap allocator, the default storage producer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapAllocator;

impl<T> BackingAllocator<T> for HeapAllocator {
    fn allocate(&self, count: usize) -> Result<NonNull<T>> {
        let layout = array_layout::<T>(count)?;
        // Safety: the layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        NonNull::new(raw.cast::<T>()).ok_or(PoolError::OutOfMemory {
            count,
            element: any::type_name::<T>(),
        })
    }

    unsafe fn deallocate(&self, base: NonNull<T>, count: usize) {
        // The layout was validated when the storage was produced.
        if let Ok(layout) = array_layout::<T>(count) {
            alloc::dealloc(base.as_ptr().cast(), layout);
        }
    }
}

/// Heap allocator that places buffers at a fixed alignment.
///
/// Stand-in for pinned-host and device-queue allocators, which demand
/// page- or transfer-aligned staging storage. The alignment is a type
/// parameter so that differently aligned pools stay separate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AlignedAllocator<const ALIGN: usize = DEFAULT_ALIGNMENT>;

impl<T, const ALIGN: usize> BackingAllocator<T> for AlignedAllocator<ALIGN> {
    fn allocate(&self, count: usize) -> Result<NonNull<T>> {
        let layout = aligned_layout::<T>(count, ALIGN)?;
        // Safety: the layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        NonNull::new(raw.cast::<T>()).ok_or(PoolError::OutOfMemory {
            count,
            element: any::type_name::<T>(),
        })
    }

    unsafe fn deallocate(&self, base: NonNull<T>, count: usize) {
        if let Ok(layout) = aligned_layout::<T>(count, ALIGN) {
            alloc::dealloc(base.as_ptr().cast(), layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_roundtrip() {
        let alloc = HeapAllocator;
        let base: NonNull<u64> = alloc.allocate(128).unwrap();
        unsafe {
            base.as_ptr().write(42);
            assert_eq!(base.as_ptr().read(), 42);
            alloc.deallocate(base, 128);
        }
    }

    #[test]
    fn test_heap_overflow_is_oom() {
        let alloc = HeapAllocator;
        let result: Result<NonNull<u64>> = alloc.allocate(usize::MAX / 2);
        assert!(matches!(result, Err(PoolError::OutOfMemory { .. })));
    }

    #[test]
    fn test_aligned_allocation() {
        let alloc = AlignedAllocator::<256>;
        let base: NonNull<u8> = alloc.allocate(100).unwrap();
        assert_eq!(base.as_ptr() as usize % 256, 0);
        unsafe { alloc.deallocate(base, 100) };
    }

    #[test]
    fn test_aligned_respects_element_alignment() {
        // An element more aligned than the requested alignment wins.
        let alloc = AlignedAllocator::<2>;
        let base: NonNull<u64> = alloc.allocate(4).unwrap();
        assert_eq!(base.as_ptr() as usize % std::mem::align_of::<u64>(), 0);
        unsafe { alloc.deallocate(base, 4) };
    }

    #[test]
    fn test_instances_compare_equal() {
        assert_eq!(HeapAllocator, HeapAllocator);
        assert_eq!(AlignedAllocator::<64>, AlignedAllocator::<64>);
    }
}
