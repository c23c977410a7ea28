//! Bookkeeping for individual pooled buffers.

use std::ptr::NonNull;

use crate::element::BufferElement;

/// Descriptor for one buffer owned by a shard.
///
/// An entry is born when the backing allocator produces storage, sits in
/// the shard's in-use table while handed out, moves to the free list on
/// release, and dies when a cleanup returns the storage to the backing
/// allocator.
#[derive(Debug)]
pub(crate) struct BufferEntry<T> {
    /// First element of the buffer.
    base: NonNull<T>,
    /// Element count fixed when the storage was produced.
    count: usize,
    /// Shard the buffer was admitted into.
    locality: usize,
    /// Whether `count` value-initialized elements currently occupy the
    /// storage; false means the storage is uninitialized.
    content_live: bool,
}

// Safety: an entry owns its storage exclusively while it sits in a shard.
unsafe impl<T: Send> Send for BufferEntry<T> {}
unsafe impl<T: Sync> Sync for BufferEntry<T> {}

impl<T> BufferEntry<T> {
    pub(crate) fn new(base: NonNull<T>, count: usize, locality: usize) -> Self {
        Self {
            base,
            count,
            locality,
            content_live: false,
        }
    }

    #[inline]
    pub(crate) fn base(&self) -> NonNull<T> {
        self.base
    }

    #[inline]
    pub(crate) fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub(crate) fn locality(&self) -> usize {
        self.locality
    }

    #[cfg(test)]
    pub(crate) fn content_live(&self) -> bool {
        self.content_live
    }

    /// Destroy live content in place and mark the storage dead. Dead
    /// storage is left untouched.
    pub(crate) fn destroy_content(&mut self) {
        if self.content_live {
            // Safety: `content_live` means `count` initialized elements
            // occupy the storage, owned by this entry.
            unsafe {
                std::ptr::drop_in_place(std::ptr::slice_from_raw_parts_mut(
                    self.base.as_ptr(),
                    self.count,
                ));
            }
            self.content_live = false;
        }
    }
}

impl<T: BufferElement> BufferEntry<T> {
    /// Zero-fill dead storage, putting every element into its
    /// value-initialized state. Live content is handed out as-is.
    pub(crate) fn value_initialize(&mut self) {
        if !self.content_live {
            // Safety: `base` points at `count` elements owned by this
            // entry, and the zero pattern is valid for every
            // `BufferElement`.
            unsafe { std::ptr::write_bytes(self.base.as_ptr(), 0, self.count) };
            self.content_live = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::{BackingAllocator, HeapAllocator};

    #[test]
    fn test_value_initialize_zero_fills() {
        let alloc = HeapAllocator;
        let base: NonNull<u32> = alloc.allocate(8).unwrap();
        let mut entry = BufferEntry::new(base, 8, 0);
        assert!(!entry.content_live());

        entry.value_initialize();
        assert!(entry.content_live());
        let slice = unsafe { std::slice::from_raw_parts(base.as_ptr(), 8) };
        assert!(slice.iter().all(|&v| v == 0));

        entry.destroy_content();
        assert!(!entry.content_live());

        unsafe { alloc.deallocate(base, 8) };
    }

    #[test]
    fn test_value_initialize_keeps_live_content() {
        let alloc = HeapAllocator;
        let base: NonNull<u32> = alloc.allocate(4).unwrap();
        let mut entry = BufferEntry::new(base, 4, 0);

        entry.value_initialize();
        unsafe { base.as_ptr().write(7) };
        // Already live: the content survives.
        entry.value_initialize();
        assert_eq!(unsafe { base.as_ptr().read() }, 7);

        unsafe { alloc.deallocate(base, 4) };
    }

    #[test]
    fn test_destroy_content_runs_drop_glue() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let alloc = HeapAllocator;
        let base: NonNull<Tracked> = alloc.allocate(3).unwrap();
        for i in 0..3 {
            unsafe { base.as_ptr().add(i).write(Tracked) };
        }

        // Entries only report live content once the pool has put them in
        // that state; simulate it through the raw field path.
        let mut entry = BufferEntry {
            base,
            count: 3,
            locality: 0,
            content_live: true,
        };
        entry.destroy_content();
        assert_eq!(DROPS.load(Ordering::Relaxed), 3);
        assert!(!entry.content_live());

        unsafe { alloc.deallocate(base, 3) };
    }

    #[test]
    fn test_entry_records_birth_shape() {
        let alloc = HeapAllocator;
        let base: NonNull<u64> = alloc.allocate(3).unwrap();
        let entry = BufferEntry::new(base, 3, 17);
        assert_eq!(entry.count(), 3);
        assert_eq!(entry.locality(), 17);
        assert_eq!(entry.addr(), base.as_ptr() as usize);
        unsafe { alloc.deallocate(base, 3) };
    }
}
