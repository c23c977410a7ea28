//! RAII handle over one pooled buffer.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use crate::backing::{BackingAllocator, HeapAllocator};
use crate::element::BufferElement;
use crate::error::Result;
use crate::recycler;

/// Owned, pool-backed buffer of a fixed number of elements.
///
/// The buffer is acquired in aggressive mode: its contents are
/// value-initialized when the storage is first created and survive
/// between users of the same shape. Dropping the handle returns the
/// buffer to the pool, not to the backing allocator.
///
/// # Example
///
/// ```
/// use repool::PooledBuffer;
///
/// let mut frame: PooledBuffer<u64> = PooledBuffer::new(1024)?;
/// frame[7] = 42;
/// assert_eq!(frame.len(), 1024);
/// # Ok::<(), repool::PoolError>(())
/// ```
pub struct PooledBuffer<T: BufferElement, A: BackingAllocator<T> = HeapAllocator> {
    base: NonNull<T>,
    count: usize,
    hint: Option<usize>,
    _backing: PhantomData<fn() -> A>,
}

// Safety: the handle owns its storage exclusively and elements are
// `Send + Sync`.
unsafe impl<T: BufferElement, A: BackingAllocator<T>> Send for PooledBuffer<T, A> {}
unsafe impl<T: BufferElement, A: BackingAllocator<T>> Sync for PooledBuffer<T, A> {}

impl<T: BufferElement, A: BackingAllocator<T>> PooledBuffer<T, A> {
    /// Acquire a buffer of `count` elements from the process-wide pool.
    pub fn new(count: usize) -> Result<Self> {
        Self::with_hint(count, None)
    }

    /// Acquire with a locality hint selecting the shard to serve from.
    ///
    /// Callers typically pass a NUMA node index or worker id so that
    /// co-located producers and consumers reuse the same buffers.
    pub fn with_hint(count: usize, hint: Option<usize>) -> Result<Self> {
        let base = recycler::acquire::<T, A>(count, true, hint)?;
        Ok(Self {
            base,
            count,
            hint,
            _backing: PhantomData,
        })
    }

    /// Number of elements in the buffer.
    pub fn len(&self) -> usize {
        self.count
    }

    /// A pooled buffer always holds at least one element.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Locality hint the buffer was acquired with.
    pub fn hint(&self) -> Option<usize> {
        self.hint
    }

    /// Raw base pointer, for handing to compute kernels.
    pub fn as_ptr(&self) -> *mut T {
        self.base.as_ptr()
    }
}

impl<T: BufferElement, A: BackingAllocator<T>> Deref for PooledBuffer<T, A> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        // Safety: the handle owns `count` initialized elements at `base`.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.count) }
    }
}

impl<T: BufferElement, A: BackingAllocator<T>> DerefMut for PooledBuffer<T, A> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        // Safety: as in `deref`, with exclusive access through `&mut self`.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.count) }
    }
}

impl<T: BufferElement, A: BackingAllocator<T>> AsRef<[T]> for PooledBuffer<T, A> {
    fn as_ref(&self) -> &[T] {
        self
    }
}

impl<T: BufferElement, A: BackingAllocator<T>> AsMut<[T]> for PooledBuffer<T, A> {
    fn as_mut(&mut self) -> &mut [T] {
        self
    }
}

impl<T: BufferElement, A: BackingAllocator<T>> fmt::Debug for PooledBuffer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("count", &self.count)
            .field("hint", &self.hint)
            .finish()
    }
}

impl<T: BufferElement, A: BackingAllocator<T>> Drop for PooledBuffer<T, A> {
    fn drop(&mut self) {
        // Safety: the handle owns `base` and every borrow has ended.
        let result = unsafe { recycler::release::<T, A>(self.base, self.count, self.hint) };
        if let Err(err) = result {
            // Only reachable when a force-cleanup tore the pool down while
            // this handle was live; the storage is already gone.
            tracing::error!(error = %err, "pooled buffer could not be returned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Voxel(u32);
    // Safety: zero is a valid value and the type has no drop glue.
    unsafe impl BufferElement for Voxel {}

    #[test]
    fn test_new_buffer_is_value_initialized() {
        let buffer: PooledBuffer<Voxel> = PooledBuffer::new(64).unwrap();
        assert_eq!(buffer.len(), 64);
        assert!(!buffer.is_empty());
        assert!(buffer.iter().all(|v| *v == Voxel(0)));
    }

    #[test]
    fn test_write_read_through_slices() {
        let mut buffer: PooledBuffer<Voxel> = PooledBuffer::new(16).unwrap();
        buffer[3] = Voxel(99);
        assert_eq!(buffer.as_ref()[3], Voxel(99));
        buffer.as_mut()[4] = Voxel(100);
        assert_eq!(buffer[4], Voxel(100));
    }

    #[test]
    fn test_hint_is_recorded() {
        let buffer: PooledBuffer<Voxel> = PooledBuffer::with_hint(8, Some(11)).unwrap();
        assert_eq!(buffer.hint(), Some(11));
    }

    #[test]
    fn test_drop_returns_buffer_to_pool() {
        #[derive(Debug, Clone, Copy)]
        #[allow(dead_code)]
        struct Pixel(u8);
        // Safety: zero is a valid value and the type has no drop glue.
        unsafe impl BufferElement for Pixel {}

        let buffer: PooledBuffer<Pixel> = PooledBuffer::new(128).unwrap();
        drop(buffer);

        let stats = recycler::manager_stats::<Pixel, HeapAllocator>();
        assert_eq!(stats.in_use, 0);
        assert!(stats.releases >= 1);
    }
}
