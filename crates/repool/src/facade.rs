//! Allocator facades adapting the pool to a per-element allocator
//! contract.
//!
//! Both facades are stateless: every instance of a given parameterization
//! is interchangeable and compares equal. They differ in the content mode
//! they request and in whether element construction is the caller's job
//! or the pool's. The plain facade accepts any element type, drop glue
//! included; the aggressive facade is restricted to [`BufferElement`].

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::backing::{AlignedAllocator, BackingAllocator, HeapAllocator};
use crate::element::BufferElement;
use crate::error::Result;
use crate::recycler;

/// Pool-backed allocator that reuses storage only.
///
/// Elements are constructed and destroyed per request by the caller, so
/// any `Send + Sync + 'static` element type works, including types with
/// real drop glue. The storage handed out is uninitialized until
/// [`construct`](Self::construct) runs, and the caller must
/// [`destroy`](Self::destroy) every live element before
/// [`deallocate`](Self::deallocate).
///
/// # Example
///
/// ```
/// use repool::RecycleHeap;
///
/// let alloc = RecycleHeap::<u64>::new();
/// let base = alloc.allocate(512)?;
/// unsafe {
///     alloc.construct(base.as_ptr(), 7);
///     assert_eq!(base.as_ptr().read(), 7);
///     alloc.destroy(base.as_ptr());
///     alloc.deallocate(base, 512);
/// }
/// # Ok::<(), repool::PoolError>(())
/// ```
pub struct RecycleAllocator<T, A = HeapAllocator> {
    _marker: PhantomData<fn() -> (T, A)>,
}

impl<T: Send + Sync + 'static, A: BackingAllocator<T>> RecycleAllocator<T, A> {
    /// Obtain storage for `count` elements from the pool.
    pub fn allocate(&self, count: usize) -> Result<NonNull<T>> {
        recycler::acquire_plain::<T, A>(count, None)
    }

    /// Return storage to the pool for reuse.
    ///
    /// # Safety
    ///
    /// `base` must come from [`allocate`](Self::allocate) on this
    /// parameterization with the same `count`, every element constructed
    /// in it must already be destroyed, and the storage must not be used
    /// afterwards.
    pub unsafe fn deallocate(&self, base: NonNull<T>, count: usize) {
        if let Err(err) = recycler::release::<T, A>(base, count, None) {
            panic!("deallocate: {err}");
        }
    }

    /// Write `value` into an element slot.
    ///
    /// # Safety
    ///
    /// `slot` must point into storage obtained from this facade and must
    /// not hold a live element.
    pub unsafe fn construct(&self, slot: *mut T, value: T) {
        slot.write(value);
    }

    /// Drop an element in place, leaving the slot uninitialized.
    ///
    /// # Safety
    ///
    /// `slot` must point at a constructed element.
    pub unsafe fn destroy(&self, slot: *mut T) {
        std::ptr::drop_in_place(slot);
    }
}

/// Pool-backed allocator that reuses storage and contents.
///
/// The pool value-initializes the buffer when the storage is first
/// created (or when a mode switch demands it) and destroys contents only
/// when the buffer finally goes back to the backing allocator. The
/// per-element hooks are deliberately inert: whatever the previous user
/// left in the buffer is handed to the next one.
///
/// Restricted to [`BufferElement`] types, for which value-initialized
/// state is the zero pattern and reuse of prior contents is
/// representable. Other element types must use [`RecycleAllocator`].
pub struct AggressiveRecycleAllocator<T, A = HeapAllocator> {
    _marker: PhantomData<fn() -> (T, A)>,
}

impl<T: BufferElement, A: BackingAllocator<T>> AggressiveRecycleAllocator<T, A> {
    /// Obtain `count` value-initialized-or-reused elements from the pool.
    pub fn allocate(&self, count: usize) -> Result<NonNull<T>> {
        recycler::acquire::<T, A>(count, true, None)
    }

    /// Return storage, contents included, to the pool for reuse.
    ///
    /// # Safety
    ///
    /// `base` must come from [`allocate`](Self::allocate) on this
    /// parameterization with the same `count` and must not be used
    /// afterwards.
    pub unsafe fn deallocate(&self, base: NonNull<T>, count: usize) {
        if let Err(err) = recycler::release::<T, A>(base, count, None) {
            panic!("deallocate: {err}");
        }
    }

    /// No-op: the content belongs to the pool, not the caller.
    ///
    /// # Safety
    ///
    /// `slot` must point into storage obtained from this facade.
    pub unsafe fn construct(&self, slot: *mut T, value: T) {
        let _ = (slot, value);
    }

    /// No-op: contents are destroyed when the buffer leaves the pool for
    /// good, not before.
    ///
    /// # Safety
    ///
    /// `slot` must point into storage obtained from this facade.
    pub unsafe fn destroy(&self, slot: *mut T) {
        let _ = slot;
    }
}

macro_rules! impl_stateless_facade {
    ($name:ident) => {
        impl<T, A> $name<T, A> {
            /// Create a facade instance.
            pub const fn new() -> Self {
                Self {
                    _marker: PhantomData,
                }
            }
        }

        impl<T, A> Default for $name<T, A> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<T, A> Clone for $name<T, A> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T, A> Copy for $name<T, A> {}

        impl<T, A> PartialEq for $name<T, A> {
            fn eq(&self, _other: &Self) -> bool {
                true
            }
        }

        impl<T, A> Eq for $name<T, A> {}

        impl<T, A> fmt::Debug for $name<T, A> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "<"))?;
                f.write_str(std::any::type_name::<T>())?;
                f.write_str(">")
            }
        }
    };
}

impl_stateless_facade!(RecycleAllocator);
impl_stateless_facade!(AggressiveRecycleAllocator);

/// Plain facade over the system heap.
pub type RecycleHeap<T> = RecycleAllocator<T, HeapAllocator>;

/// Aggressive facade over the system heap.
pub type AggressiveRecycleHeap<T> = AggressiveRecycleAllocator<T, HeapAllocator>;

/// Plain facade over transfer-aligned heap storage.
pub type RecycleAligned<T> = RecycleAllocator<T, AlignedAllocator>;

/// Aggressive facade over transfer-aligned heap storage.
pub type AggressiveRecycleAligned<T> = AggressiveRecycleAllocator<T, AlignedAllocator>;
