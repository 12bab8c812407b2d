//! Reference-counted heap cells.
//!
//! A [`Gc`] is a counted handle to a cell owned by a [`Heap`](crate::Heap).
//! Cloning increments the count, dropping decrements it, and the pairing is
//! enforced by ownership. When the count reaches zero the cell's contents
//! are released and the cell is either recycled into its class free list or
//! deallocated.

use std::{
    cell::{BorrowError, BorrowMutError, Ref, RefCell, RefMut},
    fmt,
    marker::PhantomData,
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{self, AtomicU8, AtomicU32, Ordering},
    },
};

use crate::heap::HeapShared;

bitflags::bitflags! {
    /// Per-cell state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u8 {
        /// Exempt from refcount mutation. Used for VM-wide singletons.
        const CONSTANT = 1 << 0;
        /// Contents were already released by the cycle collector.
        const IN_CYCLE_COLLECTION = 1 << 1;
        /// Lost a reference without dying; candidate root for the next
        /// cycle pass.
        const SUSPECT = 1 << 2;
    }
}

/// Implemented by every type stored in a [`Heap`](crate::Heap).
///
/// `trace` must report each [`Gc`] edge that owns exactly one count on its
/// target. Edges reached through shared structures (an `Arc` many cells
/// point at) must not be reported, otherwise the cycle collector
/// over-counts internal references.
pub trait Trace: Sized + 'static {
    fn trace(&self, visitor: &mut dyn FnMut(&Gc<Self>));

    /// Drop every outgoing edge, leaving an empty value behind.
    fn clear(&mut self);

    /// Free-list bucket this value may be recycled into.
    fn recycle_key(&self) -> Option<u32> {
        None
    }

    /// Called exactly once when the cell dies, before its contents are
    /// cleared.
    fn finalize(&mut self) {}
}

pub(crate) struct GcBox<T: Trace> {
    pub(crate) refcount: AtomicU32,
    pub(crate) flags: AtomicU8,
    pub(crate) heap: Arc<HeapShared<T>>,
    pub(crate) value: RefCell<T>,
}

impl<T: Trace> GcBox<T> {
    #[inline]
    pub(crate) fn flags(&self) -> CellFlags {
        CellFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn add_flag(&self, flag: CellFlags) -> CellFlags {
        CellFlags::from_bits_truncate(
            self.flags.fetch_or(flag.bits(), Ordering::AcqRel),
        )
    }

    #[inline]
    pub(crate) fn remove_flag(&self, flag: CellFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }
}

/// Raw cell pointer that can cross the registry mutex.
pub(crate) struct CellPtr<T: Trace>(pub(crate) NonNull<GcBox<T>>);

// SAFETY: the pointer is only dereferenced by the heap under the protocol
// described on `Gc`.
unsafe impl<T: Trace> Send for CellPtr<T> {}

/// A counted reference to a heap cell.
///
/// Handles may be moved to other threads and dropped there, so a producer
/// can carry values into the VM's event queue. The contents belong to the
/// thread that created the heap: [`Gc::borrow`] and its variants panic on
/// any other thread.
pub struct Gc<T: Trace> {
    ptr: NonNull<GcBox<T>>,
    _marker: PhantomData<GcBox<T>>,
}

// SAFETY: the refcount and flags are atomic and the registry is behind a
// mutex, so clone and drop are sound on any thread. The `RefCell` holding
// the contents is only reachable through the borrow methods, which refuse
// every thread but the heap's owner, and `Heap` itself cannot leave that
// thread. The one other access is `HeapShared::destroy`, which runs once
// the count is zero and no handle on any thread can reach the cell.
unsafe impl<T: Trace> Send for Gc<T> {}

impl<T: Trace> Gc<T> {
    /// Wrap a cell pointer that already carries one count for this handle.
    #[inline]
    pub(crate) fn from_raw(ptr: NonNull<GcBox<T>>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn cell(&self) -> &GcBox<T> {
        // SAFETY: a live handle keeps the cell allocated.
        unsafe { self.ptr.as_ref() }
    }

    /// Give up this handle without marking the cell as a suspect.
    pub(crate) fn drop_unmarked(self) {
        let this = std::mem::ManuallyDrop::new(self);
        let cell = this.cell();
        if cell.flags().contains(CellFlags::CONSTANT) {
            return;
        }
        if cell.refcount.fetch_sub(1, Ordering::Release) == 1 {
            atomic::fence(Ordering::Acquire);
            let heap = Arc::clone(&cell.heap);
            heap.release(CellPtr(this.ptr));
        }
    }

    /// The contents, checked to be accessed from the owning thread.
    #[inline]
    fn contents(&self) -> &RefCell<T> {
        let cell = self.cell();
        assert!(
            cell.heap.is_owner_thread(),
            "heap cell {:#x} borrowed off its owning thread",
            self.addr()
        );
        &cell.value
    }

    #[inline]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.contents().borrow()
    }

    #[inline]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.contents().borrow_mut()
    }

    #[inline]
    pub fn try_borrow(&self) -> Result<Ref<'_, T>, BorrowError> {
        self.contents().try_borrow()
    }

    #[inline]
    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, T>, BorrowMutError> {
        self.contents().try_borrow_mut()
    }

    /// Identity comparison.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    /// Address of the cell, usable as an identity key.
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.cell().refcount.load(Ordering::Acquire)
    }

    #[inline]
    pub fn flags(&self) -> CellFlags {
        self.cell().flags()
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.flags().contains(CellFlags::CONSTANT)
    }
}

impl<T: Trace> Clone for Gc<T> {
    #[inline]
    fn clone(&self) -> Self {
        let cell = self.cell();
        if !cell.flags().contains(CellFlags::CONSTANT) {
            let prev = cell.refcount.fetch_add(1, Ordering::Relaxed);
            debug_assert!(prev > 0, "cloned a dead cell");
        }
        Self::from_raw(self.ptr)
    }
}

impl<T: Trace> Drop for Gc<T> {
    fn drop(&mut self) {
        let cell = self.cell();
        let flags = cell.flags();
        if flags.contains(CellFlags::CONSTANT) {
            return;
        }
        // Mark while our own count still keeps the cell alive.
        if cell.refcount.load(Ordering::Relaxed) > 1
            && !flags.intersects(CellFlags::SUSPECT | CellFlags::IN_CYCLE_COLLECTION)
            && !cell.add_flag(CellFlags::SUSPECT).contains(CellFlags::SUSPECT)
        {
            cell.heap.note_suspect(self.addr());
        }
        if cell.refcount.fetch_sub(1, Ordering::Release) == 1 {
            atomic::fence(Ordering::Acquire);
            let heap = Arc::clone(&cell.heap);
            heap.release(CellPtr(self.ptr));
        }
    }
}

impl<T: Trace> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T: Trace> Eq for Gc<T> {}

impl<T: Trace> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gc({:#x}, rc={})", self.addr(), self.refcount())
    }
}
