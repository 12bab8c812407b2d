//! Reference-counted heap with a trial-deletion cycle collector.
//!
//! This crate is decoupled from any specific VM. Consumers provide:
//! - A [`Trace`] implementation to enumerate the counted edges of a value.
//! - An allocation call site that hands values to [`Heap::alloc`].
//!
//! Counts are maintained eagerly by [`Gc`]. Cycles are found by
//! [`Heap::collect_cycles`] starting from suspect cells (cells that lost a
//! reference without dying), or by a full pass over every live cell.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    marker::PhantomData,
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

use crate::cycle::{self, CycleReport};
use crate::gc::{CellFlags, CellPtr, Gc, GcBox, Trace};

type AddrSet = HashSet<usize, ahash::RandomState>;

// ── Heap settings ─────────────────────────────────────────────────────

/// Policy knobs for the refcounted heap.
#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Number of suspect cells that makes [`Heap::maybe_collect`] run a
    /// candidate-rooted cycle pass.
    pub collect_threshold: usize,
    /// Upper bound on cells visited by a candidate-rooted pass. A pass that
    /// hits the bound is followed by a full pass.
    pub max_traversal: usize,
    /// Recycled cells kept per free-list bucket.
    pub free_list_capacity: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            collect_threshold: 1024,
            max_traversal: 65_536,
            free_list_capacity: 64,
        }
    }
}

impl HeapSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.collect_threshold == 0 {
            return Err("collect_threshold must be > 0");
        }
        if self.max_traversal == 0 {
            return Err("max_traversal must be > 0");
        }
        Ok(())
    }
}

// ── Stats ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    allocated: AtomicU64,
    recycled: AtomicU64,
    finalized: AtomicU64,
    cycle_passes: AtomicU64,
    cycle_reclaimed: AtomicU64,
}

/// Snapshot of heap activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub live: usize,
    pub suspects: usize,
    pub allocated: u64,
    pub recycled: u64,
    pub finalized: u64,
    pub cycle_passes: u64,
    pub cycle_reclaimed: u64,
}

// ── Shared state ──────────────────────────────────────────────────────

pub(crate) struct Registry<T: Trace> {
    pub(crate) live: AddrSet,
    pub(crate) suspects: AddrSet,
    free: HashMap<u32, Vec<CellPtr<T>>, ahash::RandomState>,
}

#[derive(Default)]
struct ReleaseQueue<T: Trace> {
    pending: Vec<CellPtr<T>>,
    active: bool,
}

/// State shared by the heap owner and every cell.
pub(crate) struct HeapShared<T: Trace> {
    pub(crate) registry: Mutex<Registry<T>>,
    releasing: Mutex<ReleaseQueue<T>>,
    counters: Counters,
    free_list_capacity: usize,
    /// The only thread allowed to borrow cell contents.
    owner: ThreadId,
}

impl<T: Trace> HeapShared<T> {
    #[inline]
    pub(crate) fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub(crate) fn note_suspect(&self, addr: usize) {
        self.registry.lock().suspects.insert(addr);
    }

    /// Release a cell whose count just reached zero.
    ///
    /// Releases are queued so that dropping a long chain never recurses:
    /// the first caller drains the queue while nested releases only push.
    pub(crate) fn release(&self, cell: CellPtr<T>) {
        {
            let mut queue = self.releasing.lock();
            queue.pending.push(cell);
            if queue.active {
                return;
            }
            queue.active = true;
        }
        loop {
            let next = {
                let mut queue = self.releasing.lock();
                match queue.pending.pop() {
                    Some(next) => next,
                    None => {
                        queue.active = false;
                        break;
                    }
                }
            };
            // SAFETY: the count reached zero, so no handle refers to the
            // cell any more and we are its sole owner.
            unsafe { self.destroy(next.0) };
        }
    }

    /// # Safety
    ///
    /// `ptr` must point to a registered cell whose count is zero.
    unsafe fn destroy(&self, ptr: NonNull<GcBox<T>>) {
        let cell = unsafe { ptr.as_ref() };
        let addr = ptr.as_ptr() as usize;
        let key = match cell.value.try_borrow_mut() {
            Ok(mut value) => {
                let key = value.recycle_key();
                value.finalize();
                if !cell.flags().contains(CellFlags::IN_CYCLE_COLLECTION) {
                    value.clear();
                }
                key
            }
            Err(_) => {
                // Leak rather than free a cell someone is still looking at.
                log::error!("cell {addr:#x} died while borrowed; leaking it");
                return;
            }
        };
        self.counters.finalized.fetch_add(1, Ordering::Relaxed);
        log::trace!("released cell {addr:#x}");

        let mut registry = self.registry.lock();
        registry.live.remove(&addr);
        registry.suspects.remove(&addr);
        if let Some(key) = key {
            let bucket = registry.free.entry(key).or_default();
            if bucket.len() < self.free_list_capacity {
                bucket.push(CellPtr(ptr));
                return;
            }
        }
        drop(registry);
        // SAFETY: cells are allocated with `Box` in `Heap::alloc`.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }

    /// Take a counted handle to a registered cell unless it is already dying.
    ///
    /// Must be called with the registry locked so that a concurrent
    /// `destroy` cannot deallocate the cell underneath us.
    pub(crate) fn try_upgrade(&self, addr: usize) -> Option<Gc<T>> {
        let ptr = NonNull::new(addr as *mut GcBox<T>)?;
        // SAFETY: `addr` is in the live set, so the cell is still allocated.
        let cell = unsafe { ptr.as_ref() };
        if cell.flags().contains(CellFlags::CONSTANT) {
            return None;
        }
        let mut count = cell.refcount.load(Ordering::Relaxed);
        loop {
            if count == 0 {
                return None;
            }
            match cell.refcount.compare_exchange_weak(
                count,
                count + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(Gc::from_raw(ptr)),
                Err(actual) => count = actual,
            }
        }
    }

    pub(crate) fn note_pass(&self, report: &CycleReport) {
        self.counters.cycle_passes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .cycle_reclaimed
            .fetch_add(report.reclaimed as u64, Ordering::Relaxed);
    }
}

// ── Heap ──────────────────────────────────────────────────────────────

/// Owner of a refcounted heap of `T` cells.
///
/// A heap stays on the thread that created it; only that thread may
/// borrow the contents of its cells.
pub struct Heap<T: Trace> {
    shared: Arc<HeapShared<T>>,
    settings: HeapSettings,
    _owner: PhantomData<*const ()>,
}

impl<T: Trace> Heap<T> {
    pub fn new(settings: HeapSettings) -> Result<Self, &'static str> {
        settings.validate()?;
        let shared = HeapShared {
            registry: Mutex::new(Registry {
                live: AddrSet::default(),
                suspects: AddrSet::default(),
                free: HashMap::default(),
            }),
            releasing: Mutex::new(ReleaseQueue {
                pending: Vec::new(),
                active: false,
            }),
            counters: Counters::default(),
            free_list_capacity: settings.free_list_capacity,
            owner: thread::current().id(),
        };
        Ok(Self {
            shared: Arc::new(shared),
            settings,
            _owner: PhantomData,
        })
    }

    #[inline]
    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    /// Allocate a cell holding `value` with a count of one.
    pub fn alloc(&self, value: T) -> Gc<T> {
        let recycled = value
            .recycle_key()
            .and_then(|key| self.shared.registry.lock().free.get_mut(&key)?.pop());

        let ptr = match recycled {
            Some(CellPtr(ptr)) => {
                // SAFETY: free-list cells are allocated and unreferenced.
                let cell = unsafe { ptr.as_ref() };
                cell.refcount.store(1, Ordering::Relaxed);
                cell.flags.store(0, Ordering::Relaxed);
                // The previous value was cleared before recycling, so
                // dropping it releases nothing.
                *cell.value.borrow_mut() = value;
                self.shared.counters.recycled.fetch_add(1, Ordering::Relaxed);
                ptr
            }
            None => {
                let cell = Box::new(GcBox {
                    refcount: AtomicU32::new(1),
                    flags: AtomicU8::new(0),
                    heap: Arc::clone(&self.shared),
                    value: RefCell::new(value),
                });
                NonNull::from(Box::leak(cell))
            }
        };

        self.shared
            .registry
            .lock()
            .live
            .insert(ptr.as_ptr() as usize);
        self.shared.counters.allocated.fetch_add(1, Ordering::Relaxed);
        Gc::from_raw(ptr)
    }

    /// Exempt a cell from refcount mutation for the rest of its life.
    ///
    /// Constant cells are never released by counting or by the cycle
    /// collector; [`Heap::sweep`] clears their contents at teardown.
    pub fn make_constant(&self, gc: &Gc<T>) {
        let cell = gc.cell();
        cell.add_flag(CellFlags::CONSTANT);
        cell.remove_flag(CellFlags::SUSPECT);
        self.shared.registry.lock().suspects.remove(&gc.addr());
    }

    pub fn stats(&self) -> HeapStats {
        let (live, suspects) = {
            let registry = self.shared.registry.lock();
            (registry.live.len(), registry.suspects.len())
        };
        let c = &self.shared.counters;
        HeapStats {
            live,
            suspects,
            allocated: c.allocated.load(Ordering::Relaxed),
            recycled: c.recycled.load(Ordering::Relaxed),
            finalized: c.finalized.load(Ordering::Relaxed),
            cycle_passes: c.cycle_passes.load(Ordering::Relaxed),
            cycle_reclaimed: c.cycle_reclaimed.load(Ordering::Relaxed),
        }
    }

    /// Run a cycle pass rooted at the current suspects, bounded by
    /// `max_traversal`. Falls back to a full pass when the bound is hit.
    pub fn collect_cycles(&self) -> CycleReport {
        let seeds: Vec<usize> = {
            let mut registry = self.shared.registry.lock();
            registry.suspects.drain().collect()
        };
        let report =
            cycle::collect(&self.shared, seeds, Some(self.settings.max_traversal));
        if report.truncated {
            log::debug!(
                "cycle pass truncated after {} cells; running full pass",
                report.visited
            );
            let full = self.collect_all();
            return report.merge(full);
        }
        report
    }

    /// Run a cycle pass over every live cell.
    pub fn collect_all(&self) -> CycleReport {
        let seeds: Vec<usize> = {
            let mut registry = self.shared.registry.lock();
            registry.suspects.clear();
            registry.live.iter().copied().collect()
        };
        cycle::collect(&self.shared, seeds, None)
    }

    /// Run a cycle pass rooted at `candidate`, visiting at most `max_nodes`
    /// cells.
    pub fn collect_from(&self, candidate: &Gc<T>, max_nodes: usize) -> CycleReport {
        cycle::collect(&self.shared, vec![candidate.addr()], Some(max_nodes.max(1)))
    }

    /// Apply the collection policy. Intended for quiescent points such as
    /// event boundaries, when no cell is borrowed.
    pub fn maybe_collect(&self) -> Option<CycleReport> {
        let suspects = self.shared.registry.lock().suspects.len();
        if suspects < self.settings.collect_threshold {
            return None;
        }
        Some(self.collect_cycles())
    }

    /// Clear the contents of every live cell, constants included.
    ///
    /// Used at teardown to break every remaining cycle. Handles held
    /// elsewhere stay valid but observe empty values.
    pub fn sweep(&self) {
        let mut handles = Vec::new();
        let mut constants = Vec::new();
        {
            let registry = self.shared.registry.lock();
            for &addr in registry.live.iter() {
                match self.shared.try_upgrade(addr) {
                    Some(gc) => handles.push(gc),
                    None => {
                        if let Some(ptr) = NonNull::new(addr as *mut GcBox<T>) {
                            // SAFETY: registered cells are allocated.
                            let cell = unsafe { ptr.as_ref() };
                            if cell.flags().contains(CellFlags::CONSTANT) {
                                constants.push(CellPtr(ptr));
                            }
                        }
                    }
                }
            }
        }
        for gc in &handles {
            if let Ok(mut value) = gc.try_borrow_mut() {
                value.clear();
            }
        }
        for CellPtr(ptr) in constants {
            // SAFETY: constant cells are never deallocated.
            let cell = unsafe { ptr.as_ref() };
            if let Ok(mut value) = cell.value.try_borrow_mut() {
                value.clear();
            }
        }
        drop(handles);
    }
}

impl<T: Trace> Drop for Heap<T> {
    fn drop(&mut self) {
        let free: Vec<CellPtr<T>> = {
            let mut registry = self.shared.registry.lock();
            registry.free.drain().flat_map(|(_, cells)| cells).collect()
        };
        for CellPtr(ptr) in free {
            // SAFETY: free-list cells are owned by the heap alone.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static FINALIZED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Node {
        edges: Vec<Gc<Node>>,
        class: Option<u32>,
        tracked: bool,
    }

    impl Trace for Node {
        fn trace(&self, visitor: &mut dyn FnMut(&Gc<Self>)) {
            for edge in &self.edges {
                visitor(edge);
            }
        }

        fn clear(&mut self) {
            self.edges.clear();
        }

        fn recycle_key(&self) -> Option<u32> {
            self.class
        }

        fn finalize(&mut self) {
            if self.tracked {
                FINALIZED.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn heap() -> Heap<Node> {
        Heap::new(HeapSettings::default()).unwrap()
    }

    // ── Settings ───────────────────────────────────────────────────

    #[test]
    fn settings_validate() {
        assert!(HeapSettings::default().validate().is_ok());
        let bad = HeapSettings {
            collect_threshold: 0,
            ..HeapSettings::default()
        };
        assert!(bad.validate().is_err());
        assert!(Heap::<Node>::new(bad).is_err());
    }

    // ── Counting ───────────────────────────────────────────────────

    #[test]
    fn clone_and_drop_pair_up() {
        let heap = heap();
        let a = heap.alloc(Node::default());
        assert_eq!(a.refcount(), 1);
        let copies: Vec<_> = (0..10).map(|_| a.clone()).collect();
        assert_eq!(a.refcount(), 11);
        drop(copies);
        assert_eq!(a.refcount(), 1);
        drop(a);
        assert_eq!(heap.stats().live, 0);
        assert_eq!(heap.stats().finalized, 1);
    }

    #[test]
    fn releasing_parent_releases_children() {
        let heap = heap();
        let leaf = heap.alloc(Node::default());
        let parent = heap.alloc(Node {
            edges: vec![leaf.clone()],
            ..Node::default()
        });
        drop(leaf);
        assert_eq!(heap.stats().live, 2);
        drop(parent);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn long_chain_release_does_not_recurse() {
        let heap = heap();
        let mut head = heap.alloc(Node::default());
        for _ in 0..200_000 {
            head = heap.alloc(Node {
                edges: vec![head],
                ..Node::default()
            });
        }
        drop(head);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn constant_cells_ignore_counting() {
        let heap = heap();
        let a = heap.alloc(Node::default());
        heap.make_constant(&a);
        let b = a.clone();
        assert_eq!(a.refcount(), 1);
        drop(b);
        drop(a);
        assert_eq!(heap.stats().live, 1);
        assert_eq!(heap.stats().finalized, 0);
    }

    #[test]
    fn recycled_cells_are_reused() {
        let heap = heap();
        let a = heap.alloc(Node {
            class: Some(7),
            ..Node::default()
        });
        let addr = a.addr();
        drop(a);
        let b = heap.alloc(Node {
            class: Some(7),
            ..Node::default()
        });
        assert_eq!(b.addr(), addr);
        assert_eq!(heap.stats().recycled, 1);
    }

    // ── Cycles ─────────────────────────────────────────────────────

    fn pair(heap: &Heap<Node>) -> (Gc<Node>, Gc<Node>) {
        let a = heap.alloc(Node::default());
        let b = heap.alloc(Node {
            edges: vec![a.clone()],
            ..Node::default()
        });
        a.borrow_mut().edges.push(b.clone());
        (a, b)
    }

    #[test]
    fn unreachable_cycle_is_reclaimed() {
        let heap = heap();
        let (a, b) = pair(&heap);
        drop(a);
        drop(b);
        assert_eq!(heap.stats().live, 2);
        let report = heap.collect_cycles();
        assert_eq!(report.reclaimed, 2);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn externally_held_cycle_survives() {
        let heap = heap();
        let (a, b) = pair(&heap);
        drop(b);
        let report = heap.collect_all();
        assert_eq!(report.reclaimed, 0);
        assert_eq!(heap.stats().live, 2);
        assert_eq!(a.refcount(), 2);
        assert_eq!(a.borrow().edges.len(), 1);
        drop(a);
        heap.collect_all();
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn garbage_pointing_at_live_cell_only_releases_garbage() {
        let heap = heap();
        let keep = heap.alloc(Node::default());
        let (a, b) = pair(&heap);
        a.borrow_mut().edges.push(keep.clone());
        drop(a);
        drop(b);
        assert_eq!(keep.refcount(), 2);
        let report = heap.collect_all();
        assert_eq!(report.reclaimed, 2);
        assert_eq!(keep.refcount(), 1);
        assert_eq!(heap.stats().live, 1);
    }

    #[test]
    fn bounded_pass_is_conservative() {
        let heap = heap();
        // A ring of 16 cells; a bound of 4 cannot see the whole ring.
        let first = heap.alloc(Node::default());
        let mut prev = first.clone();
        for _ in 0..15 {
            let next = heap.alloc(Node {
                edges: vec![prev.clone()],
                ..Node::default()
            });
            prev = next;
        }
        first.borrow_mut().edges.push(prev.clone());
        drop(prev);
        let report = heap.collect_from(&first, 4);
        assert_eq!(report.reclaimed, 0);
        assert!(report.truncated);
        drop(first);
        let report = heap.collect_all();
        assert_eq!(report.reclaimed, 16);
    }

    #[test]
    fn cycle_members_finalize_once() {
        let heap = heap();
        let before = FINALIZED.load(Ordering::SeqCst);
        let a = heap.alloc(Node {
            tracked: true,
            ..Node::default()
        });
        let b = heap.alloc(Node {
            edges: vec![a.clone()],
            tracked: true,
            ..Node::default()
        });
        a.borrow_mut().edges.push(b.clone());
        drop(a);
        drop(b);
        heap.collect_all();
        heap.collect_all();
        assert_eq!(FINALIZED.load(Ordering::SeqCst) - before, 2);
    }

    #[test]
    fn maybe_collect_respects_threshold() {
        let heap = Heap::new(HeapSettings {
            collect_threshold: 2,
            ..HeapSettings::default()
        })
        .unwrap();
        assert!(heap.maybe_collect().is_none());
        let (a, b) = pair(&heap);
        drop(a);
        drop(b);
        let report = heap.maybe_collect().unwrap();
        assert_eq!(report.reclaimed, 2);
    }

    #[test]
    fn sweep_breaks_everything() {
        let heap = heap();
        let (a, b) = pair(&heap);
        heap.make_constant(&b);
        heap.sweep();
        assert!(a.borrow().edges.is_empty());
        assert!(b.borrow().edges.is_empty());
    }

    // ── Threads ────────────────────────────────────────────────────

    #[test]
    fn handles_drop_on_other_threads() {
        let heap = heap();
        let a = heap.alloc(Node::default());
        let b = heap.alloc(Node::default());
        a.borrow_mut().edges.push(b.clone());
        let moved = (a.clone(), b);
        std::thread::spawn(move || drop(moved)).join().unwrap();
        assert_eq!(a.refcount(), 1);
        assert_eq!(heap.stats().live, 2);
        drop(a);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn contents_stay_on_the_owner_thread() {
        let heap = heap();
        let a = heap.alloc(Node::default());
        let moved = a.clone();
        let result = std::thread::spawn(move || moved.borrow().edges.len()).join();
        assert!(result.is_err());
        assert_eq!(a.refcount(), 1);
        assert!(a.borrow().edges.is_empty());
    }
}
