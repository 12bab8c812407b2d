mod cycle;
mod gc;
mod heap;

pub use cycle::CycleReport;
pub use gc::{CellFlags, Gc, Trace};
pub use heap::{Heap, HeapSettings, HeapStats};
