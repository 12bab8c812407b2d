//! Trial-deletion cycle collection.
//!
//! A pass takes one counted handle per visited cell and counts, for every
//! visited cell, how many of its references come from other visited cells.
//! A cell whose count exceeds that internal figure (plus our own handle) is
//! held from outside the set and is a root. Everything reachable from a
//! root survives; the rest is a group of cells kept alive only by each
//! other. Its contents are cleared together, which breaks every cycle, and
//! the final handles are then dropped so the ordinary release path frees
//! the cells.
//!
//! Cells outside the visited set are never examined, so a bounded pass only
//! ever under-approximates garbage.

use std::collections::{HashMap, VecDeque};

use crate::gc::{CellFlags, Gc, Trace};
use crate::heap::HeapShared;

/// Outcome of a cycle pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Cells examined.
    pub visited: usize,
    /// Cells found unreachable and released.
    pub reclaimed: usize,
    /// The traversal bound was reached before the frontier was exhausted.
    pub truncated: bool,
}

impl CycleReport {
    pub fn merge(self, other: CycleReport) -> CycleReport {
        CycleReport {
            visited: self.visited + other.visited,
            reclaimed: self.reclaimed + other.reclaimed,
            truncated: other.truncated,
        }
    }
}

pub(crate) fn collect<T: Trace>(
    shared: &HeapShared<T>,
    seeds: Vec<usize>,
    limit: Option<usize>,
) -> CycleReport {
    let mut members: Vec<Gc<T>> = Vec::with_capacity(seeds.len());
    let mut index: HashMap<usize, usize, ahash::RandomState> = HashMap::default();

    {
        let registry = shared.registry.lock();
        for addr in seeds {
            if index.contains_key(&addr) || !registry.live.contains(&addr) {
                continue;
            }
            if let Some(gc) = shared.try_upgrade(addr) {
                index.insert(addr, members.len());
                members.push(gc);
            }
        }
    }

    // ── Discover the candidate graph ───────────────────────────────────

    let mut edges: Vec<Vec<usize>> = Vec::with_capacity(members.len());
    let mut pinned: Vec<bool> = Vec::with_capacity(members.len());
    let mut truncated = false;
    let mut cursor = 0;
    while cursor < members.len() {
        let mut out = Vec::new();
        let mut discovered = Vec::new();
        let borrowed = match members[cursor].try_borrow() {
            Ok(value) => {
                value.trace(&mut |child| {
                    if child.is_constant() {
                        return;
                    }
                    let addr = child.addr();
                    if let Some(&at) = index.get(&addr) {
                        out.push(at);
                        return;
                    }
                    let at = members.len() + discovered.len();
                    if limit.is_some_and(|limit| at >= limit) {
                        truncated = true;
                        return;
                    }
                    index.insert(addr, at);
                    out.push(at);
                    discovered.push(child.clone());
                });
                true
            }
            // In use right now: certainly reachable from a root.
            Err(_) => false,
        };
        members.extend(discovered);
        edges.push(out);
        pinned.push(!borrowed);
        cursor += 1;
    }

    // ── Count internal references and find roots ──────────────────────

    let mut internal = vec![0u32; members.len()];
    for out in &edges {
        for &to in out {
            internal[to] += 1;
        }
    }

    let mut live = vec![false; members.len()];
    let mut worklist = VecDeque::new();
    for (i, gc) in members.iter().enumerate() {
        // One count belongs to the handle held by this pass.
        let held = gc.refcount().saturating_sub(1);
        if pinned[i] || held != internal[i] {
            if held < internal[i] {
                log::debug!(
                    "cell {:#x} traced {} internal edges but holds {} counts",
                    gc.addr(),
                    internal[i],
                    held
                );
            }
            live[i] = true;
            worklist.push_back(i);
        }
    }
    while let Some(i) = worklist.pop_front() {
        for &to in &edges[i] {
            if !live[to] {
                live[to] = true;
                worklist.push_back(to);
            }
        }
    }

    // ── Break the garbage ─────────────────────────────────────────────

    let garbage: Vec<usize> = (0..members.len()).filter(|&i| !live[i]).collect();
    for &i in &garbage {
        members[i].cell().add_flag(CellFlags::IN_CYCLE_COLLECTION);
    }
    for &i in &garbage {
        if let Ok(mut value) = members[i].try_borrow_mut() {
            value.clear();
        }
    }
    for gc in &members {
        gc.cell().remove_flag(CellFlags::SUSPECT);
    }
    {
        let mut registry = shared.registry.lock();
        for gc in &members {
            registry.suspects.remove(&gc.addr());
        }
    }

    let report = CycleReport {
        visited: members.len(),
        reclaimed: garbage.len(),
        truncated,
    };
    // Dropping our handles frees the garbage through the release path.
    for gc in members {
        gc.drop_unmarked();
    }
    shared.note_pass(&report);
    log::debug!(
        "cycle pass: visited {}, reclaimed {}{}",
        report.visited,
        report.reclaimed,
        if report.truncated { " (truncated)" } else { "" }
    );
    report
}
