//! Reference tracking (C7, part one): the three channels that keep an edge
//! reachable across a stop-the-world GC.
//!
//! - **Persistent registry.** [`RefTracker::protect`] registers a
//!   long-lived edge (a circuit's working state variable, a gate-table
//!   entry) as a permanent root until explicitly unprotected.
//! - **Value stack.** A thread-local LIFO that recursive diagram algorithms
//!   push their live operands onto before any call that could trigger GC,
//!   and pop on the way back out. [`ScopedRef`] is the RAII helper the
//!   design notes recommend so every exit path pops automatically.
//! - **Task stack.** `spawn_ref`/`sync_ref` (provided by [`crate::parallel`])
//!   build on the same value stack: a spawned child's operand is pushed for
//!   the duration of the fork and popped once the join completes, so no
//!   separate bookkeeping is needed here.

use crate::edge::Edge;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_TRACKER_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Per-thread value stacks, keyed by owning tracker id. Keyed rather
    /// than one-stack-per-thread because a process may run more than one
    /// `Engine` (and hence more than one `RefTracker`) concurrently, e.g. in
    /// tests.
    static LOCAL_STACKS: RefCell<HashMap<usize, Arc<Mutex<Vec<Edge>>>>> = RefCell::new(HashMap::new());
}

/// Opaque handle to a persistently protected edge.
pub struct Protected {
    tracker_id: usize,
    id: usize,
}

/// Owns the persistent registry and the registry of every worker thread's
/// value stack.
pub struct RefTracker {
    id: usize,
    persistent: Mutex<HashMap<usize, Arc<AtomicU64>>>,
    next_persistent_id: AtomicUsize,
    thread_stacks: Mutex<Vec<Arc<Mutex<Vec<Edge>>>>>,
}

impl RefTracker {
    pub fn new() -> Self {
        Self {
            id: NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed),
            persistent: Mutex::new(HashMap::new()),
            next_persistent_id: AtomicUsize::new(1),
            thread_stacks: Mutex::new(Vec::new()),
        }
    }

    fn local_stack(&self) -> Arc<Mutex<Vec<Edge>>> {
        LOCAL_STACKS.with(|cell| {
            cell.borrow_mut()
                .entry(self.id)
                .or_insert_with(|| {
                    let stack = Arc::new(Mutex::new(Vec::new()));
                    self.thread_stacks.lock().unwrap().push(stack.clone());
                    stack
                })
                .clone()
        })
    }

    /// Pushes `edge` onto the calling thread's value stack.
    pub fn push(&self, edge: Edge) {
        self.local_stack().lock().unwrap().push(edge);
    }

    /// Pops `count` entries off the calling thread's value stack.
    pub fn pop(&self, count: usize) {
        let stack = self.local_stack();
        let mut guard = stack.lock().unwrap();
        let new_len = guard.len().saturating_sub(count);
        guard.truncate(new_len);
    }

    /// Registers `edge` as a permanent GC root. The returned handle's value
    /// can be updated in place via [`RefTracker::update_protected`] as the
    /// diagram it denotes evolves (e.g. a circuit's working state).
    pub fn protect(&self, edge: Edge) -> Protected {
        let id = self.next_persistent_id.fetch_add(1, Ordering::Relaxed);
        self.persistent.lock().unwrap().insert(id, Arc::new(AtomicU64::new(edge)));
        Protected { tracker_id: self.id, id }
    }

    pub fn unprotect(&self, handle: &Protected) {
        debug_assert_eq!(handle.tracker_id, self.id, "Protected handle used with the wrong RefTracker");
        self.persistent.lock().unwrap().remove(&handle.id);
    }

    pub fn update_protected(&self, handle: &Protected, edge: Edge) {
        debug_assert_eq!(handle.tracker_id, self.id, "Protected handle used with the wrong RefTracker");
        if let Some(cell) = self.persistent.lock().unwrap().get(&handle.id) {
            cell.store(edge, Ordering::Release);
        }
    }

    pub fn protected_value(&self, handle: &Protected) -> Edge {
        debug_assert_eq!(handle.tracker_id, self.id, "Protected handle used with the wrong RefTracker");
        self.persistent
            .lock()
            .unwrap()
            .get(&handle.id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Rewrites every root edge in place through `f`. Called once by GC's
    /// final step, after the node/weight tables have been rebuilt, so that
    /// every channel's stored handles point into the new tables instead of
    /// the (about to be dropped) old ones. The caller must ensure no other
    /// thread is pushing/popping or updating a protected value concurrently
    /// (GC's stop-the-world barrier guarantees this).
    pub fn remap_all(&self, mut f: impl FnMut(Edge) -> Edge) {
        for cell in self.persistent.lock().unwrap().values() {
            let old = cell.load(Ordering::Acquire);
            cell.store(f(old), Ordering::Release);
        }
        for stack in self.thread_stacks.lock().unwrap().iter() {
            let mut guard = stack.lock().unwrap();
            for slot in guard.iter_mut() {
                *slot = f(*slot);
            }
        }
    }

    /// Every edge currently reachable as a GC root: the persistent registry
    /// plus every worker thread's value stack.
    pub fn roots(&self) -> Vec<Edge> {
        let mut out: Vec<Edge> = self
            .persistent
            .lock()
            .unwrap()
            .values()
            .map(|c| c.load(Ordering::Acquire))
            .collect();
        for stack in self.thread_stacks.lock().unwrap().iter() {
            out.extend(stack.lock().unwrap().iter().copied());
        }
        out
    }
}

impl Default for RefTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII scoped-acquisition guard: pushes its edges onto the tracker's
/// thread-local value stack on construction, pops them on every exit path
/// (normal return, early return, or unwind) via `Drop`.
pub struct ScopedRef<'a> {
    tracker: &'a RefTracker,
    count: usize,
}

impl<'a> ScopedRef<'a> {
    pub fn push(tracker: &'a RefTracker, edges: &[Edge]) -> Self {
        for &e in edges {
            tracker.push(e);
        }
        Self { tracker, count: edges.len() }
    }
}

impl Drop for ScopedRef<'_> {
    fn drop(&mut self) {
        self.tracker.pop(self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protect_then_unprotect_removes_root() {
        let t = RefTracker::new();
        let h = t.protect(42);
        assert!(t.roots().contains(&42));
        t.unprotect(&h);
        assert!(!t.roots().contains(&42));
    }

    #[test]
    fn update_protected_changes_the_tracked_value() {
        let t = RefTracker::new();
        let h = t.protect(1);
        t.update_protected(&h, 2);
        assert_eq!(t.protected_value(&h), 2);
    }

    #[test]
    fn scoped_ref_pops_on_drop() {
        let t = RefTracker::new();
        {
            let _guard = ScopedRef::push(&t, &[10, 20]);
            assert!(t.roots().contains(&10));
            assert!(t.roots().contains(&20));
        }
        assert!(!t.roots().contains(&10));
        assert!(!t.roots().contains(&20));
    }

    #[test]
    fn roots_combine_persistent_and_stack_channels() {
        let t = RefTracker::new();
        let h = t.protect(7);
        t.push(8);
        let roots = t.roots();
        assert!(roots.contains(&7));
        assert!(roots.contains(&8));
        t.pop(1);
        let _ = h;
    }
}
