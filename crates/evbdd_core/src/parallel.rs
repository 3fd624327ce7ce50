//! Parallel runtime shim (C9).
//!
//! The recursive diagram algebra forks one child and computes the other on
//! the current worker, exactly the shape `rayon::join` already provides —
//! so this module is a thin wrapper rather than a hand-rolled scheduler.
//! `N` (the worker count configured at [`crate::Engine::init`]) becomes
//! `rayon::ThreadPoolBuilder::num_threads`; work-stealing across workers is
//! whatever the pool already does.
//!
//! [`fork_join`] is the primitive every recursive op in [`crate::algebra`]
//! uses: it pushes both live operands onto the calling thread's value stack
//! for the duration of the fork (the only window in which this worker could
//! be asked to participate in someone else's GC-triggering allocation),
//! computes the right branch locally, and blocks on the left branch's
//! result before popping. [`spawn_ref`]/[`TaskHandle::sync_ref`] additionally
//! expose the source's task-reference-stack API directly, for callers that
//! need a genuine non-blocking handle rather than `rayon::join`'s
//! fork-and-immediately-block shape.

use crate::edge::Edge;
use crate::refs::{RefTracker, ScopedRef};
use std::sync::mpsc;

/// Runs `left` and `right` — potentially on different workers — and returns
/// both results once both complete.
///
/// `live` lists every edge the caller must keep reachable for the duration
/// of the fork (typically the two operands the recursion is about to
/// decompose); they are pushed onto the value stack before either closure
/// runs and popped once both have returned, regardless of which one panics.
pub fn fork_join<L, R, TL, TR>(pool: &rayon::ThreadPool, refs: &RefTracker, live: &[Edge], left: L, right: R) -> (TL, TR)
where
    L: FnOnce() -> TL + Send,
    R: FnOnce() -> TR + Send,
    TL: Send,
    TR: Send,
{
    let _guard = ScopedRef::push(refs, live);
    pool.install(|| rayon::join(left, right))
}

/// A non-blocking handle to a task dispatched onto the engine's pool.
///
/// Backed by a one-shot channel rather than `rayon::join`'s
/// fork-and-immediately-block: the calling thread can do other work (push
/// more operands, spawn further tasks) before eventually calling
/// [`TaskHandle::sync_ref`].
pub struct TaskHandle {
    rx: mpsc::Receiver<Edge>,
}

impl TaskHandle {
    /// Blocks until the spawned task completes and returns its edge.
    ///
    /// Per §4.7/§4.9, once a task is synced its result becomes an ordinary
    /// value-stack entry in the caller's scope (the caller is expected to
    /// protect it via [`ScopedRef`]/`RefTracker::push` immediately if it
    /// needs to survive past this point); this call itself performs no
    /// stack bookkeeping; the caller's recursion frame may already be
    /// closing.
    pub fn sync_ref(self) -> Edge {
        self.rx.recv().expect("spawned task dropped its sender without sending a result")
    }
}

/// Dispatches `task` onto `pool` and returns a handle to sync on later.
///
/// The task is recorded as "in flight" purely by virtue of the channel
/// holding its eventual result; per §4.7's task-reference-stack channel,
/// GC may run only between top-level client operations in this engine
/// (never while a `spawn_ref`'d task is outstanding), so there is no
/// separate bookkeeping structure to register the handle in — the
/// `Engine`'s top-level entry points simply never call `gc_now` while one
/// of their own `fork_join`/`spawn_ref` calls is unresolved.
pub fn spawn_ref<F>(pool: &rayon::ThreadPool, task: F) -> TaskHandle
where
    F: FnOnce() -> Edge + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    pool.spawn(move || {
        let result = task();
        let _ = tx.send(result);
    });
    TaskHandle { rx }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(n: usize) -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(n).build().unwrap()
    }

    #[test]
    fn fork_join_runs_both_closures() {
        let pool = test_pool(2);
        let refs = RefTracker::new();
        let (a, b) = fork_join(&pool, &refs, &[1, 2], || 10, || 20);
        assert_eq!(a, 10);
        assert_eq!(b, 20);
    }

    #[test]
    fn fork_join_is_correct_single_threaded() {
        let pool = test_pool(1);
        let refs = RefTracker::new();
        let (a, b) = fork_join(&pool, &refs, &[], || 1 + 1, || 2 + 2);
        assert_eq!((a, b), (2, 4));
    }

    #[test]
    fn spawn_ref_then_sync_ref_roundtrips() {
        let pool = test_pool(2);
        let handle = spawn_ref(&pool, || 42);
        assert_eq!(handle.sync_ref(), 42);
    }
}
