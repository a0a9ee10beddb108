//! Minimal job handles on top of the rayon thread pool.
//!
//! The dependency tracker only needs four things from a task system:
//! scheduling work after a dependency, combining handles, blocking on a
//! handle and asking whether one handle already covers another. This module
//! provides exactly that.
//!
//! ## Execution model
//! - A scheduled job is attached as a *continuation* of its dependency. When
//!   the dependency completes, the job is spawned on the rayon pool. No pool
//!   thread ever blocks waiting for another job.
//! - A job that panics is logged and still completes its handle, so waiters
//!   are never stranded.
//! - Completed handles drop their dependency list; dependency chains do not
//!   keep finished jobs alive.
//! - Completion cascades through a per-thread queue rather than recursion.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};


type Continuation = Box<dyn FnOnce() + Send>;

thread_local! {
    static DRAINING: Cell<bool> = const { Cell::new(false) };
    static READY: RefCell<VecDeque<Continuation>> = const { RefCell::new(VecDeque::new()) };
}

/// Clears the draining flag even if a continuation unwinds.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|d| d.set(false));
    }
}

/// Runs released continuations on this thread.
///
/// A continuation that signals another handle only queues that handle's
/// continuations; the outermost call drains the queue, so a long chain of
/// combined handles completes in constant stack depth.

fn run_continuations(continuations: Vec<Continuation>) {
    READY.with(|ready| ready.borrow_mut().extend(continuations));
    if DRAINING.with(|d| d.replace(true)) { return; }

    let _guard = DrainGuard;
    while let Some(continuation) = READY.with(|ready| ready.borrow_mut().pop_front()) {
        continuation();
    }
}

#[derive(Default)]
struct JobState {
    done: bool,
    continuations: Vec<Continuation>,
    dependencies: Vec<JobHandle>,
}

#[derive(Default)]
struct JobInner {
    state: Mutex<JobState>,
    finished: Condvar,
}

impl JobInner {
    fn lock(&self) -> MutexGuard<'_, JobState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Completion handle of scheduled work.
///
/// Cloning is cheap; all clones observe the same completion.

#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobInner>,
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::completed()
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &Arc::as_ptr(&self.inner))
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for JobHandle {}

impl JobHandle {
    /// A handle that is already complete.
    pub fn completed() -> Self {
        let inner = JobInner::default();
        inner.lock().done = true;
        Self { inner: Arc::new(inner) }
    }

    /// A pending handle completed explicitly through [`JobHandle::signal`].
    ///
    /// Used for work driven outside the pool (I/O callbacks, tests).
    pub fn manual() -> Self {
        Self { inner: Arc::new(JobInner::default()) }
    }

    fn pending_after(dependencies: Vec<JobHandle>) -> Self {
        let inner = JobInner::default();
        inner.lock().dependencies = dependencies;
        Self { inner: Arc::new(inner) }
    }

    /// Runs `work` on the rayon pool once `depends_on` has completed.
    ///
    /// ## Panics
    /// Never propagates a panic from `work`; it is logged and the returned
    /// handle completes anyway.

    pub fn schedule<F>(work: F, depends_on: &JobHandle) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = Self::pending_after(vec![depends_on.clone()]);
        let finished = handle.clone();

        depends_on.on_complete(Box::new(move || {
            rayon::spawn(move || {
                if catch_unwind(AssertUnwindSafe(work)).is_err() {
                    log::warn!("scheduled job panicked; completing its handle");
                }
                finished.signal();
            });
        }));
        handle
    }

    /// Handle that completes once every handle in `handles` has.
    pub fn combine(handles: &[JobHandle]) -> JobHandle {
        let pending: Vec<JobHandle> = handles.iter().filter(|h| !h.is_completed()).cloned().collect();
        match pending.len() {
            0 => return Self::completed(),
            1 => return pending[0].clone(),
            _ => {}
        }

        let combined = Self::pending_after(pending.clone());
        let remaining = Arc::new(AtomicUsize::new(pending.len()));
        for handle in &pending {
            let remaining = Arc::clone(&remaining);
            let combined = combined.clone();
            handle.on_complete(Box::new(move || {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    combined.signal();
                }
            }));
        }
        combined
    }

    /// Marks the handle complete and releases its continuations.
    ///
    /// Signalling a completed handle is a no-op.

    pub fn signal(&self) {
        let continuations = {
            let mut state = self.inner.lock();
            if state.done { return; }
            state.done = true;
            state.dependencies.clear();
            std::mem::take(&mut state.continuations)
        };
        self.inner.finished.notify_all();

        if !continuations.is_empty() {
            run_continuations(continuations);
        }
    }

    fn on_complete(&self, continuation: Continuation) {
        let mut state = self.inner.lock();
        if state.done {
            drop(state);
            continuation();
        } else {
            state.continuations.push(continuation);
        }
    }

    /// Blocks the calling thread until the handle completes.
    pub fn complete(&self) {
        let mut state = self.inner.lock();
        while !state.done {
            state = match self.inner.finished.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Returns `true` once the handle has completed.
    pub fn is_completed(&self) -> bool {
        self.inner.lock().done
    }

    /// Returns `true` if waiting on `self` guarantees `other` has completed.
    ///
    /// ## Behavior
    /// `other` is covered when it has already completed, is `self`, or is
    /// reachable through the pending dependencies of `self`.

    pub fn depends_on(&self, other: &JobHandle) -> bool {
        if other.is_completed() || self == other { return true; }

        let mut visited: HashSet<*const JobInner> = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(handle) = stack.pop() {
            if !visited.insert(Arc::as_ptr(&handle.inner)) { continue; }
            let dependencies = handle.inner.lock().dependencies.clone();
            for dependency in dependencies {
                if dependency == *other { return true; }
                stack.push(dependency);
            }
        }
        false
    }
}
