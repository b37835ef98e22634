use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle flags shared by every task implementation.
///
/// `did_run` moves from `false` to `true` exactly once, right after the
/// task body returned on a worker thread. The runner drives both
/// transitions under its lock; origin threads may poll
/// `has_finished_running` at any time.
#[derive(Debug, Default)]
pub struct TaskState {
    did_run: AtomicBool,
}

impl TaskState {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn will_run(&self) {
        assert!(!self.has_finished_running());
    }

    pub fn did_run(&self) {
        self.did_run.store(true, Ordering::Release);
    }

    #[inline]
    pub fn has_finished_running(&self) -> bool {
        self.did_run.load(Ordering::Acquire)
    }
}

/// A unit of work executed at most once on some worker thread.
///
/// Implementations embed a [`TaskState`] and hand it out through
/// [`Task::state`]. The body runs with the scheduler lock released and
/// must not call back into the runner, directly or indirectly.
pub trait Task: Send + Sync {
    fn state(&self) -> &TaskState;

    fn run_on_worker_thread(&self, thread_index: usize);
}

pub type TaskRef = Arc<dyn Task>;
