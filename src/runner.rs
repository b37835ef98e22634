use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::{IdCounter, Map};
use crate::graph::{Priority, TaskGraph};
use crate::namespace::{
    NamespaceId, NamespaceToken, PrioritizedTask, TaskNamespace, FIRST_NAMESPACE_ID,
};
use crate::task::TaskRef;
use crate::trace::{
    trace_graph_submit, trace_namespace_finished, trace_task_run_end, trace_task_run_start,
    trace_tasks_canceled,
};

/// Entry of the namespace heap: the head-task priority of a namespace,
/// snapshotted when the entry was pushed. Entries are discarded and the
/// heap rebuilt from the namespace map whenever head priorities may have
/// shifted, so a snapshot is never observed stale.
struct ReadyNamespace {
    head_priority: Priority,
    id: NamespaceId,
}

// Reversed like the task comparison: the namespace whose head task has the
// smallest priority value is dispatched first.
impl Ord for ReadyNamespace {
    fn cmp(&self, other: &Self) -> Ordering {
        other.head_priority.cmp(&self.head_priority)
    }
}

impl PartialOrd for ReadyNamespace {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReadyNamespace {
    fn eq(&self, other: &Self) -> bool {
        self.head_priority == other.head_priority
    }
}

impl Eq for ReadyNamespace {}

struct RunnerState {
    namespaces: Map<NamespaceId, TaskNamespace>,
    ready_to_run_namespaces: BinaryHeap<ReadyNamespace>,
    running_tasks: Vec<Option<TaskRef>>,
    namespace_ids: IdCounter,
    next_thread_index: usize,
    shutdown: bool,
}

impl RunnerState {
    fn get_namespace_mut(&mut self, id: NamespaceId) -> &mut TaskNamespace {
        self.namespaces
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Asking for invalid namespace id={}", id))
    }

    fn is_task_running(&self, task: &TaskRef) -> bool {
        self.running_tasks
            .iter()
            .any(|slot| slot.as_ref().map_or(false, |running| Arc::ptr_eq(running, task)))
    }

    /// Restores the invariant that the namespace heap holds exactly the
    /// namespaces with a non-empty ready heap, keyed by their current head
    /// task.
    fn rebuild_ready_namespaces(&mut self) {
        self.ready_to_run_namespaces.clear();
        for (id, namespace) in &self.namespaces {
            if let Some(head) = namespace.ready_to_run_tasks.peek() {
                self.ready_to_run_namespaces.push(ReadyNamespace {
                    head_priority: head.priority,
                    id: *id,
                });
            }
        }
    }
}

struct Shared {
    state: Mutex<RunnerState>,
    ready_cv: Condvar,
    finished_cv: Condvar,
}

/// A pool of worker threads executing per-namespace task graphs.
///
/// All scheduler state sits behind one mutex; the lock is released only
/// while a task body runs. Origins drain a namespace by submitting an
/// empty graph, waiting for running tasks and collecting the rest; the
/// runner must be fully drained before it is dropped.
pub struct TaskGraphRunner {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl TaskGraphRunner {
    pub fn new(num_threads: usize, thread_name_prefix: &str) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(RunnerState {
                namespaces: Map::new(),
                ready_to_run_namespaces: BinaryHeap::new(),
                // Slot 0 must exist even with no workers so that
                // `run_task_for_testing` can dispatch.
                running_tasks: vec![None; num_threads.max(1)],
                namespace_ids: IdCounter::new(FIRST_NAMESPACE_ID),
                next_thread_index: 0,
                shutdown: false,
            }),
            ready_cv: Condvar::new(),
            finished_cv: Condvar::new(),
        });

        let workers = (0..num_threads)
            .map(|i| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("{}{}", thread_name_prefix, i + 1))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    /// Issues the identity for a new namespace. The namespace itself is
    /// created lazily by the first `set_task_graph` with this token.
    pub fn get_namespace_token(&self) -> NamespaceToken {
        let mut state = self.shared.state.lock();
        let id = state.namespace_ids.next();
        assert!(!state.namespaces.contains_key(&id));
        NamespaceToken::new(id)
    }

    /// Replaces the namespace's graph with `graph`, leaving the remnant of
    /// the previous graph in `graph` for the caller to inspect or reuse.
    ///
    /// Tasks present in both graphs keep their progress; tasks dropped by
    /// the new graph that never started are completed-by-cancellation, so
    /// the origin sees a completion for every task it ever submitted.
    pub fn set_task_graph(&self, token: NamespaceToken, graph: &mut TaskGraph) {
        assert!(token.is_valid());
        #[cfg(debug_assertions)]
        graph.sanity_check();

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        assert!(!state.shutdown);

        trace_graph_submit(token.id(), graph.nodes.len(), graph.edges.len());
        log::debug!(
            "Task graph submitted: namespace={} nodes={} edges={}",
            token.id(),
            graph.nodes.len(),
            graph.edges.len()
        );

        // Take the namespace out of the map so the new graph can be merged
        // against it without aliasing the rest of the runner state.
        let mut namespace = state.namespaces.remove(&token.id()).unwrap_or_default();

        // Tasks that finished while the new graph was being built still
        // count in its dependency numbers; settle those first.
        for completed in &namespace.completed_tasks {
            let _ = graph.decrement_dependents(completed);
        }

        // Build the new ready heap. Nodes carried over from the previous
        // graph are removed from it; whatever remains afterwards was
        // superseded.
        let mut ready_to_run_tasks = Vec::new();
        for node in &graph.nodes {
            if let Some(position) = namespace
                .graph
                .nodes
                .iter()
                .position(|old| Arc::ptr_eq(&old.task, &node.task))
            {
                namespace.graph.nodes.swap_remove(position);
            }
            if node.dependencies > 0 {
                continue;
            }
            if node.task.state().has_finished_running() {
                continue;
            }
            if state.is_task_running(&node.task) {
                continue;
            }
            ready_to_run_tasks.push(PrioritizedTask::new(node.task.clone(), node.priority));
        }
        namespace.ready_to_run_tasks = BinaryHeap::from(ready_to_run_tasks);

        // Install the new graph; the caller keeps the remnant.
        namespace.graph.swap(graph);

        // Tasks left in the remnant were dropped without ever running and
        // must still be reported back, marked by `did_run` staying false.
        // Running tasks finish naturally and report themselves.
        let mut canceled = 0usize;
        for node in &graph.nodes {
            if node.task.state().has_finished_running() {
                continue;
            }
            if state.is_task_running(&node.task) {
                continue;
            }
            namespace.completed_tasks.push(node.task.clone());
            canceled += 1;
        }
        if canceled > 0 {
            log::debug!(
                "Canceled superseded tasks: namespace={} count={}",
                token.id(),
                canceled
            );
            trace_tasks_canceled(token.id(), canceled);
        }

        state.namespaces.insert(token.id(), namespace);
        state.rebuild_ready_namespaces();

        if !state.ready_to_run_namespaces.is_empty() {
            self.shared.ready_cv.notify_one();
        }
    }

    /// Moves the namespace's accumulated completions into
    /// `completed_tasks`, which must arrive empty. A namespace drained to
    /// the all-finished state is reclaimed; it is indistinguishable from
    /// one that never existed.
    pub fn collect_completed_tasks(
        &self,
        token: NamespaceToken,
        completed_tasks: &mut Vec<TaskRef>,
    ) {
        assert!(token.is_valid());

        trace_time!("collect_completed_tasks", token.id(), {
            let mut state = self.shared.state.lock();
            let namespace = match state.namespaces.get_mut(&token.id()) {
                None => return,
                Some(namespace) => namespace,
            };

            assert!(completed_tasks.is_empty());
            std::mem::swap(completed_tasks, &mut namespace.completed_tasks);

            if namespace.has_finished_running_tasks() {
                state.namespaces.remove(&token.id());
            }
        })
    }

    /// Blocks the calling origin thread until the namespace reaches the
    /// all-finished state, or returns immediately if the namespace does
    /// not exist.
    pub fn wait_for_tasks_to_finish_running(&self, token: NamespaceToken) {
        assert!(token.is_valid());

        trace_time!("wait_for_tasks_to_finish_running", token.id(), {
            let mut state = self.shared.state.lock();
            loop {
                // Re-resolve on every pass: a collect on another thread
                // may reclaim the namespace while this one sleeps.
                let finished = match state.namespaces.get(&token.id()) {
                    None => return,
                    Some(namespace) => namespace.has_finished_running_tasks(),
                };
                if finished {
                    break;
                }
                self.shared.finished_cv.wait(&mut state);
            }
            // The condition variable is shared by every namespace; pass
            // the wakeup along to origins waiting on a different one.
            self.shared.finished_cv.notify_one();
        })
    }

    /// Dispatches a single ready task on the calling thread, using worker
    /// slot 0. Returns false when nothing is ready. This is the
    /// single-stepping entry point for deterministic scheduler tests on a
    /// runner with zero worker threads.
    pub fn run_task_for_testing(&self) -> bool {
        let mut guard = self.shared.state.lock();
        if guard.ready_to_run_namespaces.is_empty() {
            return false;
        }
        run_task_with_lock_acquired(&self.shared, &mut guard, 0);
        true
    }
}

impl Drop for TaskGraphRunner {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            assert!(state.ready_to_run_namespaces.is_empty());
            assert!(state.namespaces.is_empty());
            assert!(!state.shutdown);
            state.shutdown = true;
            log::debug!("Task graph runner shutting down");
            // One signal is enough: each worker wakes the next as it
            // exits.
            self.shared.ready_cv.notify_one();
        }
        for worker in self.workers.drain(..) {
            worker.join().expect("worker thread panicked");
        }
    }
}

fn worker_loop(shared: &Shared) {
    let mut state = shared.state.lock();
    let thread_index = state.next_thread_index;
    state.next_thread_index += 1;
    log::debug!("Worker thread started: thread_index={}", thread_index);

    loop {
        if state.ready_to_run_namespaces.is_empty() {
            // Exit once shutdown is set and no more work is pending.
            if state.shutdown {
                break;
            }
            shared.ready_cv.wait(&mut state);
            continue;
        }
        run_task_with_lock_acquired(shared, &mut state, thread_index);
    }

    log::debug!("Worker thread stopped: thread_index={}", thread_index);
    shared.ready_cv.notify_one();
}

/// Dispatches the top task of the top namespace onto `thread_index`.
///
/// The lock is released only around `run_on_worker_thread`; everything
/// else, including the dependency fan-out and the completion bookkeeping,
/// is serialised.
fn run_task_with_lock_acquired(
    shared: &Shared,
    guard: &mut MutexGuard<RunnerState>,
    thread_index: usize,
) {
    let (task, namespace_id) = {
        let state = &mut **guard;
        let ready = state
            .ready_to_run_namespaces
            .pop()
            .expect("dispatch without a ready namespace");
        let namespace_id = ready.id;

        let (task, next_head) = {
            let namespace = state.get_namespace_mut(namespace_id);
            let prioritized = namespace
                .ready_to_run_tasks
                .pop()
                .expect("ready namespace without ready tasks");
            namespace.num_running_tasks += 1;
            (
                prioritized.task,
                namespace.ready_to_run_tasks.peek().map(|head| head.priority),
            )
        };

        // The namespace stays in the heap as long as it has further ready
        // tasks, keyed by its new head.
        if let Some(head_priority) = next_head {
            state.ready_to_run_namespaces.push(ReadyNamespace {
                head_priority,
                id: namespace_id,
            });
        }

        assert!(state.running_tasks[thread_index].is_none());
        state.running_tasks[thread_index] = Some(task.clone());

        (task, namespace_id)
    };

    // More work may be available for another worker.
    shared.ready_cv.notify_one();

    task.state().will_run();
    trace_task_run_start(namespace_id, thread_index);

    MutexGuard::unlocked(guard, || {
        task.run_on_worker_thread(thread_index);
    });

    trace_task_run_end(namespace_id, thread_index);
    task.state().did_run();

    let state = &mut **guard;
    state.running_tasks[thread_index] = None;

    let namespace = state.get_namespace_mut(namespace_id);
    assert!(namespace.num_running_tasks > 0);
    namespace.num_running_tasks -= 1;

    // Fan out to the dependents of the finished task; whichever hit zero
    // dependencies becomes ready now.
    let newly_ready = namespace.graph.decrement_dependents(&task);
    for index in &newly_ready {
        let node = &namespace.graph.nodes[*index];
        namespace
            .ready_to_run_tasks
            .push(PrioritizedTask::new(node.task.clone(), node.priority));
    }

    namespace.completed_tasks.push(task);
    let finished = namespace.has_finished_running_tasks();

    // New ready tasks may have changed this namespace's head priority or
    // made the namespace ready in the first place.
    if !newly_ready.is_empty() {
        state.rebuild_ready_namespaces();
    }

    if finished {
        log::debug!("Namespace finished running tasks: namespace={}", namespace_id);
        trace_namespace_finished(namespace_id);
        shared.finished_cv.notify_one();
    }
}
