#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::graph::{Priority, TaskGraph};
use crate::namespace::NamespaceToken;
use crate::runner::TaskGraphRunner;
use crate::task::{Task, TaskRef, TaskState};

/// Shared record of the order in which test tasks ran.
#[derive(Clone, Default)]
pub struct RunLog {
    entries: Arc<Mutex<Vec<usize>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push(&self, id: usize) {
        self.entries.lock().push(id);
    }

    pub fn ids(&self) -> Vec<usize> {
        self.entries.lock().clone()
    }
}

pub struct TestTask {
    id: usize,
    state: TaskState,
    log: RunLog,
    runs: AtomicUsize,
}

impl TestTask {
    pub fn new(id: usize, log: &RunLog) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: TaskState::new(),
            log: log.clone(),
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Task for TestTask {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn run_on_worker_thread(&self, _thread_index: usize) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.log.push(self.id);
    }
}

#[derive(Default)]
struct GateFlags {
    running: bool,
    released: bool,
}

/// Task that blocks inside its body until the test releases it; used to
/// exercise the paths where a task is superseded while on a worker.
pub struct GateTask {
    id: usize,
    state: TaskState,
    log: RunLog,
    flags: Mutex<GateFlags>,
    changed: Condvar,
}

impl GateTask {
    pub fn new(id: usize, log: &RunLog) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: TaskState::new(),
            log: log.clone(),
            flags: Mutex::new(GateFlags::default()),
            changed: Condvar::new(),
        })
    }

    pub fn wait_until_running(&self) {
        let mut flags = self.flags.lock();
        while !flags.running {
            self.changed.wait(&mut flags);
        }
    }

    pub fn release(&self) {
        let mut flags = self.flags.lock();
        flags.released = true;
        self.changed.notify_all();
    }
}

impl Task for GateTask {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn run_on_worker_thread(&self, _thread_index: usize) {
        let mut flags = self.flags.lock();
        flags.running = true;
        self.changed.notify_all();
        while !flags.released {
            self.changed.wait(&mut flags);
        }
        drop(flags);
        self.log.push(self.id);
    }
}

pub fn task_ref<T: Task + 'static>(task: &Arc<T>) -> TaskRef {
    task.clone()
}

/// Builds a graph from `(task, priority)` pairs and `(source, dependent)`
/// index pairs, filling in the dependency counts.
pub fn graph_of(tasks: &[(TaskRef, Priority)], edges: &[(usize, usize)]) -> TaskGraph {
    let mut graph = TaskGraph::new();
    for (task, priority) in tasks {
        graph.add_task(task.clone(), *priority);
    }
    for &(source, dependent) in edges {
        graph.add_dependency(source, dependent);
    }
    graph.sanity_check();
    graph
}

/// Runs the origin-side drain protocol: supersede everything with an
/// empty graph, wait out the running tasks, then collect what is left.
pub fn drain_namespace(runner: &TaskGraphRunner, token: NamespaceToken) -> Vec<TaskRef> {
    let mut empty = TaskGraph::new();
    runner.set_task_graph(token, &mut empty);
    runner.wait_for_tasks_to_finish_running(token);
    let mut completed_tasks = Vec::new();
    runner.collect_completed_tasks(token, &mut completed_tasks);
    completed_tasks
}
