use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::graph::{Priority, TaskGraph};
use crate::task::TaskRef;

pub type NamespaceId = u64;

/// Namespace ids start at 1; 0 never names a live namespace.
pub(crate) const FIRST_NAMESPACE_ID: NamespaceId = 1;

/// Opaque identity of a client namespace, issued by
/// [`TaskGraphRunner::get_namespace_token`](crate::TaskGraphRunner::get_namespace_token).
///
/// Tokens are cheap values; copies stay interchangeable across
/// submissions, collections and waits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NamespaceToken(NamespaceId);

impl NamespaceToken {
    pub(crate) fn new(id: NamespaceId) -> Self {
        Self(id)
    }

    #[inline]
    pub fn id(&self) -> NamespaceId {
        self.0
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

pub(crate) struct PrioritizedTask {
    pub task: TaskRef,
    pub priority: Priority,
}

impl PrioritizedTask {
    pub fn new(task: TaskRef, priority: Priority) -> Self {
        Self { task, priority }
    }
}

// The ready heaps are max-heaps in which the smallest priority value wins,
// so the comparison is reversed. Ties are left unspecified.
impl Ord for PrioritizedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other.priority.cmp(&self.priority)
    }
}

impl PartialOrd for PrioritizedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PrioritizedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for PrioritizedTask {}

/// Per-client scheduler state. One namespace owns the authoritative graph
/// of its client, the heap of tasks that may start right now, the
/// completions the client has not collected yet and the count of its tasks
/// currently on worker threads.
#[derive(Default)]
pub(crate) struct TaskNamespace {
    pub graph: TaskGraph,
    pub ready_to_run_tasks: BinaryHeap<PrioritizedTask>,
    pub completed_tasks: Vec<TaskRef>,
    pub num_running_tasks: u32,
}

impl TaskNamespace {
    /// A namespace is finished once nothing is queued, nothing is running
    /// and the graph itself has been emptied by a final empty submission.
    pub fn has_finished_running_tasks(&self) -> bool {
        self.ready_to_run_tasks.is_empty()
            && self.num_running_tasks == 0
            && self.graph.nodes.is_empty()
    }
}
