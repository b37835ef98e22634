use crate::namespace::NamespaceId;

pub struct TimedScope {
    method: &'static str,
    namespace: NamespaceId,
}

impl TimedScope {
    pub fn new(method: &'static str, namespace: NamespaceId) -> Self {
        tracing::info!(
            action = "measure",
            method = method,
            namespace = namespace,
            event = "start"
        );
        Self { method, namespace }
    }
}

impl Drop for TimedScope {
    fn drop(&mut self) {
        tracing::info!(
            action = "measure",
            method = self.method,
            namespace = self.namespace,
            event = "end"
        );
    }
}

macro_rules! trace_time {
    ($method:tt, $namespace:expr, $block:expr) => {{
        let _scope = $crate::trace::TimedScope::new($method, $namespace);
        $block
    }};
}

#[inline]
pub fn trace_graph_submit(namespace: NamespaceId, num_nodes: usize, num_edges: usize) {
    tracing::info!(
        action = "submit-graph",
        namespace = namespace,
        num_nodes = num_nodes,
        num_edges = num_edges
    );
}

#[inline]
pub fn trace_task_run_start(namespace: NamespaceId, thread_index: usize) {
    tracing::info!(
        action = "run-task",
        event = "start",
        namespace = namespace,
        thread_index = thread_index
    );
}

#[inline]
pub fn trace_task_run_end(namespace: NamespaceId, thread_index: usize) {
    tracing::info!(
        action = "run-task",
        event = "end",
        namespace = namespace,
        thread_index = thread_index
    );
}

#[inline]
pub fn trace_tasks_canceled(namespace: NamespaceId, count: usize) {
    tracing::info!(action = "cancel-tasks", namespace = namespace, count = count);
}

#[inline]
pub fn trace_namespace_finished(namespace: NamespaceId) {
    tracing::info!(action = "namespace-finished", namespace = namespace);
}
