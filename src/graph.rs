use std::sync::Arc;

use smallvec::SmallVec;

use crate::task::TaskRef;

/// Scheduling urgency of a node. Smaller values run earlier.
pub type Priority = u32;

#[derive(Clone)]
pub struct Node {
    pub task: TaskRef,
    pub priority: Priority,
    pub dependencies: u32,
}

impl Node {
    pub fn new(task: TaskRef, priority: Priority, dependencies: u32) -> Self {
        Self {
            task,
            priority,
            dependencies,
        }
    }
}

/// Index pair into [`TaskGraph::nodes`]: `dependent` must not start before
/// `source` has finished running.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Edge {
    pub source: usize,
    pub dependent: usize,
}

/// A directed acyclic graph of tasks with priorities.
///
/// Plain data: the scheduler takes ownership of the content on submission
/// and hands the previous graph back through the same argument. Acyclicity
/// is a caller contract and is not checked.
#[derive(Clone, Default)]
pub struct TaskGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a node and returns its index for later `add_dependency` calls.
    pub fn add_task(&mut self, task: TaskRef, priority: Priority) -> usize {
        self.nodes.push(Node::new(task, priority, 0));
        self.nodes.len() - 1
    }

    pub fn add_dependency(&mut self, source: usize, dependent: usize) {
        assert!(source < self.nodes.len());
        assert!(dependent < self.nodes.len());
        self.edges.push(Edge { source, dependent });
        self.nodes[dependent].dependencies += 1;
    }

    pub fn swap(&mut self, other: &mut TaskGraph) {
        std::mem::swap(&mut self.nodes, &mut other.nodes);
        std::mem::swap(&mut self.edges, &mut other.edges);
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
        self.edges.clear();
    }

    /// Decrements the dependency count of every node that waits on `task`
    /// and returns the indices of nodes whose count reached zero.
    ///
    /// A linear scan over the edges is good enough here: graphs stay in
    /// the hundreds of nodes and decrements commute, so no particular
    /// order is imposed.
    pub(crate) fn decrement_dependents(&mut self, task: &TaskRef) -> SmallVec<[usize; 8]> {
        let mut newly_ready = SmallVec::new();
        for index in 0..self.edges.len() {
            let edge = self.edges[index];
            if !Arc::ptr_eq(&self.nodes[edge.source].task, task) {
                continue;
            }
            let node = &mut self.nodes[edge.dependent];
            assert!(node.dependencies > 0);
            node.dependencies -= 1;
            if node.dependencies == 0 {
                newly_ready.push(edge.dependent);
            }
        }
        newly_ready
    }

    /// Checks the submission invariants that are cheap to verify: edge
    /// endpoints are in range and every dependency count matches the edges.
    pub fn sanity_check(&self) {
        for edge in &self.edges {
            assert!(edge.source < self.nodes.len());
            assert!(edge.dependent < self.nodes.len());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            let dependencies = self.edges.iter().filter(|e| e.dependent == index).count();
            assert_eq!(node.dependencies as usize, dependencies);
        }
    }
}
