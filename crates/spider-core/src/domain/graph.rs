//! Dependency graph for task dependencies.
//!
//! Design:
//! - Forward edges: child -> parents it waits for
//! - Reverse edges: parent -> children waiting for it
//! - Invariant: edges and reverse_edges are kept in sync

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::TaskId;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// child -> parents
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// parent -> children. Answers "who is waiting for this task?" directly.
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = (TaskId, TaskId)>) -> Self {
        let mut graph = Self::new();
        for (parent, child) in edges {
            graph.add_dependency(parent, child);
        }
        graph
    }

    /// `child` cannot become ready before `parent` succeeds.
    /// Returns false if the edge was already present.
    pub fn add_dependency(&mut self, parent: TaskId, child: TaskId) -> bool {
        let inserted = self.edges.entry(child).or_default().insert(parent);
        self.reverse_edges.entry(parent).or_default().insert(child);
        inserted
    }

    /// Drop every edge touching `task`.
    pub fn remove_task(&mut self, task: TaskId) -> usize {
        let mut removed = 0;
        if let Some(parents) = self.edges.remove(&task) {
            for parent in parents {
                removed += 1;
                if let Entry::Occupied(mut e) = self.reverse_edges.entry(parent) {
                    e.get_mut().remove(&task);
                    if e.get().is_empty() {
                        e.remove_entry();
                    }
                }
            }
        }
        if let Some(children) = self.reverse_edges.remove(&task) {
            for child in children {
                removed += 1;
                if let Entry::Occupied(mut e) = self.edges.entry(child) {
                    e.get_mut().remove(&task);
                    if e.get().is_empty() {
                        e.remove_entry();
                    }
                }
            }
        }
        removed
    }

    pub fn parents(&self, task: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.edges.get(&task).into_iter().flatten().copied()
    }

    pub fn children(&self, task: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.reverse_edges.get(&task).into_iter().flatten().copied()
    }

    pub fn has_parents(&self, task: TaskId) -> bool {
        self.edges.get(&task).is_some_and(|p| !p.is_empty())
    }

    pub fn contains_edge(&self, parent: TaskId, child: TaskId) -> bool {
        self.edges.get(&child).is_some_and(|p| p.contains(&parent))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    /// Every transitive dependent of `task`, breadth first, without `task` itself.
    pub fn descendants(&self, task: TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<TaskId> = self.children(task).collect();
        while let Some(next) = queue.pop_front() {
            if next == task || !seen.insert(next) {
                continue;
            }
            order.push(next);
            queue.extend(self.children(next));
        }
        order
    }

    /// Detect a cycle.
    ///
    /// Three-colour DFS over the parent edges, iterative so deep chains do not
    /// overflow the stack. Returns the nodes of the first cycle found, in
    /// dependency order, or `None` for a DAG.
    pub fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let mut color: HashMap<TaskId, Color> = HashMap::new();

        let mut roots: Vec<TaskId> = self.edges.keys().copied().collect();
        roots.sort();

        for root in roots {
            if color.contains_key(&root) {
                continue;
            }
            // (node, its parents not yet explored)
            let mut stack: Vec<(TaskId, Vec<TaskId>)> = Vec::new();
            let mut path: Vec<TaskId> = Vec::new();
            color.insert(root, Color::Gray);
            path.push(root);
            stack.push((root, self.parents(root).collect()));

            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(parent) => match color.get(&parent) {
                        Some(Color::Gray) => {
                            let start = path.iter().position(|t| *t == parent).unwrap_or(0);
                            let mut cycle = path[start..].to_vec();
                            cycle.reverse();
                            return Some(cycle);
                        }
                        Some(Color::Black) => {}
                        None => {
                            color.insert(parent, Color::Gray);
                            path.push(parent);
                            stack.push((parent, self.parents(parent).collect()));
                        }
                    },
                    None => {
                        color.insert(node, Color::Black);
                        path.pop();
                        stack.pop();
                    }
                }
            }
        }
        None
    }
}
