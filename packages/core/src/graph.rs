//! In-memory task graph builder.
//!
//! Tasks live in an arena and refer to each other by [`NodeIndex`]. Edges are
//! only ever added towards newly inserted nodes, so the graph stays acyclic.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::error::GraphError;
use crate::task::{TaskBody, TaskGuard, TaskId};

/// Position of a task in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A task together with its edges.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: TaskId,
    pub body: TaskBody,
    pub guard: TaskGuard,
    predecessors: BTreeSet<NodeIndex>,
    successors: BTreeSet<NodeIndex>,
    parent: Option<NodeIndex>,
    children: BTreeSet<NodeIndex>,
}

impl TaskNode {
    fn new(body: TaskBody, guard: TaskGuard) -> Self {
        Self {
            id: TaskId::new(),
            body,
            guard,
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
            parent: None,
            children: BTreeSet::new(),
        }
    }

    pub fn predecessors(&self) -> &BTreeSet<NodeIndex> {
        &self.predecessors
    }

    pub fn successors(&self) -> &BTreeSet<NodeIndex> {
        &self.successors
    }

    /// Meta task this node was spliced in under, if any.
    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    pub fn children(&self) -> &BTreeSet<NodeIndex> {
        &self.children
    }
}

/// Directed acyclic graph of tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: NodeIndex) -> Option<&TaskNode> {
        self.nodes.get(index.0)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &TaskNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeIndex(i), node))
    }

    pub fn index_of(&self, id: TaskId) -> Option<NodeIndex> {
        self.nodes.iter().position(|n| n.id == id).map(NodeIndex)
    }

    /// Nodes without predecessors.
    pub fn roots(&self) -> Vec<NodeIndex> {
        self.nodes()
            .filter(|(_, n)| n.predecessors.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Nodes without successors: the frontier new work is appended to.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        self.nodes()
            .filter(|(_, n)| n.successors.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Add a root-eligible task with the default guard.
    pub fn add_task(&mut self, body: TaskBody) -> NodeIndex {
        self.add_task_with_guard(body, TaskGuard::default())
    }

    pub fn add_task_with_guard(&mut self, body: TaskBody, guard: TaskGuard) -> NodeIndex {
        self.nodes.push(TaskNode::new(body, guard));
        NodeIndex(self.nodes.len() - 1)
    }

    /// Add a task depending on the given predecessors.
    pub fn add_task_after(
        &mut self,
        body: TaskBody,
        guard: TaskGuard,
        predecessors: &[NodeIndex],
    ) -> Result<NodeIndex, GraphError> {
        self.check(predecessors)?;
        let index = self.add_task_with_guard(body, guard);
        for &predecessor in predecessors {
            self.link(predecessor, index);
        }
        Ok(index)
    }

    /// Add a task depending on every current leaf, with the default guard.
    pub fn append_task(&mut self, body: TaskBody) -> NodeIndex {
        self.append_task_with_guard(body, TaskGuard::default())
    }

    pub fn append_task_with_guard(&mut self, body: TaskBody, guard: TaskGuard) -> NodeIndex {
        let frontier = self.leaves();
        let index = self.add_task_with_guard(body, guard);
        for predecessor in frontier {
            self.link(predecessor, index);
        }
        index
    }

    /// Merge `other` next to the existing tasks.
    ///
    /// Returns the new index of every node of `other`, by its old position.
    pub fn add_graph(&mut self, other: TaskGraph) -> Vec<NodeIndex> {
        self.merge(other)
    }

    /// Merge `other` so that its roots depend on every current leaf.
    pub fn append_graph(&mut self, other: TaskGraph) -> Vec<NodeIndex> {
        let frontier = self.leaves();
        let roots = other.roots();
        let mapping = self.merge(other);
        for root in roots {
            for &predecessor in &frontier {
                self.link(predecessor, mapping[root.0]);
            }
        }
        mapping
    }

    /// Splice `sub` in as the children of `parent`.
    ///
    /// The roots of `sub` come to depend on `parent`, and whatever depended
    /// on `parent` now depends on the leaves of `sub` instead. An empty
    /// subgraph leaves the graph untouched.
    pub fn insert_sub_graph(
        &mut self,
        parent: NodeIndex,
        sub: TaskGraph,
    ) -> Result<Vec<NodeIndex>, GraphError> {
        self.check(&[parent])?;
        if sub.is_empty() {
            return Ok(Vec::new());
        }

        let old_successors = self.nodes[parent.0].successors.clone();
        let roots = sub.roots();
        let leaves = sub.leaves();
        let mapping = self.merge(sub);

        for &index in &mapping {
            let node = &mut self.nodes[index.0];
            if node.parent.is_none() {
                node.parent = Some(parent);
                self.nodes[parent.0].children.insert(index);
            }
        }

        for root in roots {
            self.link(parent, mapping[root.0]);
        }

        for successor in old_successors {
            self.unlink(parent, successor);
            for leaf in &leaves {
                self.link(mapping[leaf.0], successor);
            }
        }

        Ok(mapping)
    }

    /// Topological order of every node, ties broken by insertion order.
    pub fn dependency_order(&self) -> Vec<NodeIndex> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.predecessors.len()).collect();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .nodes()
            .filter(|(_, n)| n.predecessors.is_empty())
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for &successor in &self.nodes[index.0].successors {
                in_degree[successor.0] -= 1;
                if in_degree[successor.0] == 0 {
                    ready.push(Reverse(successor));
                }
            }
        }
        order
    }

    /// Transitive closure of the predecessors of `index`.
    pub fn ancestors(&self, index: NodeIndex) -> BTreeSet<NodeIndex> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeIndex> = match self.node(index) {
            Some(node) => node.predecessors.iter().copied().collect(),
            None => return seen,
        };
        while let Some(current) = stack.pop() {
            if seen.insert(current) {
                stack.extend(self.nodes[current.0].predecessors.iter().copied());
            }
        }
        seen
    }

    /// Task names in dependency order.
    pub fn task_names(&self) -> Vec<String> {
        self.dependency_order()
            .into_iter()
            .map(|i| self.nodes[i.0].body.name())
            .collect()
    }

    /// Whether two graphs describe the same work: same task names and guards
    /// with the same predecessor structure, regardless of the order the tasks
    /// were added in.
    pub fn is_equivalent(&self, other: &TaskGraph) -> bool {
        self.len() == other.len() && self.canonical() == other.canonical()
    }

    /// Topological walk picking the smallest ready node by content, so the
    /// result only depends on the shape of the graph.
    fn canonical(&self) -> Vec<(String, TaskGuard, Vec<usize>)> {
        let shapes = self.shapes();
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.predecessors.len()).collect();
        let mut position = vec![0; self.nodes.len()];
        let mut ready = self.roots();
        let mut canonical = Vec::with_capacity(self.nodes.len());

        while !ready.is_empty() {
            let picked = ready
                .iter()
                .map(|&index| {
                    let node = &self.nodes[index.0];
                    let mut predecessors: Vec<usize> =
                        node.predecessors.iter().map(|p| position[p.0]).collect();
                    predecessors.sort_unstable();
                    (node.body.name(), node.guard as u8, predecessors, shapes[index.0])
                })
                .enumerate()
                .min_by(|(_, a), (_, b)| a.cmp(b));
            let Some((slot, (name, _, predecessors, _))) = picked else {
                break;
            };

            let index = ready.swap_remove(slot);
            let node = &self.nodes[index.0];
            position[index.0] = canonical.len();
            canonical.push((name, node.guard, predecessors));

            for &successor in &node.successors {
                in_degree[successor.0] -= 1;
                if in_degree[successor.0] == 0 {
                    ready.push(successor);
                }
            }
        }
        canonical
    }

    /// Hash of every node's name, guard and everything downstream of it.
    fn shapes(&self) -> Vec<u64> {
        let mut shapes = vec![0; self.nodes.len()];
        for index in self.dependency_order().into_iter().rev() {
            let node = &self.nodes[index.0];
            let mut below: Vec<u64> = node.successors.iter().map(|s| shapes[s.0]).collect();
            below.sort_unstable();

            let mut hasher = DefaultHasher::new();
            (node.body.name(), node.guard, below).hash(&mut hasher);
            shapes[index.0] = hasher.finish();
        }
        shapes
    }

    fn merge(&mut self, other: TaskGraph) -> Vec<NodeIndex> {
        let offset = self.nodes.len();
        let shift = |i: NodeIndex| NodeIndex(i.0 + offset);

        let mut mapping = Vec::with_capacity(other.nodes.len());
        for node in other.nodes {
            mapping.push(NodeIndex(self.nodes.len()));
            self.nodes.push(TaskNode {
                id: node.id,
                body: node.body,
                guard: node.guard,
                predecessors: node.predecessors.into_iter().map(shift).collect(),
                successors: node.successors.into_iter().map(shift).collect(),
                parent: node.parent.map(shift),
                children: node.children.into_iter().map(shift).collect(),
            });
        }
        mapping
    }

    fn check(&self, indices: &[NodeIndex]) -> Result<(), GraphError> {
        match indices.iter().find(|i| i.0 >= self.nodes.len()) {
            Some(index) => Err(GraphError::UnknownNode(index.0)),
            None => Ok(()),
        }
    }

    fn link(&mut self, from: NodeIndex, to: NodeIndex) {
        self.nodes[from.0].successors.insert(to);
        self.nodes[to.0].predecessors.insert(from);
    }

    fn unlink(&mut self, from: NodeIndex, to: NodeIndex) {
        self.nodes[from.0].successors.remove(&to);
        self.nodes[to.0].predecessors.remove(&from);
    }
}
