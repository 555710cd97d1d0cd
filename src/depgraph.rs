// src/depgraph.rs

//! Arena-indexed dependency graph with DFS cycle detection.
//!
//! The analyzer builds one of these per `Analyze` operation that requests a
//! dependency graph (§4.6). Nodes are file paths; edges are import/require
//! relationships. Grounded on `src/filesystem/vfs.rs`'s arena-of-nodes +
//! `HashMap` path index design (§9 "cyclic module graphs → arena+indices"),
//! generalized from a filesystem tree (parent/children, one parent per node)
//! to a general directed graph (many-to-many edges, used for cycle
//! detection rather than path lookup).

use serde::Serialize;
use std::collections::HashMap;

/// Index into the graph's node arena. Copy-cheap handle, invalid once the
/// graph it was produced from is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A dependency graph over file paths.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, NodeId>,
    edges: Vec<Vec<NodeId>>,
}

/// One cycle found by `find_cycles`, as the sequence of paths involved,
/// starting and ending at the same node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cycle(pub Vec<String>);

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the node for `path`.
    pub fn node(&mut self, path: &str) -> NodeId {
        if let Some(id) = self.index.get(path) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(path.to_string());
        self.edges.push(Vec::new());
        self.index.insert(path.to_string(), id);
        id
    }

    /// Record that `from` imports/depends on `to`.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let from_id = self.node(from);
        let to_id = self.node(to);
        if !self.edges[from_id.0].contains(&to_id) {
            self.edges[from_id.0].push(to_id);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn path(&self, id: NodeId) -> &str {
        &self.nodes[id.0]
    }

    /// DFS with an explicit recursion stack (§4.6), reporting every distinct
    /// cycle found. A node already fully explored (no longer on the stack)
    /// is never revisited, so this is linear in nodes + edges.
    pub fn find_cycles(&self) -> Vec<Cycle> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack: Vec<NodeId> = Vec::new();
        let mut cycles = Vec::new();

        for start in 0..self.nodes.len() {
            if marks[start] == Mark::Unvisited {
                self.dfs_visit(NodeId(start), &mut marks, &mut stack, &mut cycles);
            }
        }

        cycles
    }

    fn dfs_visit(&self, node: NodeId, marks: &mut [Mark], stack: &mut Vec<NodeId>, cycles: &mut Vec<Cycle>) {
        marks[node.0] = Mark::OnStack;
        stack.push(node);

        for &next in &self.edges[node.0] {
            match marks[next.0] {
                Mark::Unvisited => {
                    self.dfs_visit(next, marks, stack, cycles);
                }
                Mark::OnStack => {
                    // Found a back-edge into the current stack: the cycle is
                    // the stack slice from `next`'s position to the top.
                    let start_pos = stack.iter().position(|&n| n == next).unwrap();
                    let mut path: Vec<String> =
                        stack[start_pos..].iter().map(|&n| self.path(n).to_string()).collect();
                    path.push(self.path(next).to_string());
                    cycles.push(Cycle(path));
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node.0] = Mark::Done;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let mut g = DependencyGraph::new();
        g.add_edge("a.rs", "b.rs");
        g.add_edge("b.rs", "c.rs");
        assert!(g.find_cycles().is_empty());
    }

    #[test]
    fn detects_direct_cycle() {
        let mut g = DependencyGraph::new();
        g.add_edge("a.rs", "b.rs");
        g.add_edge("b.rs", "a.rs");
        let cycles = g.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].0.contains(&"a.rs".to_string()));
        assert!(cycles[0].0.contains(&"b.rs".to_string()));
    }

    #[test]
    fn detects_longer_cycle() {
        let mut g = DependencyGraph::new();
        g.add_edge("a.rs", "b.rs");
        g.add_edge("b.rs", "c.rs");
        g.add_edge("c.rs", "a.rs");
        let cycles = g.find_cycles();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let mut g = DependencyGraph::new();
        g.add_edge("a.rs", "a.rs");
        let cycles = g.find_cycles();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn node_identity_is_stable_across_lookups() {
        let mut g = DependencyGraph::new();
        let a1 = g.node("a.rs");
        let a2 = g.node("a.rs");
        assert_eq!(a1, a2);
        assert_eq!(g.len(), 1);
    }
}
