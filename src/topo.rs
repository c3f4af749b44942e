//! Topological graph visitor
//!
//! A reusable primitive that visits nodes of a directed graph in
//! dependency order: nodes with in-degree zero first, ordered by a
//! caller-supplied key (default: insertion order), decrementing successor
//! in-degrees as it goes. Nodes that never reach in-degree zero are cycle
//! members; after the frontier drains, each is handed exactly once to a
//! separate fallback visitor. The traversal is iterative throughout, so
//! arbitrarily large graphs cannot overflow the stack.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::hash::Hash;

/// A small directed graph over copyable node ids
#[derive(Debug, Clone)]
pub struct TopoGraph<N> {
    nodes: Vec<N>,
    positions: HashMap<N, usize>,
    successors: HashMap<N, Vec<N>>,
    in_degree: HashMap<N, usize>,
    edges: HashSet<(N, N)>,
}

impl<N: Copy + Eq + Hash> Default for TopoGraph<N> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            positions: HashMap::new(),
            successors: HashMap::new(),
            in_degree: HashMap::new(),
            edges: HashSet::new(),
        }
    }
}

impl<N: Copy + Eq + Hash> TopoGraph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; repeated adds are ignored
    pub fn add_node(&mut self, node: N) {
        if !self.positions.contains_key(&node) {
            self.positions.insert(node, self.nodes.len());
            self.nodes.push(node);
        }
    }

    /// Add a directed edge `from -> to`; duplicate edges are ignored
    pub fn add_edge(&mut self, from: N, to: N) {
        self.add_node(from);
        self.add_node(to);
        if !self.edges.insert((from, to)) {
            return;
        }
        self.successors.entry(from).or_default().push(to);
        *self.in_degree.entry(to).or_insert(0) += 1;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Traverse in dependency order with insertion order as the tie-break
    pub fn traverse(&self, visit: impl FnMut(N), fallback: impl FnMut(N)) {
        let positions = self.positions.clone();
        self.traverse_by_key(|node| positions[node], visit, fallback);
    }

    /// Traverse in dependency order; among ready nodes the one with the
    /// smallest key is visited first. Cycle members go to `fallback`, each
    /// exactly once, in unspecified order.
    pub fn traverse_by_key<K: Ord>(
        &self,
        key: impl Fn(&N) -> K,
        mut visit: impl FnMut(N),
        mut fallback: impl FnMut(N),
    ) {
        let mut remaining: HashMap<N, usize> = self.in_degree.clone();
        let mut ready: BinaryHeap<Reverse<(K, usize)>> = BinaryHeap::new();
        for (slot, node) in self.nodes.iter().enumerate() {
            if remaining.get(node).copied().unwrap_or(0) == 0 {
                ready.push(Reverse((key(node), slot)));
            }
        }

        let mut visited: HashSet<N> = HashSet::new();
        while let Some(Reverse((_, slot))) = ready.pop() {
            let current = self.nodes[slot];
            visited.insert(current);
            visit(current);
            if let Some(successors) = self.successors.get(&current) {
                for succ in successors {
                    if let Some(degree) = remaining.get_mut(succ) {
                        *degree -= 1;
                        if *degree == 0 {
                            remaining.remove(succ);
                            ready.push(Reverse((key(succ), self.positions[succ])));
                        }
                    }
                }
            }
        }

        for node in &self.nodes {
            if !visited.contains(node) {
                fallback(*node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acyclic_emits_after_predecessors() {
        let mut graph = TopoGraph::new();
        // d <- b <- a, d <- c
        graph.add_edge('a', 'b');
        graph.add_edge('b', 'd');
        graph.add_edge('c', 'd');

        let mut order = Vec::new();
        let mut cycles = Vec::new();
        graph.traverse(|n| order.push(n), |n| cycles.push(n));

        assert!(cycles.is_empty());
        assert_eq!(order.len(), 4);
        let pos = |n: char| order.iter().position(|&x| x == n).unwrap();
        assert!(pos('a') < pos('b'));
        assert!(pos('b') < pos('d'));
        assert!(pos('c') < pos('d'));
    }

    #[test]
    fn test_cycle_members_fall_back_exactly_once() {
        let mut graph = TopoGraph::new();
        // cycle of three, plus one acyclic node feeding into it
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(3, 1);
        graph.add_edge(0, 1);

        let mut order = Vec::new();
        let mut cycles = Vec::new();
        graph.traverse(|n| order.push(n), |n| cycles.push(n));

        assert_eq!(order, vec![0]);
        cycles.sort();
        assert_eq!(cycles, vec![1, 2, 3]);
    }

    #[test]
    fn test_insertion_order_tie_break() {
        let mut graph = TopoGraph::new();
        graph.add_node(30);
        graph.add_node(10);
        graph.add_node(20);

        let mut order = Vec::new();
        graph.traverse(|n| order.push(n), |_| {});
        assert_eq!(order, vec![30, 10, 20]);
    }

    #[test]
    fn test_key_ordering() {
        let mut graph = TopoGraph::new();
        graph.add_node(30);
        graph.add_node(10);
        graph.add_node(20);

        let mut order = Vec::new();
        graph.traverse_by_key(|&n| n, |n| order.push(n), |_| {});
        assert_eq!(order, vec![10, 20, 30]);
    }

    #[test]
    fn test_duplicate_edges_ignored() {
        let mut graph = TopoGraph::new();
        graph.add_edge('a', 'b');
        graph.add_edge('a', 'b');

        let mut order = Vec::new();
        graph.traverse(|n| order.push(n), |_| {});
        assert_eq!(order, vec!['a', 'b']);
    }
}
