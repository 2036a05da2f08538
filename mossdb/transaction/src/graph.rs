//! Waits-for graph used for deadlock detection.
//!
//! An edge `A -> B` means transaction `A` waits for a lock held by transaction `B`. Nodes are
//! client ids rather than references to transactions, so the graph never keeps a transaction
//! alive and never forms a reference cycle itself.
//!
//! ```text
//! A waits for B:  A -> B
//! B waits for C:  B -> C
//! C waits for A:  C -> A   (cycle = deadlock)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use mossdb_common::types::ClientId;
use parking_lot::Mutex;

type Edges = BTreeMap<ClientId, BTreeSet<ClientId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// On the current DFS path.
    Grey,
    /// Fully explored, known not to reach a cycle.
    Black,
}

#[derive(Debug, Default)]
pub struct WaitsForGraph {
    edges: Mutex<Edges>,
}

impl WaitsForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the edge `from -> to`. Returns false if it was already present.
    pub fn add_edge(&self, from: ClientId, to: ClientId) -> bool {
        self.edges.lock().entry(from).or_default().insert(to)
    }

    pub fn remove_edge(&self, from: ClientId, to: ClientId) {
        remove_edge(&mut self.edges.lock(), from, to);
    }

    /// Removes every edge leaving `from`: the transaction is no longer waiting on anyone.
    pub fn remove_edges_from(&self, from: ClientId) {
        self.edges.lock().remove(&from);
    }

    /// Removes every edge entering or leaving `node`.
    pub fn remove_node(&self, node: ClientId) {
        let mut edges = self.edges.lock();
        edges.remove(&node);
        edges.retain(|_, targets| {
            targets.remove(&node);
            !targets.is_empty()
        });
    }

    /// Current edges in `(from, to)` order.
    pub fn edges(&self) -> Vec<(ClientId, ClientId)> {
        self.edges
            .lock()
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |to| (*from, *to)))
            .collect()
    }

    pub fn contains_edge(&self, from: ClientId, to: ClientId) -> bool {
        self.edges
            .lock()
            .get(&from)
            .is_some_and(|targets| targets.contains(&to))
    }

    /// Returns true if the graph currently contains a cycle.
    pub fn detect_cycle(&self) -> bool {
        has_cycle(&self.edges.lock())
    }

    /// Adds `from -> to` for every `to` in `targets` and checks the whole graph for a cycle in a
    /// single critical section. If a cycle appears, the edges this call added are removed again
    /// and false is returned.
    pub fn add_edges_unless_cycle(&self, from: ClientId, targets: &[ClientId]) -> bool {
        let mut edges = self.edges.lock();
        let added: Vec<ClientId> = targets
            .iter()
            .copied()
            .filter(|to| edges.entry(from).or_default().insert(*to))
            .collect();
        if !has_cycle(&edges) {
            return true;
        }
        for to in added {
            remove_edge(&mut edges, from, to);
        }
        false
    }
}

fn remove_edge(edges: &mut Edges, from: ClientId, to: ClientId) {
    if let Some(targets) = edges.get_mut(&from) {
        targets.remove(&to);
        if targets.is_empty() {
            edges.remove(&from);
        }
    }
}

fn has_cycle(edges: &Edges) -> bool {
    let mut colors = BTreeMap::new();
    edges
        .keys()
        .any(|node| !colors.contains_key(node) && visit(*node, edges, &mut colors))
}

fn visit(node: ClientId, edges: &Edges, colors: &mut BTreeMap<ClientId, Color>) -> bool {
    colors.insert(node, Color::Grey);
    if let Some(targets) = edges.get(&node) {
        for next in targets {
            match colors.get(next) {
                Some(Color::Grey) => return true,
                Some(Color::Black) => {}
                None => {
                    if visit(*next, edges, colors) {
                        return true;
                    }
                }
            }
        }
    }
    colors.insert(node, Color::Black);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ClientId> {
        let mut ids: Vec<_> = (0..n).map(|_| ClientId::new_v4()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_no_cycle_in_chain() {
        let graph = WaitsForGraph::new();
        let n = ids(3);
        graph.add_edge(n[0], n[1]);
        graph.add_edge(n[1], n[2]);
        assert!(!graph.detect_cycle());
    }

    #[test]
    fn test_cycle_detection() {
        let graph = WaitsForGraph::new();
        let n = ids(3);
        graph.add_edge(n[0], n[1]);
        graph.add_edge(n[1], n[2]);
        graph.add_edge(n[2], n[0]);
        assert!(graph.detect_cycle());

        graph.remove_edge(n[2], n[0]);
        assert!(!graph.detect_cycle());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let graph = WaitsForGraph::new();
        let n = ids(4);
        graph.add_edge(n[0], n[1]);
        graph.add_edge(n[0], n[2]);
        graph.add_edge(n[1], n[3]);
        graph.add_edge(n[2], n[3]);
        assert!(!graph.detect_cycle());
    }

    #[test]
    fn test_add_edges_unless_cycle_rolls_back() {
        let graph = WaitsForGraph::new();
        let n = ids(3);
        graph.add_edge(n[1], n[0]);
        assert!(graph.add_edges_unless_cycle(n[2], &[n[1]]));
        assert!(!graph.add_edges_unless_cycle(n[0], &[n[1], n[2]]));
        assert!(!graph.contains_edge(n[0], n[1]));
        assert!(!graph.contains_edge(n[0], n[2]));
        assert_eq!(graph.edges().len(), 2);
        assert!(!graph.detect_cycle());
    }

    #[test]
    fn test_rollback_keeps_preexisting_edge() {
        let graph = WaitsForGraph::new();
        let n = ids(2);
        graph.add_edge(n[0], n[1]);
        graph.add_edge(n[1], n[0]);
        // The edge was already present, so the failed call must not remove it.
        assert!(!graph.add_edges_unless_cycle(n[0], &[n[1]]));
        assert!(graph.contains_edge(n[0], n[1]));
    }

    #[test]
    fn test_remove_node() {
        let graph = WaitsForGraph::new();
        let n = ids(3);
        graph.add_edge(n[0], n[1]);
        graph.add_edge(n[1], n[2]);
        graph.add_edge(n[2], n[1]);
        graph.remove_node(n[1]);
        assert!(graph.edges().is_empty());
    }
}
