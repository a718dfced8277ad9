//! Topological linearization of a command graph (Kahn's algorithm).
//!
//! The graph is not required to be acyclic. Nodes that sit on a cycle, or
//! downstream of one, never reach in-degree zero and are left out of the
//! ordering. So are nodes fed by an edge whose source is not in the graph. [`linearize_detailed`] reports them separately; [`linearize`]
//! drops them silently. Callers must not assume the output covers every
//! node.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::model::{FlowEdge, FlowNode};

/// Result of [`linearize_detailed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Linearization<'a> {
    /// Nodes in dependency order.
    pub ordered: Vec<&'a FlowNode>,
    /// Nodes that never reached in-degree zero, in node-list order.
    pub omitted: Vec<&'a FlowNode>,
}

impl Linearization<'_> {
    pub fn is_complete(&self) -> bool {
        self.omitted.is_empty()
    }
}

/// Order `nodes` so that for every edge `u -> v`, `u` comes before `v`.
///
/// Ties between simultaneously-ready nodes are broken by queue insertion
/// order, which for independent nodes is node-list order.
pub fn linearize<'a>(nodes: &'a [FlowNode], edges: &[FlowEdge]) -> Vec<&'a FlowNode> {
    linearize_detailed(nodes, edges).ordered
}

/// Like [`linearize`], but also returns the nodes left out by cycles.
///
/// An edge from an unknown source still counts toward its target's
/// in-degree, so that target is omitted. Edges into unknown targets are
/// ignored.
pub fn linearize_detailed<'a>(nodes: &'a [FlowNode], edges: &[FlowEdge]) -> Linearization<'a> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let n = nodes.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; n];

    for edge in edges {
        let Some(&to) = index.get(edge.target.as_str()) else {
            debug!(edge = %edge.id, "ignoring edge into unknown node");
            continue;
        };
        in_degree[to] += 1;
        match index.get(edge.source.as_str()) {
            Some(&from) => adj[from].push(to),
            None => debug!(edge = %edge.id, "edge from unknown node blocks its target"),
        }
    }

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(i, _)| i)
        .collect();

    let mut ordered = Vec::with_capacity(n);
    while let Some(node) = queue.pop_front() {
        ordered.push(&nodes[node]);
        for &next in &adj[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    let omitted: Vec<&FlowNode> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg > 0)
        .map(|(i, _)| &nodes[i])
        .collect();

    if !omitted.is_empty() {
        debug!(omitted = omitted.len(), "cycle left nodes out of linearization");
    }

    Linearization { ordered, omitted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EndData, NodeKind, ShellData, StartData};

    fn step(id: &str) -> FlowNode {
        FlowNode::new(id, NodeKind::Step(ShellData::default()))
    }

    fn edge(source: &str, target: &str) -> FlowEdge {
        FlowEdge::new(format!("{source}-{target}"), source, target)
    }

    fn ids<'a>(nodes: &[&'a FlowNode]) -> Vec<&'a str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn linear_chain_keeps_edge_order() {
        let nodes = vec![step("c"), step("a"), step("b")];
        let edges = vec![edge("a", "b"), edge("b", "c")];
        assert_eq!(ids(&linearize(&nodes, &edges)), vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_respects_every_edge() {
        let nodes = vec![step("d"), step("b"), step("c"), step("a")];
        let edges = vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")];
        let order = ids(&linearize(&nodes, &edges));
        let pos = |id: &str| order.iter().position(|x| *x == id).unwrap();
        for e in &edges {
            assert!(pos(&e.source) < pos(&e.target), "edge {} violated", e.id);
        }
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn isolated_nodes_follow_node_list_order() {
        let nodes = vec![step("x"), step("y"), step("z")];
        assert_eq!(ids(&linearize(&nodes, &[])), vec!["x", "y", "z"]);
    }

    #[test]
    fn two_node_cycle_is_omitted() {
        let nodes = vec![
            FlowNode::new("s", NodeKind::Start(StartData::default())),
            step("a"),
            step("b"),
        ];
        let edges = vec![edge("a", "b"), edge("b", "a")];
        let result = linearize_detailed(&nodes, &edges);
        assert_eq!(ids(&result.ordered), vec!["s"]);
        assert_eq!(ids(&result.omitted), vec!["a", "b"]);
        assert!(!result.is_complete());
    }

    #[test]
    fn loop_back_edge_drops_body_and_everything_after() {
        // start -> loop -> body -> loop, loop -> end
        let nodes = vec![
            FlowNode::new("start", NodeKind::Start(StartData::default())),
            step("loop"),
            step("body"),
            FlowNode::new("end", NodeKind::End(EndData::default())),
        ];
        let edges = vec![
            edge("start", "loop"),
            edge("loop", "body"),
            edge("body", "loop"),
            edge("loop", "end"),
        ];
        let result = linearize_detailed(&nodes, &edges);
        assert_eq!(ids(&result.ordered), vec!["start"]);
        assert_eq!(ids(&result.omitted), vec!["loop", "body", "end"]);
    }

    #[test]
    fn edges_into_unknown_nodes_are_ignored() {
        let nodes = vec![step("a"), step("b")];
        let edges = vec![edge("a", "nowhere"), edge("a", "b")];
        assert_eq!(ids(&linearize(&nodes, &edges)), vec!["a", "b"]);
    }

    #[test]
    fn edge_from_unknown_source_omits_its_target() {
        let nodes = vec![step("a"), step("b"), step("c")];
        let edges = vec![edge("ghost", "b"), edge("a", "b"), edge("b", "c")];
        let result = linearize_detailed(&nodes, &edges);
        assert_eq!(ids(&result.ordered), vec!["a"]);
        assert_eq!(ids(&result.omitted), vec!["b", "c"]);
    }

    #[test]
    fn parallel_edges_are_counted_twice() {
        let nodes = vec![step("a"), step("b")];
        let edges = vec![edge("a", "b"), FlowEdge::new("dup", "a", "b")];
        assert_eq!(ids(&linearize(&nodes, &edges)), vec!["a", "b"]);
    }

    #[test]
    fn deterministic_across_calls() {
        let nodes = vec![step("a"), step("b"), step("c"), step("d")];
        let edges = vec![edge("a", "c"), edge("b", "c"), edge("c", "d")];
        assert_eq!(linearize(&nodes, &edges), linearize(&nodes, &edges));
    }
}
