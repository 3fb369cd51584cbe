//! The fixed stage dependency graph.
//!
//! Unlike a user-authored phase DAG, the resume pipeline's shape is known at
//! compile time: a linear chain from intake to export. The graph still goes
//! through edge tables rather than hard-coded successor matches so that stale
//! sets for replans come from forward traversal, not ad hoc flags.

use std::collections::HashSet;

use crate::pipeline::node::{NodeKey, NodeStatus, StageNode};

/// Directed dependency graph over the fixed node set.
#[derive(Debug)]
pub struct StageGraph {
    nodes: Vec<NodeKey>,
    /// index -> nodes that depend on it
    forward_edges: Vec<Vec<usize>>,
    /// index -> nodes it depends on
    reverse_edges: Vec<Vec<usize>>,
}

impl StageGraph {
    /// Build the pipeline graph: intake → research → gap_analysis →
    /// interview → blueprint → sections → quality → export.
    pub fn pipeline() -> Self {
        let nodes: Vec<NodeKey> = NodeKey::all().to_vec();
        let edges: &[(NodeKey, NodeKey)] = &[
            (NodeKey::Intake, NodeKey::Research),
            (NodeKey::Research, NodeKey::GapAnalysis),
            (NodeKey::GapAnalysis, NodeKey::Interview),
            (NodeKey::Interview, NodeKey::Blueprint),
            (NodeKey::Blueprint, NodeKey::Sections),
            (NodeKey::Sections, NodeKey::Quality),
            (NodeKey::Quality, NodeKey::Export),
        ];

        let mut forward_edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut reverse_edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (from, to) in edges {
            let from_idx = nodes.iter().position(|n| n == from).expect("known node");
            let to_idx = nodes.iter().position(|n| n == to).expect("known node");
            forward_edges[from_idx].push(to_idx);
            reverse_edges[to_idx].push(from_idx);
        }

        Self {
            nodes,
            forward_edges,
            reverse_edges,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[NodeKey] {
        &self.nodes
    }

    fn index(&self, key: NodeKey) -> usize {
        self.nodes
            .iter()
            .position(|n| *n == key)
            .expect("all NodeKey values are in the graph")
    }

    /// Position of a node in pipeline order. Lower runs earlier.
    pub fn position(&self, key: NodeKey) -> usize {
        self.index(key)
    }

    /// Nodes the given node depends on.
    pub fn dependencies(&self, key: NodeKey) -> Vec<NodeKey> {
        self.reverse_edges[self.index(key)]
            .iter()
            .map(|&i| self.nodes[i])
            .collect()
    }

    /// Nodes that depend on the given node.
    pub fn dependents(&self, key: NodeKey) -> Vec<NodeKey> {
        self.forward_edges[self.index(key)]
            .iter()
            .map(|&i| self.nodes[i])
            .collect()
    }

    /// Check if all dependencies of a node are satisfied by the given
    /// stage node statuses.
    pub fn dependencies_satisfied(&self, key: NodeKey, nodes: &[StageNode]) -> bool {
        self.dependencies(key).iter().all(|dep| {
            nodes
                .iter()
                .find(|n| n.node_key == *dep)
                .map(|n| n.status.is_satisfied())
                .unwrap_or(false)
        })
    }

    /// The next node to run: the first node in pipeline order that is not yet
    /// satisfied but has all its dependencies satisfied.
    pub fn next_ready(&self, nodes: &[StageNode]) -> Option<NodeKey> {
        for key in &self.nodes {
            let status = nodes
                .iter()
                .find(|n| n.node_key == *key)
                .map(|n| n.status)
                .unwrap_or(NodeStatus::Locked);
            if status.is_satisfied() {
                continue;
            }
            if self.dependencies_satisfied(*key, nodes) {
                return Some(*key);
            }
            return None;
        }
        None
    }

    /// Every node reachable forward from `start`, inclusive. This is the
    /// stale set for a replan rebuilding from `start`.
    pub fn reachable_from(&self, start: NodeKey) -> HashSet<NodeKey> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut stack = vec![self.index(start)];
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            for &dep in &self.forward_edges[idx] {
                stack.push(dep);
            }
        }
        seen.into_iter().map(|i| self.nodes[i]).collect()
    }
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::pipeline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: NodeKey, status: NodeStatus) -> StageNode {
        let mut n = StageNode::new("r1", key);
        n.status = status;
        n
    }

    #[test]
    fn test_pipeline_graph_shape() {
        let graph = StageGraph::pipeline();
        assert_eq!(graph.len(), 8);
        assert!(graph.dependencies(NodeKey::Intake).is_empty());
        assert_eq!(graph.dependencies(NodeKey::Research), vec![NodeKey::Intake]);
        assert_eq!(graph.dependents(NodeKey::Quality), vec![NodeKey::Export]);
        assert!(graph.dependents(NodeKey::Export).is_empty());
    }

    #[test]
    fn test_position_is_pipeline_order() {
        let graph = StageGraph::pipeline();
        assert!(graph.position(NodeKey::Intake) < graph.position(NodeKey::Research));
        assert!(graph.position(NodeKey::GapAnalysis) < graph.position(NodeKey::Sections));
        assert!(graph.position(NodeKey::Quality) < graph.position(NodeKey::Export));
    }

    #[test]
    fn test_next_ready_walks_the_chain() {
        let graph = StageGraph::pipeline();

        let nodes = vec![node(NodeKey::Intake, NodeStatus::Pending)];
        assert_eq!(graph.next_ready(&nodes), Some(NodeKey::Intake));

        let nodes = vec![
            node(NodeKey::Intake, NodeStatus::Complete),
            node(NodeKey::Research, NodeStatus::Pending),
        ];
        assert_eq!(graph.next_ready(&nodes), Some(NodeKey::Research));
    }

    #[test]
    fn test_next_ready_none_when_all_satisfied() {
        let graph = StageGraph::pipeline();
        let nodes: Vec<StageNode> = NodeKey::all()
            .iter()
            .map(|k| node(*k, NodeStatus::Complete))
            .collect();
        assert_eq!(graph.next_ready(&nodes), None);
    }

    #[test]
    fn test_auto_approved_satisfies_dependents() {
        let graph = StageGraph::pipeline();
        let nodes = vec![
            node(NodeKey::Intake, NodeStatus::AutoApproved),
            node(NodeKey::Research, NodeStatus::Pending),
        ];
        assert!(graph.dependencies_satisfied(NodeKey::Research, &nodes));
    }

    #[test]
    fn test_reachable_from_gap_analysis() {
        let graph = StageGraph::pipeline();
        let stale = graph.reachable_from(NodeKey::GapAnalysis);
        let expected: HashSet<NodeKey> = [
            NodeKey::GapAnalysis,
            NodeKey::Interview,
            NodeKey::Blueprint,
            NodeKey::Sections,
            NodeKey::Quality,
            NodeKey::Export,
        ]
        .into_iter()
        .collect();
        assert_eq!(stale, expected);
        assert!(!stale.contains(&NodeKey::Intake));
        assert!(!stale.contains(&NodeKey::Research));
    }

    #[test]
    fn test_reachable_from_export_is_itself() {
        let graph = StageGraph::pipeline();
        let stale = graph.reachable_from(NodeKey::Export);
        assert_eq!(stale.len(), 1);
        assert!(stale.contains(&NodeKey::Export));
    }
}
