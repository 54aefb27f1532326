//! # Canvas Document
//!
//! A document is a flat graph: a list of nodes and a list of edges, both
//! keyed by id. Node order is the host's z-order and is preserved.

use crate::edge::CanvasEdge;
use crate::node::{CanvasNode, Extras};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasDocument {
    #[serde(default)]
    pub nodes: Vec<CanvasNode>,
    #[serde(default)]
    pub edges: Vec<CanvasEdge>,
    #[serde(flatten)]
    pub extra: Extras,
}

impl CanvasDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: Vec<CanvasNode>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    pub fn with_edge(mut self, edge: CanvasEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn node(&self, id: &str) -> Option<&CanvasNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut CanvasNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn edge(&self, id: &str) -> Option<&CanvasEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn contains_edge(&self, id: &str) -> bool {
        self.edge(id).is_some()
    }

    /// Replace the node with the same id in place, or append it.
    ///
    /// Returns the node that was replaced, if any.
    pub fn upsert_node(&mut self, node: CanvasNode) -> Option<CanvasNode> {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => Some(std::mem::replace(existing, node)),
            None => {
                self.nodes.push(node);
                None
            }
        }
    }

    /// Remove a node and every edge attached to it
    pub fn remove_node(&mut self, id: &str) -> Option<CanvasNode> {
        let pos = self.nodes.iter().position(|n| n.id == id)?;
        let removed = self.nodes.remove(pos);
        self.edges.retain(|e| !e.touches(id));
        Some(removed)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut doc = CanvasDocument::with_nodes(vec![
            CanvasNode::text("a", "1"),
            CanvasNode::text("b", "2"),
        ]);

        let old = doc.upsert_node(CanvasNode::text("a", "changed"));
        assert_eq!(old.unwrap().text_content(), Some("1"));
        assert_eq!(doc.nodes[0].text_content(), Some("changed"));
        assert_eq!(doc.nodes.len(), 2);

        assert!(doc.upsert_node(CanvasNode::text("c", "3")).is_none());
        assert_eq!(doc.nodes[2].id, "c");
    }

    #[test]
    fn test_remove_node_drops_attached_edges() {
        let mut doc = CanvasDocument::with_nodes(vec![
            CanvasNode::text("a", "1"),
            CanvasNode::text("b", "2"),
            CanvasNode::text("c", "3"),
        ])
        .with_edge(CanvasEdge::new("ab", "a", "b"))
        .with_edge(CanvasEdge::new("bc", "b", "c"))
        .with_edge(CanvasEdge::new("ca", "c", "a"));

        assert!(doc.remove_node("b").is_some());
        assert_eq!(doc.nodes.len(), 2);
        assert_eq!(doc.edges.len(), 1);
        assert_eq!(doc.edges[0].id, "ca");

        assert!(doc.remove_node("missing").is_none());
    }
}
