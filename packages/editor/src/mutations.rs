//! # Change Operations
//!
//! A change operation is an edit intent against one node of the memory
//! snapshot. It is not a durable log entry: the buffer keeps at most one
//! unapplied operation per node, and the whole log is dropped once the
//! document is saved.
//!
//! ## Projection
//!
//! - `Update` / `Create`: replace the node with the same id, or append it
//! - `Delete`: remove the node and the edges attached to it
//!
//! Projection is by id only. Applying an operation twice yields the same
//! document as applying it once.

use canvas_model::{CanvasDocument, CanvasNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OPERATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Update,
    Create,
    Delete,
}

/// Edit intent for a single node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOperation {
    /// Unique operation ID
    pub id: String,

    pub node_id: String,

    pub kind: ChangeKind,

    /// Node before the change (absent for creates)
    pub old_value: Option<CanvasNode>,

    /// Node after the change (absent for deletes)
    pub new_value: Option<CanvasNode>,

    pub timestamp: DateTime<Utc>,

    /// Set once, when the operation is projected onto the memory snapshot
    pub applied: bool,
}

impl ChangeOperation {
    fn new(
        kind: ChangeKind,
        node_id: String,
        old_value: Option<CanvasNode>,
        new_value: Option<CanvasNode>,
    ) -> Self {
        let seq = NEXT_OPERATION.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("{}-{}", node_id, seq),
            node_id,
            kind,
            old_value,
            new_value,
            timestamp: Utc::now(),
            applied: false,
        }
    }

    pub fn update(old_value: CanvasNode, new_value: CanvasNode) -> Self {
        let node_id = new_value.id.clone();
        Self::new(ChangeKind::Update, node_id, Some(old_value), Some(new_value))
    }

    pub fn create(node: CanvasNode) -> Self {
        let node_id = node.id.clone();
        Self::new(ChangeKind::Create, node_id, None, Some(node))
    }

    pub fn delete(old_value: CanvasNode) -> Self {
        let node_id = old_value.id.clone();
        Self::new(ChangeKind::Delete, node_id, Some(old_value), None)
    }

    /// Project this operation onto `doc`.
    ///
    /// Returns false if the document was left untouched.
    pub fn project(&self, doc: &mut CanvasDocument) -> bool {
        match self.kind {
            ChangeKind::Update | ChangeKind::Create => match &self.new_value {
                Some(node) => {
                    let previous = doc.upsert_node(node.clone());
                    previous.as_ref() != Some(node)
                }
                None => {
                    tracing::warn!(
                        "Change {} ({:?}) has no new value, skipping projection",
                        self.id,
                        self.kind
                    );
                    false
                }
            },
            ChangeKind::Delete => doc.remove_node(&self.node_id).is_some(),
        }
    }

    /// Flip `applied` to true. Returns false if it was already set.
    pub fn mark_applied(&mut self) -> bool {
        if self.applied {
            return false;
        }
        self.applied = true;
        true
    }
}
