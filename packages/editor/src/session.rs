//! # Edit Session Management
//!
//! Tracks which nodes are being edited and what they currently contain.
//!
//! A session is ephemeral UI state: it starts when a card enters edit mode
//! and ends when it leaves. While it is open, every content change is
//! staged on the buffer as that node's pending operation (last write wins).
//! Stopping the session either commits the pending operation into the
//! memory snapshot or discards it.
//!
//! Calls referring to a node with no session are logged and return a
//! neutral value; they never fail.

use crate::document::DocumentBuffer;
use crate::listeners::{ListenerId, Listeners};
use crate::mutations::{ChangeKind, ChangeOperation};
use canvas_model::{CanvasNode, NodeKind};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// UI affordance for the node being edited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditingMode {
    Text,
    Link,
    None,
}

/// Classify content for the editing UI. Has no effect on saving or merging.
pub fn detect_editing_mode(content: &CanvasNode) -> EditingMode {
    match &content.kind {
        NodeKind::Link { .. } => EditingMode::Link,
        NodeKind::Text { text } => {
            let trimmed = text.trim();
            let is_bare_url = (trimmed.starts_with("http://") || trimmed.starts_with("https://"))
                && !trimmed.contains(char::is_whitespace);
            if is_bare_url {
                EditingMode::Link
            } else {
                EditingMode::Text
            }
        }
        NodeKind::File { .. } | NodeKind::Group { .. } => EditingMode::None,
    }
}

/// Edit state for one node
#[derive(Debug, Clone, PartialEq)]
pub struct EditorState {
    pub node_id: String,
    pub original_content: CanvasNode,
    pub current_content: CanvasNode,
    pub is_dirty: bool,
    pub last_modified: DateTime<Utc>,
    pub editing_mode: EditingMode,
}

/// Notification sent to state-change listeners
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started(EditorState),
    Updated(EditorState),
    Stopped { node_id: String, saved: bool },
}

impl SessionEvent {
    pub fn node_id(&self) -> &str {
        match self {
            SessionEvent::Started(state) | SessionEvent::Updated(state) => &state.node_id,
            SessionEvent::Stopped { node_id, .. } => node_id,
        }
    }
}

/// Per-document map of open edit sessions, keyed by node id
#[derive(Debug, Default)]
pub struct EditorSessionTracker {
    sessions: HashMap<String, EditorState>,
    listeners: Listeners<SessionEvent>,
}

impl EditorSessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `node_id`, or return the existing one unchanged.
    ///
    /// Returns None if the buffer is closed or `content` belongs to another node.
    pub fn start_editing(
        &mut self,
        buffer: &mut DocumentBuffer,
        node_id: &str,
        content: CanvasNode,
    ) -> Option<EditorState> {
        if let Some(existing) = self.sessions.get(node_id) {
            return Some(existing.clone());
        }

        if buffer.is_closed() {
            tracing::warn!("Cannot edit node {} of a closed document", node_id);
            return None;
        }

        if content.id != node_id {
            tracing::warn!(
                "Refusing to edit node {} with content for node {}",
                node_id,
                content.id
            );
            return None;
        }

        let state = EditorState {
            node_id: node_id.to_string(),
            editing_mode: detect_editing_mode(&content),
            original_content: content.clone(),
            current_content: content,
            is_dirty: false,
            last_modified: Utc::now(),
        };

        self.sessions.insert(node_id.to_string(), state.clone());
        buffer.add_active_editor(node_id);
        tracing::debug!("Started editing node {}", node_id);
        self.listeners.emit(&SessionEvent::Started(state.clone()));

        Some(state)
    }

    /// Stage `new_content` as the pending edit for `node_id`.
    ///
    /// Returns false, changing nothing, when there is no session or the
    /// content is identical to what the session already holds.
    pub fn update_content(
        &mut self,
        buffer: &mut DocumentBuffer,
        node_id: &str,
        new_content: CanvasNode,
    ) -> bool {
        let Some(session) = self.sessions.get_mut(node_id) else {
            tracing::warn!("No edit session for node {}", node_id);
            return false;
        };

        if session.current_content == new_content {
            return false;
        }

        if new_content.id != node_id {
            tracing::warn!(
                "Ignoring content for node {} sent to session {}",
                new_content.id,
                node_id
            );
            return false;
        }

        let mut op = ChangeOperation::update(session.current_content.clone(), new_content.clone());
        if !buffer.memory_version().contains_node(node_id) {
            op.kind = ChangeKind::Create;
            op.old_value = None;
        }

        if !buffer.stage_change(op) {
            return false;
        }

        session.is_dirty = new_content != session.original_content;
        session.editing_mode = detect_editing_mode(&new_content);
        session.current_content = new_content;
        session.last_modified = Utc::now();

        let event = SessionEvent::Updated(session.clone());
        self.listeners.emit(&event);
        true
    }

    /// Close the session for `node_id`, committing or discarding its pending edit
    pub fn stop_editing(&mut self, buffer: &mut DocumentBuffer, node_id: &str, save: bool) -> bool {
        let Some(session) = self.sessions.remove(node_id) else {
            tracing::warn!("No edit session to stop for node {}", node_id);
            return false;
        };

        if save {
            buffer.commit_node(node_id);
        } else {
            buffer.discard_node(node_id);
        }
        buffer.remove_active_editor(node_id);

        tracing::debug!(
            "Stopped editing node {} (saved: {}, dirty: {})",
            node_id,
            save,
            session.is_dirty
        );
        self.listeners.emit(&SessionEvent::Stopped {
            node_id: node_id.to_string(),
            saved: save,
        });
        true
    }

    /// Stop every open session. Returns the number stopped.
    pub fn stop_all(&mut self, buffer: &mut DocumentBuffer, save: bool) -> usize {
        let mut node_ids: Vec<String> = self.sessions.keys().cloned().collect();
        node_ids.sort();
        node_ids
            .iter()
            .filter(|id| self.stop_editing(buffer, id, save))
            .count()
    }

    pub fn state(&self, node_id: &str) -> Option<&EditorState> {
        self.sessions.get(node_id)
    }

    pub fn is_editing(&self, node_id: &str) -> bool {
        self.sessions.contains_key(node_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn add_state_change_listener(
        &mut self,
        listener: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn remove_state_change_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}
