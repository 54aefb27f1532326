//! # Document Buffer
//!
//! Holds the two snapshots of one open canvas document:
//!
//! - **memory version**: what the user sees, ahead of disk while edits are pending
//! - **file version**: the last snapshot known to match the backing store
//!
//! Edits only ever touch the memory version. The file version moves when a
//! save succeeds (`mark_changes_saved`) or when the store reports that the
//! file changed on disk (`update_file_version`).
//!
//! ## Lifecycle
//!
//! ```text
//! Clean ──edit──▶ Dirty ──save──▶ Flushing ──saved──▶ Clean
//!                   ▲                 │
//!                   │             conflict
//!                   │                 ▼
//!                   └──cancelled── Conflicted ──resolved──▶ Flushing
//!
//! any ──close──▶ Closed
//! ```

use crate::conflict::ConflictInfo;
use crate::listeners::{ListenerId, Listeners};
use crate::mutations::ChangeOperation;
use canvas_model::{canonical_json, CanvasDocument};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Save lifecycle of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentPhase {
    Clean,
    Dirty,
    Flushing,
    Conflicted,
    Closed,
}

/// Per-document synchronization state
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentState {
    pub path: PathBuf,
    pub memory_version: CanvasDocument,
    pub file_version: CanvasDocument,
    pub last_sync_time: DateTime<Utc>,
    pub has_unsaved_changes: bool,
    /// Set when the store reported a change that diverges from unsaved local edits
    pub conflict_detected: bool,
    pub active_editors: BTreeSet<String>,
}

/// Memory/file snapshot pair plus the pending change log
#[derive(Debug)]
pub struct DocumentBuffer {
    state: DocumentState,
    pending: Vec<ChangeOperation>,
    phase: DocumentPhase,
    last_auto_save_time: Option<DateTime<Utc>>,
    change_listeners: Listeners<bool>,
}

impl DocumentBuffer {
    pub fn new(path: impl Into<PathBuf>, snapshot: CanvasDocument) -> Self {
        Self {
            state: DocumentState {
                path: path.into(),
                memory_version: snapshot.clone(),
                file_version: snapshot,
                last_sync_time: Utc::now(),
                has_unsaved_changes: false,
                conflict_detected: false,
                active_editors: BTreeSet::new(),
            },
            pending: Vec::new(),
            phase: DocumentPhase::Clean,
            last_auto_save_time: None,
            change_listeners: Listeners::new(),
        }
    }

    /// Reset both snapshots to `snapshot` and drop pending changes
    pub fn initialize(&mut self, snapshot: CanvasDocument) {
        self.state.memory_version = snapshot.clone();
        self.state.file_version = snapshot;
        self.state.last_sync_time = Utc::now();
        self.state.conflict_detected = false;
        self.pending.clear();
        self.phase = DocumentPhase::Clean;
        self.set_unsaved(false);
    }

    pub fn state(&self) -> &DocumentState {
        &self.state
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }

    pub fn memory_version(&self) -> &CanvasDocument {
        &self.state.memory_version
    }

    pub fn file_version(&self) -> &CanvasDocument {
        &self.state.file_version
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.state.has_unsaved_changes
    }

    pub fn conflict_detected(&self) -> bool {
        self.state.conflict_detected
    }

    pub fn has_active_editors(&self) -> bool {
        !self.state.active_editors.is_empty()
    }

    pub fn active_editors(&self) -> &BTreeSet<String> {
        &self.state.active_editors
    }

    pub fn pending_changes(&self) -> &[ChangeOperation] {
        &self.pending
    }

    /// Unapplied operation waiting on `node_id`, if any
    pub fn pending_for(&self, node_id: &str) -> Option<&ChangeOperation> {
        self.pending
            .iter()
            .find(|op| !op.applied && op.node_id == node_id)
    }

    pub fn phase(&self) -> DocumentPhase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == DocumentPhase::Closed
    }

    pub fn last_sync_time(&self) -> DateTime<Utc> {
        self.state.last_sync_time
    }

    pub fn last_auto_save_time(&self) -> Option<DateTime<Utc>> {
        self.last_auto_save_time
    }

    /// Log `op` and project it onto the memory version right away
    pub fn apply_change(&mut self, mut op: ChangeOperation) -> bool {
        if self.is_closed() {
            tracing::warn!("Ignoring change {} on closed document {:?}", op.id, self.state.path);
            return false;
        }

        op.project(&mut self.state.memory_version);
        op.mark_applied();
        tracing::debug!("Applied change {} ({:?}) to {}", op.id, op.kind, op.node_id);
        self.pending.push(op);
        self.mark_dirty();
        true
    }

    /// Record `op` as the pending edit for its node without projecting it.
    ///
    /// Any earlier unapplied operation for the same node is replaced.
    pub(crate) fn stage_change(&mut self, op: ChangeOperation) -> bool {
        if self.is_closed() {
            tracing::warn!("Ignoring change {} on closed document {:?}", op.id, self.state.path);
            return false;
        }

        self.pending
            .retain(|existing| existing.applied || existing.node_id != op.node_id);
        self.pending.push(op);
        self.mark_dirty();
        true
    }

    /// Project the pending operation for `node_id` onto the memory version
    pub(crate) fn commit_node(&mut self, node_id: &str) -> bool {
        let Some(op) = self
            .pending
            .iter_mut()
            .find(|op| !op.applied && op.node_id == node_id)
        else {
            return false;
        };

        op.project(&mut self.state.memory_version);
        op.mark_applied();
        tracing::debug!("Committed change {} for node {}", op.id, node_id);
        self.refresh_unsaved();
        true
    }

    /// Drop the pending operation for `node_id`
    pub(crate) fn discard_node(&mut self, node_id: &str) -> bool {
        let before = self.pending.len();
        self.pending
            .retain(|op| op.applied || op.node_id != node_id);
        let discarded = self.pending.len() != before;
        self.refresh_unsaved();
        discarded
    }

    pub(crate) fn add_active_editor(&mut self, node_id: &str) {
        self.state.active_editors.insert(node_id.to_string());
    }

    pub(crate) fn remove_active_editor(&mut self, node_id: &str) {
        self.state.active_editors.remove(node_id);
    }

    /// The store reported an out-of-band change to the backing file.
    ///
    /// A snapshot identical to the current file version is ignored. With no
    /// unsaved local work the memory version follows the file, unless a node
    /// held by an open session changed remotely. Otherwise only the file
    /// version moves, and a divergence from memory marks the document as
    /// conflicted.
    pub fn update_file_version(&mut self, snapshot: CanvasDocument) {
        if self.is_closed() {
            tracing::warn!("Ignoring file update for closed document {:?}", self.state.path);
            return;
        }

        if same_content(&self.state.path, &self.state.file_version, &snapshot) {
            tracing::debug!("File {:?} unchanged on disk", self.state.path);
            return;
        }

        if !self.state.has_unsaved_changes && !self.edited_node_changed(&snapshot) {
            self.state.memory_version = snapshot.clone();
            self.state.file_version = snapshot;
            self.state.last_sync_time = Utc::now();
            tracing::debug!("Reloaded clean document {:?} from disk", self.state.path);
            return;
        }

        self.state.file_version = snapshot;
        self.state.conflict_detected = self.detect_conflict();
        self.refresh_unsaved();
        if self.state.conflict_detected {
            tracing::info!(
                "External change to {:?} diverges from local edits",
                self.state.path
            );
        }
    }

    fn edited_node_changed(&self, snapshot: &CanvasDocument) -> bool {
        self.state
            .active_editors
            .iter()
            .any(|id| self.state.memory_version.node(id) != snapshot.node(id))
    }

    /// Whether the memory and file snapshots differ.
    ///
    /// A snapshot that cannot be serialized counts as a conflict.
    pub fn detect_conflict(&self) -> bool {
        !same_content(
            &self.state.path,
            &self.state.memory_version,
            &self.state.file_version,
        )
    }

    /// Snapshot of the current divergence for the conflict resolver.
    ///
    /// Local edits still in the log count as active editing, since adopting
    /// the remote version would drop them.
    pub fn conflict_info(&self) -> ConflictInfo {
        ConflictInfo::new(
            self.state.path.clone(),
            self.state.memory_version.clone(),
            self.state.file_version.clone(),
            self.has_active_editors() || !self.pending.is_empty(),
        )
    }

    /// Called by a save callback once the memory version is on disk.
    ///
    /// Edits staged by still-open sessions are not part of the written
    /// snapshot and stay in the log.
    pub fn mark_changes_saved(&mut self) {
        if self.is_closed() {
            return;
        }

        self.pending.retain(|op| !op.applied);
        self.state.file_version = self.state.memory_version.clone();
        self.state.conflict_detected = false;
        self.state.last_sync_time = Utc::now();
        let unsaved = !self.pending.is_empty();
        self.phase = if unsaved {
            DocumentPhase::Dirty
        } else {
            DocumentPhase::Clean
        };
        self.set_unsaved(unsaved);
        tracing::debug!("Marked {:?} as saved", self.state.path);
    }

    /// Replace the memory version with a merged snapshot
    pub fn replace_memory_version(&mut self, snapshot: CanvasDocument) {
        if self.is_closed() {
            return;
        }
        self.state.memory_version = snapshot;
        self.state.conflict_detected = false;
        self.refresh_unsaved();
    }

    /// Throw away local work and adopt the file version
    pub fn accept_file_version(&mut self) {
        if self.is_closed() {
            return;
        }

        self.pending.clear();
        self.state.memory_version = self.state.file_version.clone();
        self.state.conflict_detected = false;
        self.state.last_sync_time = Utc::now();
        self.phase = DocumentPhase::Clean;
        self.set_unsaved(false);
    }

    /// Note that a save was attempted, whatever its outcome
    pub fn record_save_attempt(&mut self) {
        self.last_auto_save_time = Some(Utc::now());
    }

    pub fn begin_flush(&mut self) {
        if !self.is_closed() {
            self.phase = DocumentPhase::Flushing;
        }
    }

    pub fn mark_conflicted(&mut self) {
        if !self.is_closed() {
            self.phase = DocumentPhase::Conflicted;
        }
    }

    /// Leave Flushing/Conflicted, falling back to Dirty or Clean
    pub fn end_flush(&mut self) {
        if matches!(self.phase, DocumentPhase::Flushing | DocumentPhase::Conflicted) {
            self.phase = if self.state.has_unsaved_changes {
                DocumentPhase::Dirty
            } else {
                DocumentPhase::Clean
            };
        }
    }

    /// Clear all state; the buffer accepts no further changes
    pub fn close(&mut self) {
        self.pending.clear();
        self.state.active_editors.clear();
        self.state.memory_version = CanvasDocument::new();
        self.state.file_version = CanvasDocument::new();
        self.state.has_unsaved_changes = false;
        self.state.conflict_detected = false;
        self.phase = DocumentPhase::Closed;
        self.change_listeners.clear();
        tracing::debug!("Closed document {:?}", self.state.path);
    }

    /// Subscribe to `has_unsaved_changes` notifications
    pub fn add_change_listener(
        &mut self,
        listener: impl Fn(&bool) + Send + Sync + 'static,
    ) -> ListenerId {
        self.change_listeners.subscribe(listener)
    }

    pub fn remove_change_listener(&mut self, id: ListenerId) -> bool {
        self.change_listeners.unsubscribe(id)
    }

    fn mark_dirty(&mut self) {
        if self.phase == DocumentPhase::Clean {
            self.phase = DocumentPhase::Dirty;
        }
        // Always notify on a new change, even if already dirty
        self.state.has_unsaved_changes = true;
        self.change_listeners.emit(&true);
    }

    fn refresh_unsaved(&mut self) {
        let unsaved = !self.pending.is_empty() || self.detect_conflict();
        match (self.phase, unsaved) {
            (DocumentPhase::Clean, true) => self.phase = DocumentPhase::Dirty,
            (DocumentPhase::Dirty, false) => self.phase = DocumentPhase::Clean,
            _ => {}
        }
        self.set_unsaved(unsaved);
    }

    fn set_unsaved(&mut self, unsaved: bool) {
        if self.state.has_unsaved_changes != unsaved {
            self.state.has_unsaved_changes = unsaved;
            self.change_listeners.emit(&unsaved);
        }
    }
}

/// Canonical comparison; serialization failures compare unequal
fn same_content(path: &Path, a: &CanvasDocument, b: &CanvasDocument) -> bool {
    match (canonical_json(a), canonical_json(b)) {
        (Ok(a), Ok(b)) => a == b,
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(
                "Could not serialize {:?} for comparison, treating as conflict: {}",
                path,
                e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_model::CanvasNode;
    use std::sync::{Arc, Mutex};

    fn doc(text: &str) -> CanvasDocument {
        CanvasDocument::with_nodes(vec![CanvasNode::text("n1", text)])
    }

    #[test]
    fn test_initialize_has_no_conflict() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        assert!(!buffer.detect_conflict());
        assert!(!buffer.has_unsaved_changes());
        assert_eq!(buffer.phase(), DocumentPhase::Clean);

        buffer.apply_change(ChangeOperation::create(CanvasNode::text("n2", "b")));
        buffer.initialize(doc("z"));
        assert!(!buffer.detect_conflict());
        assert!(buffer.pending_changes().is_empty());
        assert_eq!(buffer.memory_version(), &doc("z"));
    }

    #[test]
    fn test_apply_change_touches_memory_only() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        let op = ChangeOperation::update(CanvasNode::text("n1", "a"), CanvasNode::text("n1", "b"));

        assert!(buffer.apply_change(op));
        assert_eq!(buffer.memory_version().nodes[0].text_content(), Some("b"));
        assert_eq!(buffer.file_version().nodes[0].text_content(), Some("a"));
        assert!(buffer.has_unsaved_changes());
        assert!(buffer.detect_conflict());
        assert!(buffer.pending_changes()[0].applied);
        assert_eq!(buffer.phase(), DocumentPhase::Dirty);
    }

    #[test]
    fn test_mark_changes_saved_advances_file_version() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.apply_change(ChangeOperation::update(
            CanvasNode::text("n1", "a"),
            CanvasNode::text("n1", "b"),
        ));
        let before = buffer.last_sync_time();

        buffer.mark_changes_saved();

        assert_eq!(buffer.file_version(), &doc("b"));
        assert!(!buffer.has_unsaved_changes());
        assert!(buffer.pending_changes().is_empty());
        assert!(buffer.last_sync_time() >= before);
        assert_eq!(buffer.phase(), DocumentPhase::Clean);
    }

    #[test]
    fn test_save_keeps_staged_session_edits() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.apply_change(ChangeOperation::create(CanvasNode::text("n2", "x")));
        buffer.stage_change(ChangeOperation::update(
            CanvasNode::text("n1", "a"),
            CanvasNode::text("n1", "typing"),
        ));

        buffer.mark_changes_saved();

        assert_eq!(buffer.pending_changes().len(), 1);
        assert!(buffer.pending_for("n1").is_some());
        assert!(buffer.has_unsaved_changes());
        assert_eq!(buffer.phase(), DocumentPhase::Dirty);

        assert!(buffer.commit_node("n1"));
        assert_eq!(
            buffer.memory_version().node("n1").unwrap().text_content(),
            Some("typing")
        );
    }

    #[test]
    fn test_external_change_on_clean_document_reloads_memory() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.update_file_version(doc("remote"));

        assert_eq!(buffer.memory_version(), &doc("remote"));
        assert!(!buffer.detect_conflict());
        assert!(!buffer.conflict_detected());
        assert!(!buffer.has_unsaved_changes());
    }

    #[test]
    fn test_external_change_with_unsaved_edits_conflicts() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.apply_change(ChangeOperation::update(
            CanvasNode::text("n1", "a"),
            CanvasNode::text("n1", "b"),
        ));

        buffer.update_file_version(doc("c"));

        assert!(buffer.detect_conflict());
        assert!(buffer.conflict_detected());
        assert_eq!(buffer.memory_version(), &doc("b"));
        assert_eq!(buffer.file_version(), &doc("c"));
    }

    #[test]
    fn test_external_change_matching_memory_is_not_conflict() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.apply_change(ChangeOperation::update(
            CanvasNode::text("n1", "a"),
            CanvasNode::text("n1", "b"),
        ));

        buffer.update_file_version(doc("b"));
        assert!(!buffer.conflict_detected());
    }

    #[test]
    fn test_unchanged_snapshot_while_dirty_is_ignored() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.apply_change(ChangeOperation::create(CanvasNode::text("n2", "x")));

        buffer.update_file_version(doc("a"));

        assert!(!buffer.conflict_detected());
        assert!(buffer.memory_version().contains_node("n2"));
        assert_eq!(buffer.pending_changes().len(), 1);
    }

    #[test]
    fn test_remote_edit_under_open_session_keeps_memory() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.add_active_editor("n1");

        buffer.update_file_version(doc("remote"));

        assert_eq!(buffer.memory_version(), &doc("a"));
        assert_eq!(buffer.file_version(), &doc("remote"));
        assert!(buffer.conflict_detected());
        assert!(buffer.has_unsaved_changes());
        assert!(buffer.conflict_info().has_active_editors);
    }

    #[test]
    fn test_remote_edit_elsewhere_reloads_despite_session() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.add_active_editor("n1");
        let mut remote = doc("a");
        remote.upsert_node(CanvasNode::text("n2", "remote"));

        buffer.update_file_version(remote.clone());

        assert_eq!(buffer.memory_version(), &remote);
        assert!(!buffer.conflict_detected());
        assert!(!buffer.has_unsaved_changes());
    }

    #[test]
    fn test_conflict_info_counts_pending_edits() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        assert!(!buffer.conflict_info().has_active_editors);

        buffer.apply_change(ChangeOperation::create(CanvasNode::text("n2", "x")));
        assert!(!buffer.has_active_editors());
        assert!(buffer.conflict_info().has_active_editors);
    }

    #[test]
    fn test_accept_file_version_drops_local_work() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.apply_change(ChangeOperation::update(
            CanvasNode::text("n1", "a"),
            CanvasNode::text("n1", "b"),
        ));
        buffer.update_file_version(doc("c"));

        buffer.accept_file_version();
        assert_eq!(buffer.memory_version(), &doc("c"));
        assert!(!buffer.has_unsaved_changes());
        assert!(!buffer.conflict_detected());
        assert_eq!(buffer.phase(), DocumentPhase::Clean);
    }

    #[test]
    fn test_change_listener_notified() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));

        let sink = seen.clone();
        let id = buffer.add_change_listener(move |dirty| sink.lock().unwrap().push(*dirty));

        buffer.apply_change(ChangeOperation::create(CanvasNode::text("n2", "x")));
        buffer.mark_changes_saved();
        assert!(buffer.remove_change_listener(id));
        buffer.apply_change(ChangeOperation::create(CanvasNode::text("n3", "y")));

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_flush_phases() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.apply_change(ChangeOperation::create(CanvasNode::text("n2", "x")));

        buffer.begin_flush();
        assert_eq!(buffer.phase(), DocumentPhase::Flushing);
        buffer.mark_conflicted();
        assert_eq!(buffer.phase(), DocumentPhase::Conflicted);
        buffer.end_flush();
        assert_eq!(buffer.phase(), DocumentPhase::Dirty);

        buffer.begin_flush();
        buffer.mark_changes_saved();
        buffer.end_flush();
        assert_eq!(buffer.phase(), DocumentPhase::Clean);
    }

    #[test]
    fn test_close_clears_state() {
        let mut buffer = DocumentBuffer::new("a.canvas", doc("a"));
        buffer.add_active_editor("n1");
        buffer.apply_change(ChangeOperation::create(CanvasNode::text("n2", "x")));

        buffer.close();

        assert!(buffer.is_closed());
        assert!(!buffer.has_unsaved_changes());
        assert!(!buffer.has_active_editors());
        assert!(buffer.memory_version().is_empty());
        assert!(!buffer.apply_change(ChangeOperation::create(CanvasNode::text("n3", "y"))));
    }
}
