use crate::callbacks::{store_save_callback, CallbackId, SaveCallbacks, SaveError};
use crate::engine::{HeadlessHost, SaveHost, SaveOutcome, SaveTriggerEngine, ShutdownOutcome};
use crate::policy::{SaveSettings, SaveTrigger};
use crate::shared::{lock_buffer, shared_buffer, SharedBuffer};
use crate::watcher::{FileWatcher, WatcherError};
use canvas_common::{CommonError, DocumentStore};
use canvas_editor::{
    CanvasDocument, CanvasNode, ChangeOperation, ConflictResolver, DocumentPhase,
    EditorSessionTracker, EditorState, ListenerId, SessionEvent,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Store error: {0}")]
    Store(#[from] CommonError),

    #[error("Save error: {0}")]
    Save(#[from] SaveError),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("Document not open: {0:?}")]
    NotOpen(PathBuf),
}

/// One open canvas: its buffer, edit sessions and save engine.
///
/// Locks are always taken sessions first, then buffer. Listeners run while
/// both are held and must not call back into the document.
///
/// Edits may be made from any thread. Auto-save is only scheduled when the
/// caller is inside a tokio runtime; elsewhere the edit is kept and a later
/// save trigger flushes it.
pub struct OpenDocument {
    path: PathBuf,
    buffer: SharedBuffer,
    sessions: Mutex<EditorSessionTracker>,
    engine: Arc<SaveTriggerEngine>,
    store_callback: CallbackId,
}

impl OpenDocument {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn engine(&self) -> &Arc<SaveTriggerEngine> {
        &self.engine
    }

    pub fn callbacks(&self) -> &Arc<SaveCallbacks> {
        self.engine.callbacks()
    }

    pub fn snapshot(&self) -> CanvasDocument {
        lock_buffer(&self.buffer).memory_version().clone()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        lock_buffer(&self.buffer).has_unsaved_changes()
    }

    pub fn phase(&self) -> DocumentPhase {
        lock_buffer(&self.buffer).phase()
    }

    pub fn start_editing(&self, node_id: &str, content: CanvasNode) -> Option<EditorState> {
        let mut sessions = self.sessions();
        let mut buffer = lock_buffer(&self.buffer);
        sessions.start_editing(&mut buffer, node_id, content)
    }

    /// Stage an edit and debounce an auto-save when that trigger is on
    pub fn update_content(&self, node_id: &str, content: CanvasNode) -> bool {
        let changed = {
            let mut sessions = self.sessions();
            let mut buffer = lock_buffer(&self.buffer);
            sessions.update_content(&mut buffer, node_id, content)
        };
        if changed {
            self.engine.schedule_auto_save();
        }
        changed
    }

    pub fn stop_editing(&self, node_id: &str, save: bool) -> bool {
        let mut sessions = self.sessions();
        let mut buffer = lock_buffer(&self.buffer);
        sessions.stop_editing(&mut buffer, node_id, save)
    }

    pub fn editor_state(&self, node_id: &str) -> Option<EditorState> {
        self.sessions().state(node_id).cloned()
    }

    /// Apply a structural change made outside an edit session
    pub fn apply_change(&self, op: ChangeOperation) -> bool {
        let applied = lock_buffer(&self.buffer).apply_change(op);
        if applied {
            self.engine.schedule_auto_save();
        }
        applied
    }

    pub async fn save(&self, trigger: SaveTrigger) -> Result<SaveOutcome, SaveError> {
        self.engine.perform_save(trigger).await
    }

    pub async fn save_now(&self) -> Result<SaveOutcome, SaveError> {
        self.engine.on_manual_save_shortcut().await
    }

    pub fn add_change_listener(
        &self,
        listener: impl Fn(&bool) + Send + Sync + 'static,
    ) -> ListenerId {
        lock_buffer(&self.buffer).add_change_listener(listener)
    }

    pub fn add_state_change_listener(
        &self,
        listener: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.sessions().add_state_change_listener(listener)
    }

    fn sessions(&self) -> MutexGuard<'_, EditorSessionTracker> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_all_sessions(&self, save: bool) -> usize {
        let mut sessions = self.sessions();
        let mut buffer = lock_buffer(&self.buffer);
        sessions.stop_all(&mut buffer, save)
    }

    fn release(&self) {
        self.engine.cancel_auto_save();
        self.callbacks().remove(self.store_callback);
        lock_buffer(&self.buffer).close();
    }
}

impl std::fmt::Debug for OpenDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenDocument")
            .field("path", &self.path)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Registry of open canvas documents sharing one store and save settings
pub struct CanvasWorkspace {
    store: Arc<dyn DocumentStore>,
    settings: SaveSettings,
    resolver: ConflictResolver,
    host: Arc<dyn SaveHost>,
    documents: HashMap<PathBuf, Arc<OpenDocument>>,
}

impl CanvasWorkspace {
    pub fn new(store: Arc<dyn DocumentStore>, settings: SaveSettings) -> Self {
        Self {
            store,
            settings,
            resolver: ConflictResolver::without_prompt(),
            host: Arc::new(HeadlessHost),
            documents: HashMap::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_host(mut self, host: Arc<dyn SaveHost>) -> Self {
        self.host = host;
        self
    }

    pub fn settings(&self) -> &SaveSettings {
        &self.settings
    }

    /// Load `path` from the store, or return it if already open
    pub fn open(&mut self, path: impl Into<PathBuf>) -> Result<Arc<OpenDocument>, WorkspaceError> {
        let path = path.into();
        if let Some(doc) = self.documents.get(&path) {
            return Ok(doc.clone());
        }

        let snapshot = self.store.read(&path)?;
        let buffer = shared_buffer(path.clone(), snapshot);
        let callbacks = Arc::new(SaveCallbacks::new(buffer.clone()));
        let store_callback = callbacks.add(store_save_callback(self.store.clone(), buffer.clone()));
        let engine = Arc::new(SaveTriggerEngine::new(
            buffer.clone(),
            callbacks,
            self.resolver.clone(),
            self.host.clone(),
            self.settings.clone(),
        ));

        let doc = Arc::new(OpenDocument {
            path: path.clone(),
            buffer,
            sessions: Mutex::new(EditorSessionTracker::new()),
            engine,
            store_callback,
        });
        tracing::info!("Opened {:?}", path);
        self.documents.insert(path, doc.clone());
        Ok(doc)
    }

    pub fn get(&self, path: &Path) -> Option<Arc<OpenDocument>> {
        self.documents.get(path).cloned()
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }

    pub fn open_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.documents.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Commit open sessions, run the file-close trigger and release the
    /// buffer. A failed save leaves the document open.
    pub async fn close(&mut self, path: &Path) -> Result<SaveOutcome, WorkspaceError> {
        let doc = self
            .documents
            .get(path)
            .cloned()
            .ok_or_else(|| WorkspaceError::NotOpen(path.to_path_buf()))?;

        doc.stop_all_sessions(true);
        let outcome = doc.save(SaveTrigger::FileClose).await?;
        if doc.has_unsaved_changes() {
            tracing::warn!("Closing {:?} with unsaved changes", path);
        }

        doc.release();
        self.documents.remove(path);
        tracing::info!("Closed {:?}", path);
        Ok(outcome)
    }

    /// Re-read `path` after an out-of-band change. Returns whether the
    /// document now holds a conflict.
    pub fn handle_external_change(&self, path: &Path) -> Result<bool, WorkspaceError> {
        let Some(doc) = self.documents.get(path) else {
            return Ok(false);
        };

        let snapshot = self.store.read(path)?;
        let mut buffer = lock_buffer(&doc.buffer);
        buffer.update_file_version(snapshot);
        Ok(buffer.conflict_detected())
    }

    /// Route changes reported by `watcher` to the open documents they touch.
    /// Returns the paths of documents that were updated.
    pub fn poll_watcher(&self, watcher: &FileWatcher) -> Result<Vec<PathBuf>, WorkspaceError> {
        let changed = watcher.drain_changes();
        let mut updated = Vec::new();

        for path in self.open_paths() {
            let resolved = self.store.resolve(&path);
            let touched = changed
                .iter()
                .any(|event_path| same_file(event_path, &resolved));
            if touched {
                self.handle_external_change(&path)?;
                updated.push(path);
            }
        }
        Ok(updated)
    }

    /// Ask every document to flush before exit. The first blocked document
    /// stops the shutdown and every document stays open.
    pub async fn shutdown(&mut self) -> Result<ShutdownOutcome, WorkspaceError> {
        for path in self.open_paths() {
            let Some(doc) = self.documents.get(&path) else {
                continue;
            };
            doc.stop_all_sessions(true);
            if doc.engine.on_app_shutdown().await? == ShutdownOutcome::Blocked {
                tracing::info!("Shutdown blocked by {:?}", path);
                return Ok(ShutdownOutcome::Blocked);
            }
        }

        for (_, doc) in self.documents.drain() {
            doc.release();
        }
        tracing::info!("Workspace shut down");
        Ok(ShutdownOutcome::Proceed)
    }
}

impl std::fmt::Debug for CanvasWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasWorkspace")
            .field("settings", &self.settings)
            .field("documents", &self.open_paths())
            .finish_non_exhaustive()
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
