//! Save callback registry.
//!
//! The host registers the routines that actually persist a document. A
//! trigger runs them one after another in registration order, and never
//! runs two trigger chains at the same time.

use crate::policy::SaveTrigger;
use crate::shared::{lock_buffer, SharedBuffer};
use anyhow::Context;
use canvas_common::DocumentStore;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("Save callback failed: {0:#}")]
    Callback(#[from] anyhow::Error),

    #[error("Document is closed: {0:?}")]
    Closed(PathBuf),
}

pub type SaveCallback =
    Arc<dyn Fn(SaveTrigger) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

pub struct SaveCallbacks {
    buffer: SharedBuffer,
    callbacks: Mutex<Vec<(CallbackId, SaveCallback)>>,
    next_id: AtomicU64,
    in_flight: tokio::sync::Mutex<()>,
}

impl SaveCallbacks {
    pub fn new(buffer: SharedBuffer) -> Self {
        Self {
            buffer,
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn add(
        &self,
        callback: impl Fn(SaveTrigger) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    ) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries().push((id, Arc::new(callback)));
        id
    }

    pub fn remove(&self, id: CallbackId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Await every callback in order. The first failure stops the chain and
    /// is returned; the attempt time is recorded either way.
    pub async fn trigger_save(&self, trigger: SaveTrigger) -> Result<(), SaveError> {
        let _guard = self.in_flight.lock().await;

        let callbacks: Vec<SaveCallback> = self
            .entries()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        let mut result = Ok(());
        for callback in callbacks {
            if let Err(e) = callback(trigger).await {
                result = Err(SaveError::Callback(e));
                break;
            }
        }

        lock_buffer(&self.buffer).record_save_attempt();
        if let Err(e) = &result {
            tracing::error!("Save for trigger {} failed: {}", trigger, e);
        }
        result
    }

    /// Run the chain right away, bypassing any scheduled auto-save
    pub async fn trigger_immediate_save(&self) -> Result<(), SaveError> {
        self.trigger_save(SaveTrigger::AutoSave).await
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<(CallbackId, SaveCallback)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SaveCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveCallbacks")
            .field("count", &self.len())
            .finish()
    }
}

/// Default persistence routine: write the memory version through `store`
/// and mark the buffer saved.
pub fn store_save_callback(
    store: Arc<dyn DocumentStore>,
    buffer: SharedBuffer,
) -> impl Fn(SaveTrigger) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static {
    move |trigger| {
        let store = store.clone();
        let buffer = buffer.clone();
        async move {
            let mut guard = lock_buffer(&buffer);
            if guard.is_closed() {
                anyhow::bail!("document {:?} is closed", guard.path());
            }
            let path = guard.path().to_path_buf();

            store
                .write(&path, guard.memory_version())
                .with_context(|| format!("writing {:?}", path))?;
            guard.mark_changes_saved();

            tracing::info!("Saved {:?} ({})", path, trigger);
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::shared_buffer;
    use canvas_common::MemoryDocumentStore;
    use canvas_editor::{CanvasDocument, CanvasNode, ChangeOperation};
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    fn dirty_buffer() -> SharedBuffer {
        let buffer = shared_buffer(
            "a.canvas",
            CanvasDocument::with_nodes(vec![CanvasNode::text("n1", "a")]),
        );
        lock_buffer(&buffer).apply_change(ChangeOperation::create(CanvasNode::text("n2", "b")));
        buffer
    }

    #[tokio::test]
    async fn test_callbacks_run_in_registration_order() {
        let callbacks = SaveCallbacks::new(dirty_buffer());
        let order = Arc::new(StdMutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = order.clone();
            callbacks.add(move |trigger| {
                let order = order.clone();
                async move {
                    tokio::task::yield_now().await;
                    order.lock().unwrap().push((name, trigger));
                    Ok(())
                }
                .boxed()
            });
        }

        callbacks.trigger_save(SaveTrigger::ManualSave).await.unwrap();
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                ("first", SaveTrigger::ManualSave),
                ("second", SaveTrigger::ManualSave),
                ("third", SaveTrigger::ManualSave),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_propagates_and_records_attempt() {
        let buffer = dirty_buffer();
        let callbacks = SaveCallbacks::new(buffer.clone());
        let reached = Arc::new(StdMutex::new(false));

        callbacks.add(|_| async { Err::<(), _>(anyhow::anyhow!("disk full")) }.boxed());
        let flag = reached.clone();
        callbacks.add(move |_| {
            let flag = flag.clone();
            async move {
                *flag.lock().unwrap() = true;
                Ok(())
            }
            .boxed()
        });

        let err = callbacks.trigger_save(SaveTrigger::ManualSave).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(!*reached.lock().unwrap());

        let guard = lock_buffer(&buffer);
        assert!(guard.last_auto_save_time().is_some());
        assert!(guard.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_remove_callback() {
        let callbacks = SaveCallbacks::new(dirty_buffer());
        let id = callbacks.add(|_| async { Err::<(), _>(anyhow::anyhow!("should not run")) }.boxed());

        assert!(callbacks.remove(id));
        assert!(!callbacks.remove(id));
        assert!(callbacks.is_empty());
        callbacks.trigger_immediate_save().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_callback_persists_and_marks_saved() {
        let buffer = dirty_buffer();
        let store = Arc::new(MemoryDocumentStore::new());
        let callbacks = SaveCallbacks::new(buffer.clone());
        callbacks.add(store_save_callback(store.clone(), buffer.clone()));

        callbacks.trigger_save(SaveTrigger::ManualSave).await.unwrap();

        let saved = store.get(Path::new("a.canvas")).unwrap();
        assert!(saved.contains_node("n2"));
        let guard = lock_buffer(&buffer);
        assert!(!guard.has_unsaved_changes());
        assert_eq!(guard.file_version(), &saved);
    }

    #[tokio::test]
    async fn test_store_callback_failure_leaves_document_dirty() {
        let buffer = dirty_buffer();
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_fail_writes(true);
        let callbacks = SaveCallbacks::new(buffer.clone());
        callbacks.add(store_save_callback(store.clone(), buffer.clone()));

        let err = callbacks.trigger_save(SaveTrigger::ManualSave).await.unwrap_err();
        assert!(matches!(err, SaveError::Callback(_)));
        assert!(err.to_string().contains("write refused"));
        assert!(lock_buffer(&buffer).has_unsaved_changes());
        assert_eq!(store.write_count(), 0);
    }
}
