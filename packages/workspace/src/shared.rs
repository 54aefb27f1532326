use canvas_editor::{CanvasDocument, DocumentBuffer};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Buffer shared between the save engine, its callbacks and the host
pub type SharedBuffer = Arc<Mutex<DocumentBuffer>>;

pub fn shared_buffer(path: impl Into<PathBuf>, snapshot: CanvasDocument) -> SharedBuffer {
    Arc::new(Mutex::new(DocumentBuffer::new(path, snapshot)))
}

/// Lock the buffer, recovering it if a previous holder panicked
pub fn lock_buffer(buffer: &SharedBuffer) -> MutexGuard<'_, DocumentBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}
