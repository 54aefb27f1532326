use crate::error::CommonError;
use crate::result::CommonResult;
use canvas_model::{parse_document, to_pretty_json, CanvasDocument};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Backing storage for canvas documents
pub trait DocumentStore: Send + Sync {
    /// Read and parse the document at `path`
    fn read(&self, path: &Path) -> CommonResult<CanvasDocument>;

    /// Serialize and persist `doc` at `path`
    fn write(&self, path: &Path, doc: &CanvasDocument) -> CommonResult<()>;

    /// Check if a document exists
    fn exists(&self, path: &Path) -> bool;

    /// Location reported by file system events for `path`
    fn resolve(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

/// Document store backed by the real file system
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    /// Relative paths resolve against `root`; absolute paths are used as-is
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DocumentStore for FsDocumentStore {
    fn read(&self, path: &Path) -> CommonResult<CanvasDocument> {
        let full_path = self.resolve(path);
        let source = match std::fs::read_to_string(&full_path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CommonError::NotFound(full_path));
            }
            Err(e) => return Err(e.into()),
        };

        // Hosts create empty canvas files before writing anything to them
        if source.trim().is_empty() {
            return Ok(CanvasDocument::new());
        }

        Ok(parse_document(&source)?)
    }

    fn write(&self, path: &Path, doc: &CanvasDocument) -> CommonResult<()> {
        let full_path = self.resolve(path);
        let contents = to_pretty_json(doc)?;

        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write next to the target and rename so readers never see a partial file
        let mut tmp_name = full_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &full_path)?;

        tracing::debug!("Wrote canvas document to {:?}", full_path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

/// In-memory document store for testing
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<PathBuf, CanvasDocument>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&self, path: impl Into<PathBuf>, doc: CanvasDocument) {
        self.documents().insert(path.into(), doc);
    }

    /// Current stored document (simulates reading the file directly)
    pub fn get(&self, path: &Path) -> Option<CanvasDocument> {
        self.documents().get(path).cloned()
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every following write fail with an IO error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn documents(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, CanvasDocument>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn read(&self, path: &Path) -> CommonResult<CanvasDocument> {
        self.get(path)
            .ok_or_else(|| CommonError::NotFound(path.to_path_buf()))
    }

    fn write(&self, path: &Path, doc: &CanvasDocument) -> CommonResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "write refused").into());
        }
        self.documents().insert(path.to_path_buf(), doc.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.documents().contains_key(path)
    }
}
