use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Failed to create watcher: {0}")]
    CreateError(#[from] notify::Error),

    #[error("Watch error: {0}")]
    WatchError(String),
}

pub type WatcherResult<T> = Result<T, WatcherError>;

const CANVAS_EXTENSION: &str = "canvas";

/// Watches a directory tree for changes to canvas files
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<Event>>,
}

impl FileWatcher {
    pub fn new(path: PathBuf) -> WatcherResult<Self> {
        let (tx, rx) = channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;

        watcher.watch(&path, RecursiveMode::Recursive)?;
        tracing::info!("Watching {:?} for canvas changes", path);

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
        })
    }

    /// Block up to `timeout` for the next batch of changed canvas files.
    /// Returns an empty list on timeout.
    pub fn next_changes(&self, timeout: Duration) -> WatcherResult<Vec<PathBuf>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(event)) => Ok(canvas_paths(&event)),
            Ok(Err(e)) => Err(WatcherError::WatchError(e.to_string())),
            Err(RecvTimeoutError::Timeout) => Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => {
                Err(WatcherError::WatchError("watcher channel closed".to_string()))
            }
        }
    }

    /// Drain everything queued so far without blocking
    pub fn drain_changes(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        while let Ok(res) = self.receiver.try_recv() {
            match res {
                Ok(event) => {
                    for path in canvas_paths(&event) {
                        if !paths.contains(&path) {
                            paths.push(path);
                        }
                    }
                }
                Err(e) => tracing::warn!("Watch error: {}", e),
            }
        }
        paths
    }
}

/// Canvas files created or modified by `event`
fn canvas_paths(event: &Event) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| is_canvas_file(path))
        .cloned()
        .collect()
}

pub fn is_canvas_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(CANVAS_EXTENSION)
}
