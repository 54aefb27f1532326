//! # Canvas Workspace
//!
//! Save orchestration for open canvas documents: trigger policy, save
//! callbacks, conflict handling on flush, debounced auto-save, and file
//! watching.
//!
//! ```rust,ignore
//! use canvas_workspace::{CanvasWorkspace, SaveSettings, SaveTrigger};
//!
//! let mut workspace = CanvasWorkspace::new(store, SaveSettings::default());
//! let doc = workspace.open("board.canvas")?;
//! doc.start_editing("n1", node.clone());
//! doc.update_content("n1", edited);
//! doc.stop_editing("n1", true);
//! doc.save(SaveTrigger::ManualSave).await?;
//! ```

pub mod callbacks;
pub mod engine;
pub mod policy;
pub mod scheduler;
pub mod shared;
pub mod state;
pub mod watcher;

pub use callbacks::{store_save_callback, CallbackId, SaveCallback, SaveCallbacks, SaveError};
pub use engine::{
    HeadlessHost, SaveHost, SaveOutcome, SaveTriggerEngine, ShutdownChoice, ShutdownOutcome,
};
pub use policy::{SavePolicy, SaveSettings, SaveTrigger, SettingsError};
pub use scheduler::SaveScheduler;
pub use shared::{lock_buffer, shared_buffer, SharedBuffer};
pub use state::{CanvasWorkspace, OpenDocument, WorkspaceError};
pub use watcher::{is_canvas_file, FileWatcher, WatcherError, WatcherResult};
