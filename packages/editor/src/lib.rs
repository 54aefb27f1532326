//! # Canvas Editor
//!
//! In-memory editing engine for canvas documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ session: per-node edit lifecycle            │
//! │  - start / update / stop                    │
//! │  - last write wins per node                 │
//! └─────────────────────────────────────────────┘
//!                     ↓ stage / commit / discard
//! ┌─────────────────────────────────────────────┐
//! │ document: memory + file snapshot pair       │
//! │  - pending change log                       │
//! │  - divergence detection                     │
//! └─────────────────────────────────────────────┘
//!                     ↓ ConflictInfo
//! ┌─────────────────────────────────────────────┐
//! │ conflict: use-remote / auto-merge / prompt  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Memory is authoritative while editing**: edits never wait on I/O
//! 2. **File version moves only on save or external change**
//! 3. **Fail soft on sessions**: unknown nodes are logged, never errors
//! 4. **Never drop local edits on failure**: resolver errors keep local
//!
//! ## Usage
//!
//! ```rust,ignore
//! use canvas_editor::{DocumentBuffer, EditorSessionTracker};
//!
//! let mut buffer = DocumentBuffer::new("board.canvas", snapshot);
//! let mut sessions = EditorSessionTracker::new();
//!
//! sessions.start_editing(&mut buffer, "n1", node.clone());
//! sessions.update_content(&mut buffer, "n1", edited);
//! sessions.stop_editing(&mut buffer, "n1", true);
//!
//! assert!(buffer.has_unsaved_changes());
//! ```

mod conflict;
mod document;
mod errors;
mod listeners;
mod mutations;
mod session;

pub use conflict::{
    can_auto_merge, perform_auto_merge, ConflictChoice, ConflictInfo, ConflictPrompt,
    ConflictResolution, ConflictResolver, NoPrompt, ResolutionStrategy,
};
pub use document::{DocumentBuffer, DocumentPhase, DocumentState};
pub use errors::EditorError;
pub use listeners::{ListenerId, Listeners};
pub use mutations::{ChangeKind, ChangeOperation};
pub use session::{detect_editing_mode, EditingMode, EditorSessionTracker, EditorState, SessionEvent};

// Re-export model types for convenience
pub use canvas_model::{CanvasDocument, CanvasEdge, CanvasNode, NodeKind};
