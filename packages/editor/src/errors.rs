//! Error types for the editor

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditorError {
    #[error("Conflict prompt failed: {0}")]
    Prompt(String),

    #[error("No conflict prompt is attached")]
    PromptUnavailable,
}
