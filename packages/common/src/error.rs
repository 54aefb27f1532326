use canvas_model::ModelError;
use std::path::PathBuf;
use thiserror::Error;

/// Error type shared by document stores and their callers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document not found: {}", .0.display())]
    NotFound(PathBuf),
}
