use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Node {id} has unknown type {node_type:?}")]
    UnknownNodeType { id: String, node_type: String },

    #[error("Missing field {field:?} on {owner}")]
    MissingField { owner: String, field: String },

    #[error("Invalid field {field:?} on {owner}: {message}")]
    InvalidField {
        owner: String,
        field: String,
        message: String,
    },
}

impl ModelError {
    pub fn missing_field(owner: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            owner: owner.into(),
            field: field.into(),
        }
    }

    pub fn invalid_field(
        owner: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            owner: owner.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}
