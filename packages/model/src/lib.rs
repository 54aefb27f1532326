pub mod document;
pub mod edge;
pub mod error;
pub mod node;
pub mod serializer;

pub use document::CanvasDocument;
pub use edge::{CanvasEdge, EdgeEnd, Side};
pub use error::{ModelError, ModelResult};
pub use node::{CanvasNode, Extras, NodeKind};
pub use serializer::{canonical_json, content_hash, parse_document, to_pretty_json};
