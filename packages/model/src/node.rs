//! # Canvas Nodes
//!
//! A node is one addressable card on the canvas. Every node shares the same
//! envelope (id, position, size, color) and carries a type-specific payload:
//!
//! ```text
//! { "id": "n1", "type": "text", "x": 0, "y": 0, "width": 250, "height": 60, "text": "..." }
//! ```
//!
//! Fields this crate does not know about are kept in `extra` so a document
//! written by a newer host survives a load/save cycle unchanged.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Unknown fields carried through untouched (sorted for stable output)
pub type Extras = BTreeMap<String, Value>;

const DEFAULT_WIDTH: f64 = 250.0;
const DEFAULT_HEIGHT: f64 = 60.0;

/// One node of a canvas document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct CanvasNode {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub color: Option<String>,
    pub kind: NodeKind,
    pub extra: Extras,
}

/// Type-specific node payload
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Text {
        text: String,
    },
    File {
        file: String,
        subpath: Option<String>,
    },
    Link {
        url: String,
    },
    Group {
        label: Option<String>,
        background: Option<String>,
        background_style: Option<String>,
    },
}

impl NodeKind {
    /// The `type` tag used in JSON Canvas
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Text { .. } => "text",
            NodeKind::File { .. } => "file",
            NodeKind::Link { .. } => "link",
            NodeKind::Group { .. } => "group",
        }
    }
}

impl CanvasNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            x: 0.0,
            y: 0.0,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            color: None,
            kind,
            extra: Extras::new(),
        }
    }

    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Text { text: text.into() })
    }

    pub fn file(id: impl Into<String>, file: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::File {
                file: file.into(),
                subpath: None,
            },
        )
    }

    pub fn link(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Link { url: url.into() })
    }

    pub fn group(id: impl Into<String>, label: Option<String>) -> Self {
        Self::new(
            id,
            NodeKind::Group {
                label,
                background: None,
                background_style: None,
            },
        )
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn sized(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Text payload, if this is a text node
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Replace the text payload. Returns false for non-text nodes.
    pub fn set_text(&mut self, new_text: impl Into<String>) -> bool {
        match &mut self.kind {
            NodeKind::Text { text } => {
                *text = new_text.into();
                true
            }
            _ => false,
        }
    }
}

impl TryFrom<Value> for CanvasNode {
    type Error = ModelError;

    fn try_from(value: Value) -> ModelResult<Self> {
        let Value::Object(mut map) = value else {
            return Err(ModelError::invalid_field("node", "<root>", "expected an object"));
        };

        let id = take_string(&mut map, "node", "id")?;
        let owner = format!("node {}", id);
        let node_type = take_string(&mut map, &owner, "type")?;

        let x = take_number(&mut map, &owner, "x")?;
        let y = take_number(&mut map, &owner, "y")?;
        let width = take_number(&mut map, &owner, "width")?;
        let height = take_number(&mut map, &owner, "height")?;
        let color = take_optional_string(&mut map, &owner, "color")?;

        let kind = match node_type.as_str() {
            "text" => NodeKind::Text {
                text: take_string(&mut map, &owner, "text")?,
            },
            "file" => NodeKind::File {
                file: take_string(&mut map, &owner, "file")?,
                subpath: take_optional_string(&mut map, &owner, "subpath")?,
            },
            "link" => NodeKind::Link {
                url: take_string(&mut map, &owner, "url")?,
            },
            "group" => NodeKind::Group {
                label: take_optional_string(&mut map, &owner, "label")?,
                background: take_optional_string(&mut map, &owner, "background")?,
                background_style: take_optional_string(&mut map, &owner, "backgroundStyle")?,
            },
            other => {
                return Err(ModelError::UnknownNodeType {
                    id,
                    node_type: other.to_string(),
                })
            }
        };

        Ok(Self {
            id,
            x,
            y,
            width,
            height,
            color,
            kind,
            extra: map.into_iter().collect(),
        })
    }
}

impl From<CanvasNode> for Value {
    fn from(node: CanvasNode) -> Self {
        let mut map: Map<String, Value> = node.extra.into_iter().collect();

        map.insert("id".to_string(), Value::String(node.id));
        map.insert("type".to_string(), Value::String(node.kind.type_name().to_string()));
        map.insert("x".to_string(), number_value(node.x));
        map.insert("y".to_string(), number_value(node.y));
        map.insert("width".to_string(), number_value(node.width));
        map.insert("height".to_string(), number_value(node.height));
        if let Some(color) = node.color {
            map.insert("color".to_string(), Value::String(color));
        }

        match node.kind {
            NodeKind::Text { text } => {
                map.insert("text".to_string(), Value::String(text));
            }
            NodeKind::File { file, subpath } => {
                map.insert("file".to_string(), Value::String(file));
                if let Some(subpath) = subpath {
                    map.insert("subpath".to_string(), Value::String(subpath));
                }
            }
            NodeKind::Link { url } => {
                map.insert("url".to_string(), Value::String(url));
            }
            NodeKind::Group {
                label,
                background,
                background_style,
            } => {
                let optional = [
                    ("label", label),
                    ("background", background),
                    ("backgroundStyle", background_style),
                ];
                for (key, value) in optional {
                    if let Some(value) = value {
                        map.insert(key.to_string(), Value::String(value));
                    }
                }
            }
        }

        Value::Object(map)
    }
}

/// Integral coordinates are written as integers, the way hosts write them
fn number_value(value: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < MAX_EXACT {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

fn take_string(map: &mut Map<String, Value>, owner: &str, field: &str) -> ModelResult<String> {
    match map.remove(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ModelError::invalid_field(owner, field, "expected a string")),
        None => Err(ModelError::missing_field(owner, field)),
    }
}

fn take_optional_string(
    map: &mut Map<String, Value>,
    owner: &str,
    field: &str,
) -> ModelResult<Option<String>> {
    match map.remove(field) {
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(ModelError::invalid_field(owner, field, "expected a string")),
    }
}

fn take_number(map: &mut Map<String, Value>, owner: &str, field: &str) -> ModelResult<f64> {
    match map.remove(field) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ModelError::invalid_field(owner, field, "number out of range")),
        Some(_) => Err(ModelError::invalid_field(owner, field, "expected a number")),
        None => Err(ModelError::missing_field(owner, field)),
    }
}
