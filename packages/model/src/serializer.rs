//! Canonical serialization and content hashing.
//!
//! Two documents are "the same" for conflict purposes when their canonical
//! JSON strings are equal. Node fields serialize through a sorted map, so the
//! output does not depend on the key order of the file they were read from.

use crate::document::CanvasDocument;
use crate::error::ModelResult;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Parse a document from JSON Canvas text
pub fn parse_document(source: &str) -> ModelResult<CanvasDocument> {
    Ok(serde_json::from_str(source)?)
}

/// Compact, deterministic serialization used for equality checks
pub fn canonical_json(doc: &CanvasDocument) -> ModelResult<String> {
    Ok(serde_json::to_string(doc)?)
}

/// 16 hex digit hash of the canonical serialization
pub fn content_hash(doc: &CanvasDocument) -> ModelResult<String> {
    let canonical = canonical_json(doc)?;
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    Ok(format!("{:016x}", hasher.finish()))
}

/// Tab-indented JSON, matching what canvas hosts write to disk
pub fn to_pretty_json(doc: &CanvasDocument) -> ModelResult<String> {
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    doc.serialize(&mut serializer)?;
    // serde_json only emits valid UTF-8
    Ok(String::from_utf8_lossy(&out).into_owned())
}
