//! Course record types
//!
//! Records move through the pipeline in two phases: a loose `RawCourse` map as
//! scraped (the `id` field may still be absent at fetch time), and a `Course`
//! narrowed to the canonical shape once the required-field checks pass. Only
//! `Course` values ever reach the primary datastore.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::errors::HarvestError;

/// A scraped record exactly as extracted from a detail page, persisted verbatim
/// to the append log.
pub type RawCourse = Map<String, Value>;

/// Coerce the `id` field of a raw record to its string form.
///
/// Catalog identifiers are opaque; sites emit them as JSON strings or numbers
/// and both must resolve to the same resume/dedup key.
pub fn raw_id(record: &RawCourse) -> Option<String> {
    match record.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Canonical course record, immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Course {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub instructor: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Course {
    /// Narrow a raw record to the canonical shape.
    ///
    /// `line` identifies the source log line for error reporting. The `id`
    /// presence check runs first; remaining fields are typed by serde and a
    /// type-invalid field fails the conversion rather than being dropped.
    pub fn from_raw(record: &RawCourse, line: usize) -> Result<Self, HarvestError> {
        let id = raw_id(record)
            .ok_or_else(|| HarvestError::validation(line, "missing required field 'id'"))?;

        let mut normalized = record.clone();
        normalized.insert("id".to_string(), Value::String(id));

        serde_json::from_value(Value::Object(normalized))
            .map_err(|e| HarvestError::validation(line, format!("field type mismatch: {e}")))
    }
}
