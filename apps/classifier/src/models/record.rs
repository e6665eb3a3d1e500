use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::document::DocumentId;

/// Marker written to tabular output and summaries for a value that failed validation.
pub const INVALID_MARKER: &str = "Invalid";
/// Marker for a document that has no entry for a dimension at all.
pub const NOT_CLASSIFIED_MARKER: &str = "Not Classified";

/// An accepted value for one dimension. Single-valued dimensions carry one label,
/// multi-valued dimensions a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Single(String),
    Multi(BTreeSet<String>),
}

impl Label {
    pub fn values(&self) -> Vec<&str> {
        match self {
            Label::Single(value) => vec![value.as_str()],
            Label::Multi(values) => values.iter().map(String::as_str).collect(),
        }
    }

    /// Flattened form used in CSV cells and combination buckets.
    pub fn display(&self) -> String {
        match self {
            Label::Single(value) => value.clone(),
            Label::Multi(values) => values.iter().cloned().collect::<Vec<_>>().join(" + "),
        }
    }
}

/// The outcome for one document on one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Classification {
    Valid {
        label: Label,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    /// The LLM answered, but with something outside the dimension's vocabulary.
    /// `raw` keeps the offending value verbatim for later inspection.
    Invalid { raw: serde_json::Value, reason: String },
}

impl Classification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Classification::Valid { .. })
    }

    pub fn label(&self) -> Option<&Label> {
        match self {
            Classification::Valid { label, .. } => Some(label),
            Classification::Invalid { .. } => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Classification::Valid { label, .. } => label.display(),
            Classification::Invalid { .. } => INVALID_MARKER.to_string(),
        }
    }
}

/// Everything known about one document's classification, keyed by dimension name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub document_id: DocumentId,
    pub dimensions: BTreeMap<String, Classification>,
}

impl ClassificationRecord {
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            dimensions: BTreeMap::new(),
        }
    }

    pub fn get(&self, dimension: &str) -> Option<&Classification> {
        self.dimensions.get(dimension)
    }
}
