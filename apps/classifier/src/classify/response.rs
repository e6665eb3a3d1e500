//! Decode-then-validate for batch classification responses.
//!
//! Decoding is all-or-nothing: text that does not contain a JSON array of
//! values is a `SchemaError` and the batch is re-prompted. Validation is per
//! entry and per dimension: nothing it finds is an error, it is recorded either
//! as an `Invalid` classification or as an `Anomaly`.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::classify::dimensions::DimensionGroup;
use crate::llm_client::extract_json_array;
use crate::models::{Classification, DocumentId};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("response contains no JSON array")]
    NoJsonArray,

    #[error("response JSON is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Something in a response that could not be matched to the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// Entry had no usable `document_id` (or was not an object at all).
    MissingIdentifier { entry_index: usize },
    /// Entry names an id that is not part of this batch.
    UnknownDocument { document_id: String },
    /// A second entry for a document already answered in this response.
    DuplicateEntry { document_id: DocumentId },
    /// A document in the batch that no entry answered.
    MissingEntry { document_id: DocumentId },
}

#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub assignments: BTreeMap<DocumentId, BTreeMap<String, Classification>>,
    pub anomalies: Vec<Anomaly>,
}

impl DecodedBatch {
    /// Batch members that received no entry.
    pub fn unanswered(&self) -> Vec<DocumentId> {
        self.anomalies
            .iter()
            .filter_map(|a| match a {
                Anomaly::MissingEntry { document_id } => Some(*document_id),
                _ => None,
            })
            .collect()
    }
}

/// Strictly decodes the JSON array embedded in the response text.
pub fn decode_entries(text: &str) -> Result<Vec<Value>, SchemaError> {
    let json = extract_json_array(text).ok_or(SchemaError::NoJsonArray)?;
    Ok(serde_json::from_str(json)?)
}

/// Matches entries to batch members by `document_id` and validates every
/// dimension of `group` for each matched entry.
pub fn validate_entries(
    entries: Vec<Value>,
    batch: &[DocumentId],
    group: &DimensionGroup,
) -> DecodedBatch {
    let members: HashSet<DocumentId> = batch.iter().copied().collect();
    let mut decoded = DecodedBatch::default();

    for (entry_index, entry) in entries.iter().enumerate() {
        let Some(raw_id) = entry.get("document_id").and_then(Value::as_str) else {
            warn!("Response entry {} has no document_id, ignored", entry_index);
            decoded
                .anomalies
                .push(Anomaly::MissingIdentifier { entry_index });
            continue;
        };

        let document_id = match raw_id.parse::<DocumentId>() {
            Ok(id) if members.contains(&id) => id,
            _ => {
                warn!("Response references unknown document_id '{}', ignored", raw_id);
                decoded.anomalies.push(Anomaly::UnknownDocument {
                    document_id: raw_id.to_string(),
                });
                continue;
            }
        };

        if decoded.assignments.contains_key(&document_id) {
            warn!("Duplicate response entry for {}, keeping the first", document_id);
            decoded
                .anomalies
                .push(Anomaly::DuplicateEntry { document_id });
            continue;
        }

        let confidence = entry
            .get("confidence")
            .and_then(Value::as_str)
            .map(|c| c.trim().to_lowercase());
        let rationale = entry
            .get("rationale")
            .and_then(Value::as_str)
            .map(|r| r.trim().to_string());

        let fields = group
            .dimensions
            .iter()
            .map(|dimension| {
                let raw = entry.get(&dimension.name).cloned().unwrap_or(Value::Null);
                let classification = match dimension.validate(&raw) {
                    Ok(label) => Classification::Valid {
                        label,
                        confidence: confidence.clone(),
                        rationale: rationale.clone(),
                    },
                    Err(reason) => {
                        debug!(
                            "{}: invalid {} value {} ({})",
                            document_id, dimension.name, raw, reason
                        );
                        Classification::Invalid { raw, reason }
                    }
                };
                (dimension.name.clone(), classification)
            })
            .collect();

        decoded.assignments.insert(document_id, fields);
    }

    for document_id in batch {
        if !decoded.assignments.contains_key(document_id) {
            warn!("No response entry for {}, left unclassified", document_id);
            decoded.anomalies.push(Anomaly::MissingEntry {
                document_id: *document_id,
            });
        }
    }

    decoded
}
