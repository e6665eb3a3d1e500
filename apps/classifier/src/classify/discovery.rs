//! Discovery pass: asks the LLM to propose a cluster vocabulary for an open
//! dimension from a sample of documents.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::classify::dimensions::DimensionSpec;
use crate::classify::prompts::DISCOVERY_SYSTEM;
use crate::classify::response::decode_entries;
use crate::errors::PipelineError;
use crate::llm_client::prompts::PromptLibrary;
use crate::llm_client::{LlmClient, StructuredPrompt};
use crate::models::Document;
use crate::store::DiscoveredVocabulary;

const DISCOVERY_TEMPLATE: &str = "business_discovery";
const DISCOVERY_MAX_TOKENS: u32 = 4096;

/// Proposes a vocabulary for `spec` from `sample`.
///
/// An empty or undecodable answer is re-prompted up to `schema_retries` times.
/// Without a vocabulary the dimension cannot be classified, so exhausting the
/// budget is an error.
pub async fn discover_vocabulary(
    llm: &LlmClient,
    prompts: &PromptLibrary,
    spec: &DimensionSpec,
    sample: &[Document],
    dataset_version: &str,
    schema_retries: u32,
) -> Result<DiscoveredVocabulary, PipelineError> {
    let payloads: Vec<_> = sample.iter().map(Document::payload).collect();
    let documents_json = serde_json::to_string_pretty(&payloads)?;
    let sample_size = sample.len().to_string();
    let request = StructuredPrompt {
        system: DISCOVERY_SYSTEM.to_string(),
        prompt: prompts.render(
            DISCOVERY_TEMPLATE,
            &[
                ("sample_size", sample_size.as_str()),
                ("documents_json", documents_json.as_str()),
            ],
        )?,
        max_tokens: DISCOVERY_MAX_TOKENS,
    };

    info!(
        "Discovering {} vocabulary from {} sample documents",
        spec.name,
        sample.len()
    );

    let mut last_reason = String::new();
    for attempt in 0..=schema_retries {
        let response = match llm.submit(&request).await {
            Ok(response) => response,
            Err(error) if error.is_fatal() => return Err(error.into()),
            Err(error) => {
                return Err(PipelineError::Discovery {
                    dimension: spec.name.clone(),
                    reason: error.to_string(),
                })
            }
        };

        let reason = match decode_entries(&response.text) {
            Ok(entries) => {
                let labels = parse_labels(&entries);
                if !labels.is_empty() {
                    info!("Discovered {} {} labels", labels.len(), spec.name);
                    return Ok(DiscoveredVocabulary {
                        dimension: spec.name.clone(),
                        dataset_version: dataset_version.to_string(),
                        sample_size: sample.len(),
                        labels,
                        discovered_at: Utc::now(),
                    });
                }
                "no labels proposed".to_string()
            }
            Err(error) => error.to_string(),
        };

        warn!(
            "Discovery attempt {} for {} produced no vocabulary ({}), re-prompting",
            attempt + 1,
            spec.name,
            reason
        );
        last_reason = reason;
    }

    Err(PipelineError::Discovery {
        dimension: spec.name.clone(),
        reason: last_reason,
    })
}

/// Labels from a discovery answer. Accepts plain strings or objects carrying a
/// `name`/`label`/`cluster` field; trims and drops case-insensitive duplicates.
fn parse_labels(entries: &[Value]) -> Vec<String> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => ["name", "label", "cluster"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str)),
            _ => None,
        })
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .filter(|label| seen.insert(label.to_lowercase()))
        .map(str::to_string)
        .collect()
}
