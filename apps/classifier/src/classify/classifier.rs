//! Dimension Classifier: batches documents, dispatches them through the LLM
//! client with bounded concurrency, and merges validated results into the store.

use std::collections::BTreeSet;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{info, warn};

use crate::classify::dimensions::DimensionGroup;
use crate::classify::prompts::CLASSIFY_SYSTEM;
use crate::classify::response::{decode_entries, validate_entries, DecodedBatch};
use crate::errors::PipelineError;
use crate::llm_client::prompts::{PromptLibrary, IDENTIFIER_INSTRUCTION};
use crate::llm_client::{LlmClient, LlmError, StructuredPrompt};
use crate::models::{Document, DocumentId};
use crate::store::{MergeMode, RecordStore};

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// Maximum batches in flight at once.
    pub concurrency: usize,
    /// Re-prompts of one batch after an undecodable response.
    pub schema_retries: u32,
    /// Overrides the group's own batch size when set.
    pub batch_size: Option<usize>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            schema_retries: 2,
            batch_size: None,
        }
    }
}

/// One batch ready for dispatch.
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub members: Vec<DocumentId>,
    pub prompt: StructuredPrompt,
}

#[derive(Debug)]
enum BatchOutcome {
    Decoded(DecodedBatch),
    /// Retries or re-prompts exhausted. Every member is left unclassified.
    Failed(String),
    /// Non-transient LLM error: the run must halt.
    Fatal(LlmError),
}

/// What one classification pass did.
#[derive(Debug, Default, Clone)]
pub struct ClassifyOutcome {
    pub batches: usize,
    pub fields_written: usize,
    pub anomalies: usize,
    /// Documents that came back with no classification at all.
    pub failed: BTreeSet<DocumentId>,
}

pub struct DimensionClassifier<'a> {
    llm: &'a LlmClient,
    store: &'a RecordStore,
    prompts: &'a PromptLibrary,
    settings: ClassifierSettings,
}

impl<'a> DimensionClassifier<'a> {
    pub fn new(
        llm: &'a LlmClient,
        store: &'a RecordStore,
        prompts: &'a PromptLibrary,
        settings: ClassifierSettings,
    ) -> Self {
        Self {
            llm,
            store,
            prompts,
            settings,
        }
    }

    /// Splits `documents` into prompts for `group`. Every dimension in the group
    /// must have a closed vocabulary by now.
    pub fn build_batches(
        &self,
        group: &DimensionGroup,
        documents: &[Document],
    ) -> Result<Vec<Batch>, PipelineError> {
        if let Some(open) = group.dimensions.iter().find(|d| !d.is_closed()) {
            return Err(PipelineError::Discovery {
                dimension: open.name.clone(),
                reason: "vocabulary has not been discovered".to_string(),
            });
        }

        let size = self.settings.batch_size.unwrap_or(group.batch_size).max(1);
        let dimensions_block = group.schema_block();
        let vocabulary: Vec<&String> = group
            .dimensions
            .iter()
            .flat_map(|d| d.allowed().iter())
            .collect();
        let vocabulary_json = serde_json::to_string_pretty(&vocabulary)?;

        documents
            .chunks(size)
            .enumerate()
            .map(|(index, chunk)| -> Result<Batch, PipelineError> {
                let payloads: Vec<_> = chunk.iter().map(Document::payload).collect();
                let documents_json = serde_json::to_string_pretty(&payloads)?;
                let prompt = self.prompts.render(
                    group.template,
                    &[
                        ("documents_json", documents_json.as_str()),
                        ("dimensions_block", dimensions_block.as_str()),
                        ("vocabulary_json", vocabulary_json.as_str()),
                        ("identifier_instruction", IDENTIFIER_INSTRUCTION),
                    ],
                )?;
                Ok(Batch {
                    index,
                    members: chunk.iter().map(|d| d.document_id).collect(),
                    prompt: StructuredPrompt {
                        system: CLASSIFY_SYSTEM.to_string(),
                        prompt,
                        max_tokens: group.max_tokens,
                    },
                })
            })
            .collect()
    }

    /// Classifies `documents` on every dimension of `group`.
    ///
    /// Batches run with at most `concurrency` in flight and are merged one at a
    /// time as they complete. A fatal LLM error or a failed merge stops further
    /// dispatch; batches already in flight are still merged before the error is
    /// returned.
    pub async fn classify(
        &self,
        group: &DimensionGroup,
        documents: &[Document],
        mode: MergeMode,
    ) -> Result<ClassifyOutcome, PipelineError> {
        let batches = self.build_batches(group, documents)?;
        let mut outcome = ClassifyOutcome {
            batches: batches.len(),
            ..ClassifyOutcome::default()
        };
        if batches.is_empty() {
            return Ok(outcome);
        }

        info!(
            "Classifying {} documents on {} in {} batches",
            documents.len(),
            group.names().join(", "),
            batches.len()
        );

        let mut pending = batches.into_iter();
        let mut in_flight = FuturesUnordered::new();
        for _ in 0..self.settings.concurrency.max(1) {
            if let Some(batch) = pending.next() {
                in_flight.push(self.run_batch(group, batch));
            }
        }

        // First fatal LLM or store error. Stops dispatch; in-flight batches still merge.
        let mut halted: Option<PipelineError> = None;
        while let Some((batch, result)) = in_flight.next().await {
            match result {
                BatchOutcome::Decoded(decoded) => {
                    let written = match self.store.merge(&decoded.assignments, mode).await {
                        Ok(written) => written,
                        Err(error) => {
                            warn!("Batch {} could not be merged: {}", batch.index + 1, error);
                            outcome.failed.extend(batch.members.iter().copied());
                            if halted.is_none() {
                                halted = Some(error);
                            }
                            continue;
                        }
                    };
                    info!(
                        "Batch {} merged: {} documents, {} fields written, {} anomalies",
                        batch.index + 1,
                        decoded.assignments.len(),
                        written,
                        decoded.anomalies.len()
                    );
                    outcome.fields_written += written;
                    outcome.anomalies += decoded.anomalies.len();
                    outcome.failed.extend(decoded.unanswered());
                }
                BatchOutcome::Failed(reason) => {
                    warn!(
                        "Batch {} failed ({}); {} documents left unclassified",
                        batch.index + 1,
                        reason,
                        batch.members.len()
                    );
                    outcome.failed.extend(batch.members.iter().copied());
                }
                BatchOutcome::Fatal(error) => {
                    warn!("Batch {} hit a fatal LLM error: {}", batch.index + 1, error);
                    outcome.failed.extend(batch.members.iter().copied());
                    if halted.is_none() {
                        halted = Some(PipelineError::Llm(error));
                    }
                }
            }

            if halted.is_none() {
                if let Some(next) = pending.next() {
                    in_flight.push(self.run_batch(group, next));
                }
            }
        }

        match halted {
            Some(error) => Err(error),
            None => Ok(outcome),
        }
    }

    async fn run_batch(&self, group: &DimensionGroup, batch: Batch) -> (Batch, BatchOutcome) {
        info!(
            "Dispatching batch {} ({} documents)",
            batch.index + 1,
            batch.members.len()
        );

        let mut last_reason = String::new();
        for attempt in 0..=self.settings.schema_retries {
            let response = match self.llm.submit(&batch.prompt).await {
                Ok(response) => response,
                Err(error) if error.is_fatal() => return (batch, BatchOutcome::Fatal(error)),
                Err(error) => {
                    let reason = error.to_string();
                    return (batch, BatchOutcome::Failed(reason));
                }
            };

            match decode_entries(&response.text) {
                Ok(entries) => {
                    let decoded = validate_entries(entries, &batch.members, group);
                    return (batch, BatchOutcome::Decoded(decoded));
                }
                Err(error) => {
                    warn!(
                        "Batch {} response undecodable on attempt {} ({}), re-prompting",
                        batch.index + 1,
                        attempt + 1,
                        error
                    );
                    last_reason = error.to_string();
                }
            }
        }

        let reason = format!(
            "no decodable response after {} attempts: {}",
            self.settings.schema_retries + 1,
            last_reason
        );
        (batch, BatchOutcome::Failed(reason))
    }
}
