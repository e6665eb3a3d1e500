//! Corpus extraction: reads `<root>/<company>/proposals/proposals.json` for every
//! company directory and flattens each proposal into a `Document`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::models::{Document, DocumentId};

const COLLECTION_FILE: [&str; 2] = ["proposals", "proposals.json"];

/// Maximum characters kept per free-text field.
#[derive(Debug, Clone)]
pub struct TextLimits {
    pub current_state: usize,
    pub problem: usize,
    pub impact: usize,
    pub existing_tooling: usize,
    pub functionality: usize,
    pub problem_solving: usize,
    pub risk_assessment: usize,
}

impl Default for TextLimits {
    fn default() -> Self {
        Self {
            current_state: 2000,
            problem: 1500,
            impact: 1500,
            existing_tooling: 1000,
            functionality: 2000,
            problem_solving: 1000,
            risk_assessment: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProposalCollection {
    #[serde(default)]
    proposals: Vec<RawProposal>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProposal {
    #[serde(rename = "Proposal Name", default)]
    name: String,
    #[serde(rename = "Current State Understanding", default)]
    current_state: String,
    #[serde(rename = "Problems Identified", default)]
    problems: String,
    #[serde(rename = "Impact Analysis", default)]
    impact: String,
    #[serde(rename = "Target Persona", default)]
    target_persona: String,
    #[serde(rename = "Existing Tooling", default)]
    existing_tooling: String,
    #[serde(rename = "Proposed System", default)]
    proposed_system: Option<serde_json::Value>,
}

/// Collection files under `root`, one per company, sorted by company name.
pub fn collection_files(root: &Path) -> Result<Vec<(String, PathBuf)>, PipelineError> {
    let entries = std::fs::read_dir(root).map_err(|e| PipelineError::Corpus {
        path: root.display().to_string(),
        reason: format!("corpus root is unreachable: {e}"),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = COLLECTION_FILE
            .iter()
            .fold(entry.path(), |path, part| path.join(part));
        if path.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), path));
        }
    }
    files.sort();
    Ok(files)
}

/// Extracts every proposal in the corpus. A company whose file cannot be read or
/// parsed is logged and skipped; an unreachable root is an error.
pub fn extract_documents(root: &Path, limits: &TextLimits) -> Result<Vec<Document>, PipelineError> {
    let files = collection_files(root)?;
    info!("Found {} companies with proposals", files.len());

    let mut documents = Vec::new();
    for (company, path) in files {
        let collection = match read_collection(&path) {
            Ok(collection) => collection,
            Err(reason) => {
                warn!("Error processing {}: {}", company, reason);
                continue;
            }
        };

        let mut seen: HashMap<String, usize> = HashMap::new();
        for proposal in collection.proposals {
            let ordinal = seen.entry(proposal.name.trim().to_string()).or_insert(0);
            let document_id = DocumentId::derive(&company, &proposal.name, *ordinal);
            *ordinal += 1;
            documents.push(to_document(&company, document_id, proposal, limits));
        }
    }

    info!("Extracted {} total proposals", documents.len());
    Ok(documents)
}

fn read_collection(path: &Path) -> Result<ProposalCollection, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

fn to_document(
    company: &str,
    document_id: DocumentId,
    proposal: RawProposal,
    limits: &TextLimits,
) -> Document {
    let system_field = |key: &str| -> String {
        proposal
            .proposed_system
            .as_ref()
            .and_then(|system| system.get(key))
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string()
    };

    Document {
        document_id,
        company: company.to_string(),
        title: proposal.name.trim().to_string(),
        target_persona: proposal.target_persona.clone(),
        current_state: truncate_chars(&proposal.current_state, limits.current_state),
        problem: truncate_chars(&proposal.problems, limits.problem),
        impact: truncate_chars(&proposal.impact, limits.impact),
        existing_tooling: truncate_chars(&proposal.existing_tooling, limits.existing_tooling),
        functionality_description: truncate_chars(&system_field("Functionality"), limits.functionality),
        problem_solving: truncate_chars(&system_field("Problem Solving"), limits.problem_solving),
        risk_assessment: truncate_chars(&system_field("Risk Assessment"), limits.risk_assessment),
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
