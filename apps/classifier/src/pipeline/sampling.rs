//! Deterministic working-set selection and dataset versioning.

use sha2::{Digest, Sha256};

use crate::models::Document;

/// Picks `size` documents deterministically for `seed`, returned in corpus order.
///
/// Documents are ranked by SHA-256 of the seed and their id, so the same bound
/// and seed always select the same subset, and a larger bound selects a
/// superset of a smaller one.
pub fn sample(documents: &[Document], size: Option<usize>, seed: u64) -> Vec<Document> {
    let Some(size) = size else {
        return documents.to_vec();
    };
    if size >= documents.len() {
        return documents.to_vec();
    }

    let mut ranked: Vec<(Vec<u8>, usize)> = documents
        .iter()
        .enumerate()
        .map(|(position, document)| {
            let mut hasher = Sha256::new();
            hasher.update(seed.to_le_bytes());
            hasher.update(document.document_id.to_string().as_bytes());
            (hasher.finalize().to_vec(), position)
        })
        .collect();
    ranked.sort();

    let mut chosen: Vec<usize> = ranked.into_iter().take(size).map(|(_, p)| p).collect();
    chosen.sort_unstable();
    chosen.into_iter().map(|p| documents[p].clone()).collect()
}

/// Content hash of the working set. Changes whenever a document is added,
/// removed, reordered or edited.
pub fn dataset_version(documents: &[Document]) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    for document in documents {
        hasher.update(serde_json::to_vec(document)?);
        hasher.update([0u8]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
