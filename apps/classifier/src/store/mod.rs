//! Record Store: the single source of truth for documents and their
//! accumulating classifications. Every component receives a `RecordStore`
//! explicitly; nothing caches classifications across phase boundaries.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::PipelineError;
use crate::models::{Classification, ClassificationRecord, Document, DocumentId};

pub mod checkpoints;
pub mod vocabulary;

pub use checkpoints::PhaseCheckpoint;
pub use vocabulary::DiscoveredVocabulary;

/// How a merge treats a dimension that is already populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Keep the existing value; only fill gaps.
    FillMissing,
    /// Replace the existing value.
    Overwrite,
}

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, PipelineError> {
        Ok(Self::new(crate::db::create_pool(database_url).await?))
    }

    // ── Documents ──────────────────────────────────────────────────────────

    /// Replaces the extracted document set. Classifications of documents that are
    /// no longer in the corpus are dropped with them.
    pub async fn replace_documents(&self, documents: &[Document]) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;
        for (position, document) in documents.iter().enumerate() {
            sqlx::query("INSERT INTO documents (document_id, position, payload) VALUES (?, ?, ?)")
                .bind(document.document_id.to_string())
                .bind(position as i64)
                .bind(serde_json::to_string(document)?)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "DELETE FROM classifications WHERE document_id NOT IN (SELECT document_id FROM documents)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("Stored {} documents", documents.len());
        Ok(())
    }

    /// All documents in corpus order.
    pub async fn documents(&self) -> Result<Vec<Document>, PipelineError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT payload FROM documents ORDER BY position ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(payload,)| Ok(serde_json::from_str(&payload)?))
            .collect()
    }

    // ── Classifications ────────────────────────────────────────────────────

    /// The record for one document, or `None` if the document is unknown.
    pub async fn get(&self, document_id: &DocumentId) -> Result<Option<ClassificationRecord>, PipelineError> {
        let known: Option<(String,)> =
            sqlx::query_as("SELECT document_id FROM documents WHERE document_id = ?")
                .bind(document_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        if known.is_none() {
            return Ok(None);
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT dimension, payload FROM classifications WHERE document_id = ? ORDER BY dimension",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut record = ClassificationRecord::new(*document_id);
        for (dimension, payload) in rows {
            record
                .dimensions
                .insert(dimension, serde_json::from_str(&payload)?);
        }
        Ok(Some(record))
    }

    /// Records for the given documents, in the given order. Documents with no
    /// classifications yet get an empty record.
    pub async fn records(&self, documents: &[DocumentId]) -> Result<Vec<ClassificationRecord>, PipelineError> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT document_id, dimension, payload FROM classifications")
                .fetch_all(&self.pool)
                .await?;

        let mut by_document: BTreeMap<DocumentId, ClassificationRecord> = documents
            .iter()
            .map(|id| (*id, ClassificationRecord::new(*id)))
            .collect();
        for (document_id, dimension, payload) in rows {
            let Ok(id) = document_id.parse::<DocumentId>() else {
                continue;
            };
            if let Some(record) = by_document.get_mut(&id) {
                record
                    .dimensions
                    .insert(dimension, serde_json::from_str(&payload)?);
            }
        }

        Ok(documents
            .iter()
            .filter_map(|id| by_document.remove(id))
            .collect())
    }

    /// Writes one dimension of one document, replacing any previous value.
    pub async fn upsert_field(
        &self,
        document_id: &DocumentId,
        dimension: &str,
        classification: &Classification,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO classifications (document_id, dimension, payload, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (document_id, dimension)
            DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
            "#,
        )
        .bind(document_id.to_string())
        .bind(dimension)
        .bind(serde_json::to_string(classification)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applies one batch's results atomically. Returns the number of fields written.
    pub async fn merge(
        &self,
        assignments: &BTreeMap<DocumentId, BTreeMap<String, Classification>>,
        mode: MergeMode,
    ) -> Result<usize, PipelineError> {
        let statement = match mode {
            MergeMode::FillMissing => {
                r#"
                INSERT INTO classifications (document_id, dimension, payload, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (document_id, dimension) DO NOTHING
                "#
            }
            MergeMode::Overwrite => {
                r#"
                INSERT INTO classifications (document_id, dimension, payload, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (document_id, dimension)
                DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
                "#
            }
        };

        let now = Utc::now().to_rfc3339();
        let mut written = 0;
        let mut tx = self.pool.begin().await?;
        for (document_id, fields) in assignments {
            for (dimension, classification) in fields {
                let result = sqlx::query(statement)
                    .bind(document_id.to_string())
                    .bind(dimension)
                    .bind(serde_json::to_string(classification)?)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await?;
                written += result.rows_affected() as usize;
            }
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Documents among `among` that have no value for `dimension`, in the given order.
    pub async fn enumerate_unclassified(
        &self,
        dimension: &str,
        among: &[DocumentId],
    ) -> Result<Vec<DocumentId>, PipelineError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT document_id FROM classifications WHERE dimension = ?")
                .bind(dimension)
                .fetch_all(&self.pool)
                .await?;
        let classified: HashSet<String> = rows.into_iter().map(|(id,)| id).collect();

        Ok(among
            .iter()
            .filter(|id| !classified.contains(&id.to_string()))
            .copied()
            .collect())
    }

    /// Removes the given dimensions for the given documents, ahead of a forced re-run.
    pub async fn clear_dimensions(
        &self,
        dimensions: &[&str],
        among: &[DocumentId],
    ) -> Result<u64, PipelineError> {
        let mut removed = 0;
        let mut tx = self.pool.begin().await?;
        for document_id in among {
            for dimension in dimensions {
                removed += sqlx::query(
                    "DELETE FROM classifications WHERE document_id = ? AND dimension = ?",
                )
                .bind(document_id.to_string())
                .bind(*dimension)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            }
        }
        tx.commit().await?;
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub async fn memory_store() -> RecordStore {
        RecordStore::connect("sqlite::memory:").await.unwrap()
    }

    pub fn document(company: &str, title: &str) -> Document {
        Document {
            document_id: DocumentId::derive(company, title, 0),
            company: company.to_string(),
            title: title.to_string(),
            target_persona: "Operations lead".to_string(),
            current_state: format!("{title}: manual process today"),
            problem: "Slow and error-prone".to_string(),
            impact: "Hours lost every week".to_string(),
            existing_tooling: "Spreadsheets".to_string(),
            functionality_description: format!("An assistant that automates {title}"),
            problem_solving: String::new(),
            risk_assessment: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{document, memory_store};
    use super::*;
    use crate::models::Label;

    fn valid(value: &str) -> Classification {
        Classification::Valid {
            label: Label::Single(value.to_string()),
            confidence: None,
            rationale: None,
        }
    }

    fn batch(ids: &[DocumentId], dimension: &str, value: &str) -> BTreeMap<DocumentId, BTreeMap<String, Classification>> {
        ids.iter()
            .map(|id| (*id, BTreeMap::from([(dimension.to_string(), valid(value))])))
            .collect()
    }

    #[tokio::test]
    async fn test_documents_roundtrip_in_corpus_order() {
        let store = memory_store().await;
        let docs = vec![document("zeta", "Z"), document("alpha", "A")];
        store.replace_documents(&docs).await.unwrap();
        assert_eq!(store.documents().await.unwrap(), docs);
    }

    #[tokio::test]
    async fn test_get_unknown_document_is_none() {
        let store = memory_store().await;
        let id = DocumentId::derive("nobody", "nothing", 0);
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_field_replaces_value() {
        let store = memory_store().await;
        let doc = document("acme", "Triage");
        store.replace_documents(&[doc.clone()]).await.unwrap();

        store.upsert_field(&doc.document_id, "chain_depth", &valid("2-3 Steps")).await.unwrap();
        store.upsert_field(&doc.document_id, "chain_depth", &valid("4+ Steps")).await.unwrap();

        let record = store.get(&doc.document_id).await.unwrap().unwrap();
        assert_eq!(record.dimensions.len(), 1);
        assert_eq!(record.get("chain_depth"), Some(&valid("4+ Steps")));
    }

    #[tokio::test]
    async fn test_fill_missing_never_overwrites() {
        let store = memory_store().await;
        let doc = document("acme", "Triage");
        store.replace_documents(&[doc.clone()]).await.unwrap();
        let ids = [doc.document_id];

        store.merge(&batch(&ids, "d", "first"), MergeMode::FillMissing).await.unwrap();
        let written = store.merge(&batch(&ids, "d", "second"), MergeMode::FillMissing).await.unwrap();

        assert_eq!(written, 0);
        let record = store.get(&doc.document_id).await.unwrap().unwrap();
        assert_eq!(record.get("d"), Some(&valid("first")));
    }

    #[tokio::test]
    async fn test_merge_of_disjoint_batches_is_order_independent() {
        let docs: Vec<Document> = (0..4).map(|i| document("acme", &format!("P{i}"))).collect();
        let ids: Vec<DocumentId> = docs.iter().map(|d| d.document_id).collect();
        let b1 = batch(&ids[..2], "d", "one");
        let b2 = batch(&ids[2..], "d", "two");

        let forward = memory_store().await;
        forward.replace_documents(&docs).await.unwrap();
        forward.merge(&b1, MergeMode::FillMissing).await.unwrap();
        forward.merge(&b2, MergeMode::FillMissing).await.unwrap();

        let backward = memory_store().await;
        backward.replace_documents(&docs).await.unwrap();
        backward.merge(&b2, MergeMode::FillMissing).await.unwrap();
        backward.merge(&b1, MergeMode::FillMissing).await.unwrap();

        assert_eq!(
            forward.records(&ids).await.unwrap(),
            backward.records(&ids).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_enumerate_unclassified_and_clear() {
        let store = memory_store().await;
        let docs: Vec<Document> = (0..3).map(|i| document("acme", &format!("P{i}"))).collect();
        let ids: Vec<DocumentId> = docs.iter().map(|d| d.document_id).collect();
        store.replace_documents(&docs).await.unwrap();
        store.merge(&batch(&ids[..1], "d", "x"), MergeMode::Overwrite).await.unwrap();

        assert_eq!(store.enumerate_unclassified("d", &ids).await.unwrap(), ids[1..].to_vec());

        let removed = store.clear_dimensions(&["d"], &ids).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.enumerate_unclassified("d", &ids).await.unwrap(), ids);
    }

    #[tokio::test]
    async fn test_replace_documents_drops_orphaned_classifications() {
        let store = memory_store().await;
        let keep = document("acme", "Keep");
        let drop = document("acme", "Drop");
        store.replace_documents(&[keep.clone(), drop.clone()]).await.unwrap();
        store
            .merge(&batch(&[keep.document_id, drop.document_id], "d", "x"), MergeMode::Overwrite)
            .await
            .unwrap();

        store.replace_documents(&[keep.clone()]).await.unwrap();
        assert!(store.get(&drop.document_id).await.unwrap().is_none());
        assert_eq!(
            store.enumerate_unclassified("d", &[drop.document_id]).await.unwrap(),
            vec![drop.document_id]
        );
    }
}
