use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::store::RecordStore;

/// The cluster vocabulary a discovery pass produced for an open dimension.
/// Persisted on its own so a later run can classify against it without
/// re-discovering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredVocabulary {
    pub dimension: String,
    pub dataset_version: String,
    pub sample_size: usize,
    pub labels: Vec<String>,
    pub discovered_at: DateTime<Utc>,
}

impl RecordStore {
    pub async fn save_vocabulary(&self, vocabulary: &DiscoveredVocabulary) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO vocabularies (dimension, dataset_version, sample_size, labels, discovered_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (dimension) DO UPDATE SET
                dataset_version = excluded.dataset_version,
                sample_size = excluded.sample_size,
                labels = excluded.labels,
                discovered_at = excluded.discovered_at
            "#,
        )
        .bind(&vocabulary.dimension)
        .bind(&vocabulary.dataset_version)
        .bind(vocabulary.sample_size as i64)
        .bind(serde_json::to_string(&vocabulary.labels)?)
        .bind(vocabulary.discovered_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn vocabulary(&self, dimension: &str) -> Result<Option<DiscoveredVocabulary>, PipelineError> {
        let row: Option<(String, String, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT dimension, dataset_version, sample_size, labels, discovered_at
            FROM vocabularies WHERE dimension = ?
            "#,
        )
        .bind(dimension)
        .fetch_optional(&self.pool)
        .await?;

        let Some((dimension, dataset_version, sample_size, labels, discovered_at)) = row else {
            return Ok(None);
        };
        let discovered_at = DateTime::parse_from_rfc3339(&discovered_at)
            .map_err(|e| PipelineError::Config(format!("corrupt vocabulary timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(DiscoveredVocabulary {
            dimension,
            dataset_version,
            sample_size: sample_size.max(0) as usize,
            labels: serde_json::from_str(&labels)?,
            discovered_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::memory_store;

    #[tokio::test]
    async fn test_vocabulary_roundtrip_and_replace() {
        let store = memory_store().await;
        assert!(store.vocabulary("business_use_case").await.unwrap().is_none());

        let mut vocab = DiscoveredVocabulary {
            dimension: "business_use_case".to_string(),
            dataset_version: "v1".to_string(),
            sample_size: 50,
            labels: vec!["Claims Processing".to_string(), "Contract Review".to_string()],
            discovered_at: Utc::now(),
        };
        store.save_vocabulary(&vocab).await.unwrap();
        let loaded = store.vocabulary("business_use_case").await.unwrap().unwrap();
        assert_eq!(loaded.labels, vocab.labels);
        assert_eq!(loaded.sample_size, 50);

        vocab.labels.push("Fraud Detection".to_string());
        vocab.dataset_version = "v2".to_string();
        store.save_vocabulary(&vocab).await.unwrap();
        let loaded = store.vocabulary("business_use_case").await.unwrap().unwrap();
        assert_eq!(loaded.labels.len(), 3);
        assert_eq!(loaded.dataset_version, "v2");
    }
}
