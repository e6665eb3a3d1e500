use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::store::RecordStore;

/// Durable marker that a phase finished for one dataset version.
///
/// A checkpoint with `failed_count > 0` records a partial run: later phases may
/// build on it, but the phase itself is not done and runs again to fill the gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCheckpoint {
    pub phase: String,
    pub dataset_version: String,
    pub document_count: usize,
    pub failed_count: usize,
    pub completed_at: DateTime<Utc>,
}

impl PhaseCheckpoint {
    pub fn is_complete(&self) -> bool {
        self.failed_count == 0
    }
}

type CheckpointRow = (String, String, i64, i64, String);

impl RecordStore {
    pub async fn checkpoint(
        &self,
        phase: &str,
        dataset_version: &str,
    ) -> Result<Option<PhaseCheckpoint>, PipelineError> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT phase, dataset_version, document_count, failed_count, completed_at
            FROM checkpoints WHERE phase = ? AND dataset_version = ?
            "#,
        )
        .bind(phase)
        .bind(dataset_version)
        .fetch_optional(&self.pool)
        .await?;
        row.map(into_checkpoint).transpose()
    }

    /// Most recent checkpoint for a phase regardless of dataset version.
    pub async fn latest_checkpoint(&self, phase: &str) -> Result<Option<PhaseCheckpoint>, PipelineError> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT phase, dataset_version, document_count, failed_count, completed_at
            FROM checkpoints WHERE phase = ?
            ORDER BY completed_at DESC LIMIT 1
            "#,
        )
        .bind(phase)
        .fetch_optional(&self.pool)
        .await?;
        row.map(into_checkpoint).transpose()
    }

    pub async fn mark_complete(
        &self,
        phase: &str,
        dataset_version: &str,
        document_count: usize,
    ) -> Result<PhaseCheckpoint, PipelineError> {
        self.mark_partial(phase, dataset_version, document_count, 0).await
    }

    /// Records a phase run that left `failed_count` documents unprocessed.
    pub async fn mark_partial(
        &self,
        phase: &str,
        dataset_version: &str,
        document_count: usize,
        failed_count: usize,
    ) -> Result<PhaseCheckpoint, PipelineError> {
        let checkpoint = PhaseCheckpoint {
            phase: phase.to_string(),
            dataset_version: dataset_version.to_string(),
            document_count,
            failed_count,
            completed_at: Utc::now(),
        };
        sqlx::query(
            r#"
            INSERT INTO checkpoints (phase, dataset_version, document_count, failed_count, completed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (phase, dataset_version)
            DO UPDATE SET document_count = excluded.document_count,
                          failed_count = excluded.failed_count,
                          completed_at = excluded.completed_at
            "#,
        )
        .bind(phase)
        .bind(dataset_version)
        .bind(document_count as i64)
        .bind(failed_count as i64)
        .bind(checkpoint.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(checkpoint)
    }

    /// Drops every checkpoint of a phase, so the next run cannot skip it.
    pub async fn invalidate(&self, phase: &str) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM checkpoints WHERE phase = ?")
            .bind(phase)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn into_checkpoint(
    (phase, dataset_version, document_count, failed_count, completed_at): CheckpointRow,
) -> Result<PhaseCheckpoint, PipelineError> {
    let completed_at = DateTime::parse_from_rfc3339(&completed_at)
        .map_err(|e| PipelineError::Config(format!("corrupt checkpoint timestamp: {e}")))?
        .with_timezone(&Utc);
    Ok(PhaseCheckpoint {
        phase,
        dataset_version,
        document_count: document_count.max(0) as usize,
        failed_count: failed_count.max(0) as usize,
        completed_at,
    })
}

#[cfg(test)]
mod tests {
    use crate::store::test_support::memory_store;

    #[tokio::test]
    async fn test_checkpoint_is_scoped_to_dataset_version() {
        let store = memory_store().await;
        store.mark_complete("architecture", "v1", 10).await.unwrap();

        let found = store.checkpoint("architecture", "v1").await.unwrap().unwrap();
        assert_eq!(found.document_count, 10);
        assert!(found.is_complete());
        assert!(store.checkpoint("architecture", "v2").await.unwrap().is_none());
        assert!(store.checkpoint("implementation", "v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_checkpoint_and_invalidate() {
        let store = memory_store().await;
        assert!(store.latest_checkpoint("extraction").await.unwrap().is_none());

        store.mark_complete("extraction", "corpus-a", 3).await.unwrap();
        let latest = store.latest_checkpoint("extraction").await.unwrap().unwrap();
        assert_eq!(latest.dataset_version, "corpus-a");

        store.invalidate("extraction").await.unwrap();
        assert!(store.latest_checkpoint("extraction").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_checkpoint_is_replaced_by_complete_one() {
        let store = memory_store().await;
        store.mark_partial("architecture", "v1", 10, 4).await.unwrap();
        let partial = store.checkpoint("architecture", "v1").await.unwrap().unwrap();
        assert_eq!(partial.failed_count, 4);
        assert!(!partial.is_complete());

        store.mark_complete("architecture", "v1", 10).await.unwrap();
        assert!(store.checkpoint("architecture", "v1").await.unwrap().unwrap().is_complete());
    }
}
