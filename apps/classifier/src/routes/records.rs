use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::errors::PipelineError;
use crate::models::DocumentId;
use crate::output::{load_json, AnnotatedDocument};
use crate::pipeline::orchestrator::ANALYSIS_SUMMARY_ARTIFACT;
use crate::state::AppState;

/// GET /api/v1/summary
/// The analysis summary written by the last completed run.
pub async fn handle_summary(State(state): State<AppState>) -> Result<Json<Value>, PipelineError> {
    let path = state.output_dir.join(ANALYSIS_SUMMARY_ARTIFACT);
    if !path.is_file() {
        return Err(PipelineError::NotFound(
            "no analysis summary yet; run the pipeline first".to_string(),
        ));
    }
    Ok(Json(load_json(&path)?))
}

/// GET /api/v1/records
pub async fn handle_list_records(
    State(state): State<AppState>,
) -> Result<Json<Vec<AnnotatedDocument>>, PipelineError> {
    let documents = state.store.documents().await?;
    let ids: Vec<DocumentId> = documents.iter().map(|d| d.document_id).collect();
    let records = state.store.records(&ids).await?;
    Ok(Json(AnnotatedDocument::join(&documents, &records)))
}

/// GET /api/v1/records/:document_id
pub async fn handle_get_record(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<AnnotatedDocument>, PipelineError> {
    let id: DocumentId = document_id
        .parse()
        .map_err(|_| PipelineError::BadRequest(format!("'{document_id}' is not a document id")))?;

    let documents = state.store.documents().await?;
    let document = documents
        .into_iter()
        .find(|d| d.document_id == id)
        .ok_or_else(|| PipelineError::NotFound(format!("document {id}")))?;
    let records: Vec<_> = state.store.get(&id).await?.into_iter().collect();

    let mut joined = AnnotatedDocument::join(std::slice::from_ref(&document), &records);
    joined
        .pop()
        .map(Json)
        .ok_or_else(|| PipelineError::NotFound(format!("document {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, Label};
    use crate::store::test_support::{document, memory_store};

    async fn state(dir: &std::path::Path) -> AppState {
        let store = memory_store().await;
        store
            .replace_documents(&[document("acme", "Triage"), document("globex", "Review")])
            .await
            .unwrap();
        AppState {
            store,
            output_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_records_join_documents_with_classifications() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path()).await;
        let id = document("acme", "Triage").document_id;
        let value = Classification::Valid {
            label: Label::Single("Low".to_string()),
            confidence: None,
            rationale: None,
        };
        state.store.upsert_field(&id, "chain_depth", &value).await.unwrap();

        let Json(all) = handle_list_records(State(state.clone())).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].classifications.get("chain_depth"), Some(&value));
        assert!(all[1].classifications.is_empty());

        let Json(one) = handle_get_record(State(state), Path(id.to_string())).await.unwrap();
        assert_eq!(one.document.title, "Triage");
    }

    #[tokio::test]
    async fn test_unknown_or_malformed_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path()).await;

        let missing = DocumentId::derive("initech", "Nothing", 0).to_string();
        assert!(matches!(
            handle_get_record(State(state.clone()), Path(missing)).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            handle_get_record(State(state), Path("not-a-uuid".to_string())).await,
            Err(PipelineError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_summary_missing_until_written() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path()).await;
        assert!(matches!(
            handle_summary(State(state.clone())).await,
            Err(PipelineError::NotFound(_))
        ));

        std::fs::write(dir.path().join(ANALYSIS_SUMMARY_ARTIFACT), r#"{"total_documents": 2}"#).unwrap();
        let Json(summary) = handle_summary(State(state)).await.unwrap();
        assert_eq!(summary["total_documents"], 2);
    }
}
