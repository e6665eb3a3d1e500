pub mod health;
pub mod records;

use axum::{routing::get, Router};
use tower_http::services::ServeDir;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let files = ServeDir::new(&state.output_dir);
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/summary", get(records::handle_summary))
        .route("/api/v1/records", get(records::handle_list_records))
        .route("/api/v1/records/:document_id", get(records::handle_get_record))
        .nest_service("/files", files)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::store::test_support::memory_store;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_router_serves_api_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("raw_proposals.csv"), "document_id\n").unwrap();
        let app = build_router(AppState {
            store: memory_store().await,
            output_dir: dir.path().to_path_buf(),
        });

        let health = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let records = app.clone().oneshot(get("/api/v1/records")).await.unwrap();
        assert_eq!(records.status(), StatusCode::OK);

        let file = app.clone().oneshot(get("/files/raw_proposals.csv")).await.unwrap();
        assert_eq!(file.status(), StatusCode::OK);

        let summary = app.clone().oneshot(get("/api/v1/summary")).await.unwrap();
        assert_eq!(summary.status(), StatusCode::NOT_FOUND);

        let bad = app.oneshot(get("/api/v1/records/not-a-uuid")).await.unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }
}
