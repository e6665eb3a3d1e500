use std::path::PathBuf;

use crate::store::RecordStore;

/// Shared state for the read-only HTTP surface, injected via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: RecordStore,
    /// Directory the pipeline writes its artifacts to.
    pub output_dir: PathBuf,
}
