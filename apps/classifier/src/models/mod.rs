pub mod document;
pub mod record;

pub use document::{Document, DocumentId};
pub use record::{Classification, ClassificationRecord, Label, INVALID_MARKER, NOT_CLASSIFIED_MARKER};
