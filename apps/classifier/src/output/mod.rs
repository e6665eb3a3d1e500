//! Persisted artifacts. Every write goes to a temp file in the output directory
//! and is renamed into place, so a reader never sees a half-written file.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use crate::errors::PipelineError;
use crate::models::{Classification, ClassificationRecord, Document, NOT_CLASSIFIED_MARKER};
use crate::summary::ClusterRow;

/// Nested record form: the document plus every classification made so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedDocument {
    #[serde(flatten)]
    pub document: Document,
    pub classifications: BTreeMap<String, Classification>,
}

impl AnnotatedDocument {
    /// Joins documents with their records by id, in document order.
    pub fn join(documents: &[Document], records: &[ClassificationRecord]) -> Vec<Self> {
        let mut by_id: BTreeMap<_, _> = records
            .iter()
            .map(|r| (r.document_id, r.dimensions.clone()))
            .collect();
        documents
            .iter()
            .map(|document| Self {
                classifications: by_id.remove(&document.document_id).unwrap_or_default(),
                document: document.clone(),
            })
            .collect()
    }
}

const DOCUMENT_COLUMNS: &[&str] = &[
    "document_id",
    "company",
    "title",
    "target_persona",
    "current_state",
    "problem",
    "impact",
    "existing_tooling",
    "functionality_description",
    "problem_solving",
    "risk_assessment",
];

fn document_row(document: &Document) -> Vec<String> {
    vec![
        document.document_id.to_string(),
        document.company.clone(),
        document.title.clone(),
        document.target_persona.clone(),
        document.current_state.clone(),
        document.problem.clone(),
        document.impact.clone(),
        document.existing_tooling.clone(),
        document.functionality_description.clone(),
        document.problem_solving.clone(),
        document.risk_assessment.clone(),
    ]
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn write_atomic<F>(&self, name: &str, write: F) -> Result<PathBuf, PipelineError>
    where
        F: FnOnce(&mut File) -> Result<(), PipelineError>,
    {
        let path = self.path(name);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        write(tmp.as_file_mut())?;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        info!("Saved {}", path.display());
        Ok(path)
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf, PipelineError> {
        self.write_atomic(name, |file| {
            serde_json::to_writer_pretty(&mut *file, value)?;
            file.write_all(b"\n")?;
            Ok(())
        })
    }

    /// Writes `<stem>.json` (nested) and `<stem>.csv` (one row per document with
    /// every document field, then one column per dimension in `dimensions`).
    pub fn write_records(
        &self,
        stem: &str,
        records: &[AnnotatedDocument],
        dimensions: &[&str],
    ) -> Result<(), PipelineError> {
        self.write_json(&format!("{stem}.json"), records)?;
        self.write_atomic(&format!("{stem}.csv"), |file| {
            let mut writer = csv::Writer::from_writer(file);
            let header: Vec<&str> = DOCUMENT_COLUMNS
                .iter()
                .chain(dimensions.iter())
                .copied()
                .collect();
            writer.write_record(&header)?;

            for record in records {
                let mut row = document_row(&record.document);
                row.extend(dimensions.iter().map(|dimension| {
                    record
                        .classifications
                        .get(*dimension)
                        .map(Classification::display)
                        .unwrap_or_else(|| NOT_CLASSIFIED_MARKER.to_string())
                }));
                writer.write_record(&row)?;
            }
            writer.flush()?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn write_cluster_summary(&self, stem: &str, rows: &[ClusterRow]) -> Result<(), PipelineError> {
        self.write_json(&format!("{stem}.json"), rows)?;
        self.write_atomic(&format!("{stem}.csv"), |file| {
            let mut writer = csv::Writer::from_writer(file);
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
            Ok(())
        })?;
        Ok(())
    }
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Re-loads a nested record artifact.
pub fn load_records(path: &Path) -> Result<Vec<AnnotatedDocument>, PipelineError> {
    load_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;
    use crate::store::test_support::document;
    use serde_json::json;

    fn annotated() -> Vec<AnnotatedDocument> {
        let docs = vec![document("acme", "Triage"), document("globex", "Review, with comma")];
        let mut first = ClassificationRecord::new(docs[0].document_id);
        first.dimensions.insert(
            "input_modalities".to_string(),
            Classification::Valid {
                label: Label::Multi(["Text".to_string(), "Email".to_string()].into()),
                confidence: Some("high".to_string()),
                rationale: Some("Reads support emails.".to_string()),
            },
        );
        first.dimensions.insert(
            "chain_depth".to_string(),
            Classification::Invalid {
                raw: json!({"steps": 7}),
                reason: "expected a single string".to_string(),
            },
        );
        AnnotatedDocument::join(&docs, &[first])
    }

    #[test]
    fn test_json_artifact_roundtrips_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path()).unwrap();
        let records = annotated();

        writer
            .write_records("proposals_complete", &records, &["input_modalities", "chain_depth"])
            .unwrap();
        let path = writer.path("proposals_complete.json");
        let loaded = load_records(&path).unwrap();
        assert_eq!(loaded, records);

        let original = std::fs::read(&path).unwrap();
        writer.write_json("again.json", &loaded).unwrap();
        assert_eq!(std::fs::read(writer.path("again.json")).unwrap(), original);
    }

    #[test]
    fn test_csv_flattens_labels_and_markers() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path()).unwrap();
        writer
            .write_records("flat", &annotated(), &["input_modalities", "chain_depth"])
            .unwrap();

        let mut reader = csv::Reader::from_path(writer.path("flat.csv")).unwrap();
        let headers = reader.headers().unwrap().clone();
        let mut expected: Vec<&str> = DOCUMENT_COLUMNS.to_vec();
        expected.extend(["input_modalities", "chain_depth"]);
        assert_eq!(headers.iter().collect::<Vec<_>>(), expected);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(&rows[0][11], "Email + Text");
        assert_eq!(&rows[0][12], "Invalid");
        assert_eq!(&rows[1][2], "Review, with comma");
        assert_eq!(&rows[1][11], NOT_CLASSIFIED_MARKER);
    }

    #[test]
    fn test_csv_carries_every_document_text_field() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path()).unwrap();
        let mut doc = document("acme", "Triage");
        doc.risk_assessment = "Low, with \"quoted\" caveats\nacross lines".to_string();
        let records = AnnotatedDocument::join(std::slice::from_ref(&doc), &[]);
        writer.write_records("raw_proposals", &records, &[]).unwrap();

        let mut reader = csv::Reader::from_path(writer.path("raw_proposals.csv")).unwrap();
        let headers = reader.headers().unwrap().clone();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);

        let cell = |name: &str| {
            let index = headers.iter().position(|h| h == name).unwrap();
            rows[0][index].to_string()
        };
        assert_eq!(cell("current_state"), doc.current_state);
        assert_eq!(cell("functionality_description"), doc.functionality_description);
        assert_eq!(cell("existing_tooling"), doc.existing_tooling);
        assert_eq!(cell("risk_assessment"), doc.risk_assessment);
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("nested")).unwrap();
        writer.write_json("summary.json", &json!({"total": 0})).unwrap();

        let names: Vec<String> = std::fs::read_dir(writer.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["summary.json".to_string()]);
    }
}
