use serde::Serialize;
use tracing::{info, warn};

use crate::classify::ClassifyOutcome;
use crate::models::{Classification, ClassificationRecord, DocumentId};
use crate::pipeline::phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    /// Ran, but some documents got no result; the next run retries them.
    Partial,
    Skipped,
}

/// End-of-phase diagnostics. `classified + invalid + unclassified == total`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub total: usize,
    /// Every dimension of the phase holds a valid value.
    pub classified: usize,
    /// At least one dimension holds an invalid value, none are missing.
    pub invalid: usize,
    /// At least one dimension has no value at all.
    pub unclassified: usize,
    /// Documents this run tried to classify and got nothing back for.
    pub failed: Vec<DocumentId>,
    pub anomalies: usize,
}

impl PhaseReport {
    pub fn new(phase: Phase, status: PhaseStatus, total: usize) -> Self {
        Self {
            phase,
            status,
            total,
            classified: total,
            invalid: 0,
            unclassified: 0,
            failed: Vec::new(),
            anomalies: 0,
        }
    }

    /// Tallies the stored records of the working set over `dimensions`.
    pub fn tally(
        phase: Phase,
        status: PhaseStatus,
        dimensions: &[&str],
        records: &[ClassificationRecord],
    ) -> Self {
        let mut report = Self::new(phase, status, records.len());
        report.classified = 0;
        for record in records {
            let values: Vec<Option<&Classification>> =
                dimensions.iter().map(|d| record.get(d)).collect();
            if values.iter().any(Option::is_none) {
                report.unclassified += 1;
            } else if values.iter().flatten().all(|c| c.is_valid()) {
                report.classified += 1;
            } else {
                report.invalid += 1;
            }
        }
        report
    }

    /// Attaches the classifier outcome; any failed document makes the phase partial.
    pub fn with_outcome(mut self, outcome: &ClassifyOutcome) -> Self {
        self.failed = outcome.failed.iter().copied().collect();
        self.anomalies = outcome.anomalies;
        if !self.failed.is_empty() && self.status == PhaseStatus::Completed {
            self.status = PhaseStatus::Partial;
        }
        self
    }

    pub fn log(&self) {
        info!(
            "Phase {} {}: total={}, classified={}, invalid={}, unclassified={}, failed={}, anomalies={}",
            self.phase,
            match self.status {
                PhaseStatus::Completed => "completed",
                PhaseStatus::Partial => "partially completed",
                PhaseStatus::Skipped => "skipped",
            },
            self.total,
            self.classified,
            self.invalid,
            self.unclassified,
            self.failed.len(),
            self.anomalies
        );
        if !self.failed.is_empty() {
            let ids: Vec<String> = self.failed.iter().map(ToString::to_string).collect();
            warn!("Phase {} failed to process: {}", self.phase, ids.join(", "));
        }
    }
}

/// Reports of every phase the run reached, in order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dataset_version: String,
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|r| r.phase == phase)
    }

    pub fn failed_documents(&self) -> usize {
        self.phases.iter().map(|r| r.failed.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;
    use serde_json::json;

    #[test]
    fn test_tally_partitions_documents() {
        let valid = Classification::Valid {
            label: Label::Single("Low".to_string()),
            confidence: None,
            rationale: None,
        };
        let invalid = Classification::Invalid {
            raw: json!("Huge"),
            reason: "not allowed".to_string(),
        };
        let mut records: Vec<ClassificationRecord> = (0..4)
            .map(|i| ClassificationRecord::new(DocumentId::derive("acme", &format!("P{i}"), 0)))
            .collect();
        for r in &mut records[..3] {
            r.dimensions.insert("a".to_string(), valid.clone());
        }
        records[0].dimensions.insert("b".to_string(), valid.clone());
        records[1].dimensions.insert("b".to_string(), invalid);

        let report = PhaseReport::tally(
            Phase::ImplementationClassification,
            PhaseStatus::Completed,
            &["a", "b"],
            &records,
        );
        assert_eq!(report.total, 4);
        assert_eq!(report.classified, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.unclassified, 2);
    }
}
