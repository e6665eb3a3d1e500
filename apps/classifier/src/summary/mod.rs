//! Summary Aggregator: frequency and percentage statistics over the merged
//! records. Everything here is a pure function of its inputs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classify::dimensions::{Arity, DimensionSpec};
use crate::models::{
    Classification, ClassificationRecord, Document, INVALID_MARKER, NOT_CLASSIFIED_MARKER,
};

const TOP_N: usize = 15;
const MAX_LISTED_COMPANIES: usize = 15;
const MAX_EXAMPLES: usize = 3;
const EXAMPLE_TITLE_CHARS: usize = 35;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub value: String,
    pub count: usize,
    /// Share of the total document count, not of the classified count.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSummary {
    pub dimension: String,
    pub total: usize,
    /// Exclusive partition of all documents: valid values (combinations for
    /// multi-valued dimensions), then the invalid and not-classified markers.
    pub buckets: Vec<Bucket>,
    /// Multi-valued dimensions only: documents mentioning each value. A document
    /// counts once per value it carries, so these may sum past 100%.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_mentions: Vec<Bucket>,
}

/// One row of the business cluster summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRow {
    pub cluster: String,
    pub count: usize,
    pub percentage: String,
    pub num_companies: usize,
    pub companies: String,
    pub example_proposals: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_documents: usize,
    pub num_companies: usize,
    pub generated_at: DateTime<Utc>,
    pub dimensions: BTreeMap<String, DimensionSummary>,
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

fn ranked(counts: BTreeMap<String, usize>, total: usize) -> Vec<Bucket> {
    let mut buckets: Vec<Bucket> = counts
        .into_iter()
        .map(|(value, count)| Bucket {
            percentage: percentage(count, total),
            value,
            count,
        })
        .collect();
    // BTreeMap order breaks ties alphabetically; the sort is stable.
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    buckets
}

/// Counts one dimension across `records`. Records are expected to cover every
/// document in the working set; a record without the dimension counts as not
/// classified.
pub fn summarize_dimension(spec: &DimensionSpec, records: &[ClassificationRecord]) -> DimensionSummary {
    let total = records.len();
    let mut values: BTreeMap<String, usize> = BTreeMap::new();
    let mut mentions: BTreeMap<String, usize> = BTreeMap::new();
    let mut invalid = 0;
    let mut not_classified = 0;

    for record in records {
        match record.get(&spec.name) {
            Some(Classification::Valid { label, .. }) => {
                *values.entry(label.display()).or_insert(0) += 1;
                if spec.arity == Arity::Multi {
                    for value in label.values() {
                        *mentions.entry(value.to_string()).or_insert(0) += 1;
                    }
                }
            }
            Some(Classification::Invalid { .. }) => invalid += 1,
            None => not_classified += 1,
        }
    }

    let mut buckets = ranked(values, total);
    for (marker, count) in [(INVALID_MARKER, invalid), (NOT_CLASSIFIED_MARKER, not_classified)] {
        if count > 0 {
            buckets.push(Bucket {
                value: marker.to_string(),
                count,
                percentage: percentage(count, total),
            });
        }
    }

    DimensionSummary {
        dimension: spec.name.clone(),
        total,
        buckets,
        value_mentions: ranked(mentions, total),
    }
}

pub fn summarize_dimensions(
    specs: &[DimensionSpec],
    records: &[ClassificationRecord],
) -> BTreeMap<String, DimensionSummary> {
    specs
        .iter()
        .map(|spec| (spec.name.clone(), summarize_dimension(spec, records)))
        .collect()
}

/// Cluster table for one dimension: count, share, companies and a few examples
/// per value, largest cluster first.
pub fn cluster_summary(
    dimension: &str,
    documents: &[Document],
    records: &[ClassificationRecord],
) -> Vec<ClusterRow> {
    let by_id: HashMap<_, _> = records.iter().map(|r| (r.document_id, r)).collect();
    let mut clusters: BTreeMap<String, Vec<&Document>> = BTreeMap::new();

    for document in documents {
        let cluster = by_id
            .get(&document.document_id)
            .and_then(|record| record.get(dimension))
            .map(Classification::display)
            .unwrap_or_else(|| NOT_CLASSIFIED_MARKER.to_string());
        clusters.entry(cluster).or_default().push(document);
    }

    let mut rows: Vec<ClusterRow> = clusters
        .into_iter()
        .map(|(cluster, members)| {
            let companies: BTreeSet<&str> = members.iter().map(|d| d.company.as_str()).collect();
            ClusterRow {
                count: members.len(),
                percentage: format!("{:.1}%", percentage(members.len(), documents.len())),
                num_companies: companies.len(),
                companies: companies
                    .iter()
                    .take(MAX_LISTED_COMPANIES)
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", "),
                example_proposals: members
                    .iter()
                    .take(MAX_EXAMPLES)
                    .map(|d| {
                        let title: String = d.title.chars().take(EXAMPLE_TITLE_CHARS).collect();
                        format!("{}: {}", d.company, title)
                    })
                    .collect::<Vec<_>>()
                    .join(" | "),
                cluster,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

pub fn analysis_summary(
    specs: &[DimensionSpec],
    documents: &[Document],
    records: &[ClassificationRecord],
) -> AnalysisSummary {
    let companies: BTreeSet<&str> = documents.iter().map(|d| d.company.as_str()).collect();
    AnalysisSummary {
        total_documents: documents.len(),
        num_companies: companies.len(),
        generated_at: Utc::now(),
        dimensions: summarize_dimensions(specs, records),
    }
}

/// Logs the top buckets of a dimension as a small bar chart.
pub fn log_distribution(title: &str, summary: &DimensionSummary) {
    info!("{} ({} documents):", title, summary.total);
    for bucket in summary.buckets.iter().take(TOP_N) {
        let bar = "█".repeat((bucket.percentage / 2.0) as usize);
        info!(
            "  {:40} {:4} ({:5.1}%) {}",
            bucket.value, bucket.count, bucket.percentage, bar
        );
    }
    for bucket in summary.value_mentions.iter().take(TOP_N) {
        info!(
            "  mentions {:31} {:4} ({:5.1}%)",
            bucket.value, bucket.count, bucket.percentage
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::dimensions::{architecture_group, implementation_group};
    use crate::models::{DocumentId, Label};
    use crate::store::test_support::document;
    use serde_json::json;

    fn spec(group: Vec<DimensionSpec>, name: &str) -> DimensionSpec {
        group.into_iter().find(|d| d.name == name).unwrap()
    }

    fn record(id: DocumentId, dimension: &str, classification: Option<Classification>) -> ClassificationRecord {
        let mut record = ClassificationRecord::new(id);
        if let Some(c) = classification {
            record.dimensions.insert(dimension.to_string(), c);
        }
        record
    }

    fn valid(label: Label) -> Option<Classification> {
        Some(Classification::Valid {
            label,
            confidence: None,
            rationale: None,
        })
    }

    fn single(value: &str) -> Option<Classification> {
        valid(Label::Single(value.to_string()))
    }

    fn multi(values: &[&str]) -> Option<Classification> {
        valid(Label::Multi(values.iter().map(|v| v.to_string()).collect()))
    }

    fn invalid() -> Option<Classification> {
        Some(Classification::Invalid {
            raw: json!("Astronomical"),
            reason: "not allowed".to_string(),
        })
    }

    fn id(i: usize) -> DocumentId {
        DocumentId::derive("acme", &format!("P{i}"), 0)
    }

    fn total_percentage(buckets: &[Bucket]) -> f64 {
        buckets.iter().map(|b| b.percentage).sum()
    }

    #[test]
    fn test_single_valued_buckets_sum_to_100_with_markers() {
        let spec = spec(implementation_group().dimensions, "data_complexity");
        let records = vec![
            record(id(0), "data_complexity", single("High")),
            record(id(1), "data_complexity", single("High")),
            record(id(2), "data_complexity", single("Low")),
            record(id(3), "data_complexity", invalid()),
            record(id(4), "data_complexity", None),
            record(id(5), "data_complexity", None),
        ];

        let summary = summarize_dimension(&spec, &records);
        assert_eq!(summary.total, 6);
        let values: Vec<(&str, usize)> = summary
            .buckets
            .iter()
            .map(|b| (b.value.as_str(), b.count))
            .collect();
        assert_eq!(
            values,
            vec![("High", 2), ("Low", 1), ("Invalid", 1), ("Not Classified", 2)]
        );
        assert!((total_percentage(&summary.buckets) - 100.0).abs() < 1e-9);
        assert!(summary.value_mentions.is_empty());
    }

    #[test]
    fn test_multi_valued_counts_each_document_once_in_buckets() {
        let spec = spec(architecture_group().dimensions, "input_modalities");
        let records = vec![
            record(id(0), "input_modalities", multi(&["Text", "Email"])),
            record(id(1), "input_modalities", multi(&["Text"])),
            record(id(2), "input_modalities", multi(&["Email", "Text"])),
            record(id(3), "input_modalities", None),
        ];

        let summary = summarize_dimension(&spec, &records);
        assert!((total_percentage(&summary.buckets) - 100.0).abs() < 1e-9);
        assert_eq!(summary.buckets[0].value, "Email + Text");
        assert_eq!(summary.buckets[0].count, 2);

        let text = summary.value_mentions.iter().find(|b| b.value == "Text").unwrap();
        assert_eq!(text.count, 3);
        assert_eq!(text.percentage, 75.0);
        assert!(total_percentage(&summary.value_mentions) > 100.0);
    }

    #[test]
    fn test_empty_record_set_has_no_buckets() {
        let spec = spec(implementation_group().dimensions, "chain_depth");
        let summary = summarize_dimension(&spec, &[]);
        assert_eq!(summary.total, 0);
        assert!(summary.buckets.is_empty());
    }

    #[test]
    fn test_cluster_summary_lists_companies_and_examples() {
        let docs = vec![
            document("globex", "Claims intake automation"),
            document("acme", "Claims triage"),
            document("acme", "Contract review"),
            document("initech", "Claims fraud screening with a very long descriptive title"),
        ];
        let records = vec![
            record(docs[0].document_id, "business_use_case", single("Claims Processing")),
            record(docs[1].document_id, "business_use_case", single("Claims Processing")),
            record(docs[2].document_id, "business_use_case", single("Contract Review")),
            record(docs[3].document_id, "business_use_case", single("Claims Processing")),
        ];

        let rows = cluster_summary("business_use_case", &docs, &records);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cluster, "Claims Processing");
        assert_eq!(rows[0].count, 3);
        assert_eq!(rows[0].percentage, "75.0%");
        assert_eq!(rows[0].num_companies, 3);
        assert_eq!(rows[0].companies, "acme, globex, initech");
        assert!(rows[0]
            .example_proposals
            .starts_with("globex: Claims intake automation | acme: Claims triage | initech: "));
        assert_eq!(rows[1].percentage, "25.0%");
    }

    #[test]
    fn test_analysis_summary_counts_companies() {
        let docs = vec![document("acme", "A"), document("acme", "B"), document("globex", "C")];
        let records: Vec<ClassificationRecord> =
            docs.iter().map(|d| ClassificationRecord::new(d.document_id)).collect();
        let specs = implementation_group().dimensions;

        let summary = analysis_summary(&specs, &docs, &records);
        assert_eq!(summary.total_documents, 3);
        assert_eq!(summary.num_companies, 2);
        assert_eq!(summary.dimensions.len(), 12);
        assert_eq!(summary.dimensions["chain_depth"].buckets[0].value, NOT_CLASSIFIED_MARKER);
    }
}
