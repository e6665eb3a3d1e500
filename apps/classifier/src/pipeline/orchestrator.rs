//! Phase Orchestrator: runs the phases strictly in order, skipping those with
//! a checkpoint for the current dataset version.
//!
//! Transition rule per phase:
//!   forced                               -> run (prior checkpoint invalidated, values cleared)
//!   skip requested                       -> skip, reuse whatever the store holds
//!   complete checkpoint for this version -> skip
//!   otherwise                            -> run, filling only the missing values
//!
//! A run that leaves documents unprocessed writes a partial checkpoint, so the
//! next run classifies just those documents.
//!
//! A phase that runs first checks its predecessor's checkpoint and fails with a
//! dependency error before making any LLM call if it is absent.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::classify::dimensions::{DimensionGroup, DimensionSpec, BUSINESS_USE_CASE};
use crate::classify::{discover_vocabulary, ClassifierSettings, ClassifyOutcome, DimensionClassifier};
use crate::corpus::{self, TextLimits};
use crate::errors::PipelineError;
use crate::llm_client::prompts::PromptLibrary;
use crate::llm_client::LlmClient;
use crate::models::{ClassificationRecord, Document, DocumentId, INVALID_MARKER, NOT_CLASSIFIED_MARKER};
use crate::output::{AnnotatedDocument, ArtifactWriter};
use crate::pipeline::phase::Phase;
use crate::pipeline::report::{PhaseReport, PhaseStatus, RunReport};
use crate::pipeline::sampling::{dataset_version, sample};
use crate::store::{MergeMode, RecordStore};
use crate::summary;

const DISCOVERED_VOCABULARY_ARTIFACT: &str = "business_clusters_discovered.json";
const BUSINESS_SUMMARY_ARTIFACT: &str = "business_clusters_summary";
const ARCHITECTURE_SUMMARY_ARTIFACT: &str = "architecture_summary.json";
const IMPLEMENTATION_SUMMARY_ARTIFACT: &str = "implementation_summary.json";
pub const ANALYSIS_SUMMARY_ARTIFACT: &str = "analysis_summary.json";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub corpus_dir: PathBuf,
    pub text_limits: TextLimits,
    /// Bound on the working set; `None` classifies the whole corpus.
    pub sample_size: Option<usize>,
    pub sample_seed: u64,
    pub discovery_sample_size: usize,
    pub skip: BTreeSet<Phase>,
    pub force: BTreeSet<Phase>,
    pub classifier: ClassifierSettings,
}

impl RunOptions {
    pub fn new(corpus_dir: impl Into<PathBuf>) -> Self {
        Self {
            corpus_dir: corpus_dir.into(),
            text_limits: TextLimits::default(),
            sample_size: None,
            sample_seed: 42,
            discovery_sample_size: 60,
            skip: BTreeSet::new(),
            force: BTreeSet::new(),
            classifier: ClassifierSettings::default(),
        }
    }
}

pub struct Orchestrator {
    store: RecordStore,
    llm: LlmClient,
    prompts: PromptLibrary,
    artifacts: ArtifactWriter,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        store: RecordStore,
        llm: LlmClient,
        prompts: PromptLibrary,
        artifacts: ArtifactWriter,
        options: RunOptions,
    ) -> Self {
        Self {
            store,
            llm,
            prompts,
            artifacts,
            options,
        }
    }

    /// Runs every phase in order. `cancel` is honoured between phases only; a
    /// phase that has started always runs to completion or to a fatal error.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();

        check_cancelled(cancel, Phase::Extraction)?;
        banner(Phase::Extraction);
        let (documents, extraction) = self.run_extraction().await?;
        extraction.log();
        report.phases.push(extraction);

        let working_set = sample(&documents, self.options.sample_size, self.options.sample_seed);
        let version = dataset_version(&working_set)?;
        if let Some(size) = self.options.sample_size {
            info!("Working on a sample of {} of {} documents (bound {})", working_set.len(), documents.len(), size);
        }
        info!("Dataset version {}", version);
        report.dataset_version = version.clone();

        for phase in [
            Phase::BusinessClustering,
            Phase::ArchitectureClassification,
            Phase::ImplementationClassification,
        ] {
            check_cancelled(cancel, phase)?;
            banner(phase);
            let phase_report = self.run_classification(phase, &working_set, &version).await?;
            phase_report.log();
            report.phases.push(phase_report);
        }

        check_cancelled(cancel, Phase::SummaryGeneration)?;
        banner(Phase::SummaryGeneration);
        let records_changed = report
            .phases
            .iter()
            .any(|p| p.phase != Phase::Extraction && p.status != PhaseStatus::Skipped);
        let summary_report = self
            .run_summary(&working_set, &version, records_changed)
            .await?;
        summary_report.log();
        report.phases.push(summary_report);

        Ok(report)
    }

    // ── Transition rule ────────────────────────────────────────────────────

    async fn should_run(&self, phase: Phase, version: &str) -> Result<bool, PipelineError> {
        if self.options.force.contains(&phase) {
            info!("Phase {} forced", phase);
            return Ok(true);
        }
        let checkpoint = self.store.checkpoint(phase.as_str(), version).await?;
        if self.options.skip.contains(&phase) {
            if checkpoint.is_none() {
                warn!("Skipping {} although it has no checkpoint for this dataset", phase);
            } else {
                info!("Skipping {} (requested)", phase);
            }
            return Ok(false);
        }
        match checkpoint {
            Some(checkpoint) if checkpoint.is_complete() => {
                info!(
                    "Phase {} already complete ({} documents at {}), reusing its output",
                    phase, checkpoint.document_count, checkpoint.completed_at
                );
                Ok(false)
            }
            Some(checkpoint) => {
                info!(
                    "Phase {} left {} documents unprocessed last time, retrying them",
                    phase, checkpoint.failed_count
                );
                Ok(true)
            }
            None => Ok(true),
        }
    }

    async fn require_predecessor(&self, phase: Phase, version: &str) -> Result<(), PipelineError> {
        let Some(predecessor) = phase.predecessor() else {
            return Ok(());
        };
        // Extraction is keyed by the whole corpus, not the sampled working set.
        let checkpoint = if predecessor == Phase::Extraction {
            self.store.latest_checkpoint(predecessor.as_str()).await?
        } else {
            self.store.checkpoint(predecessor.as_str(), version).await?
        };
        match checkpoint {
            Some(_) => Ok(()),
            None => Err(PipelineError::Dependency {
                phase: phase.as_str(),
                missing: predecessor.as_str(),
            }),
        }
    }

    // ── Extraction ─────────────────────────────────────────────────────────

    async fn run_extraction(&self) -> Result<(Vec<Document>, PhaseReport), PipelineError> {
        let phase = Phase::Extraction;
        if self.options.skip.contains(&phase) && !self.options.force.contains(&phase) {
            if self.store.latest_checkpoint(phase.as_str()).await?.is_none() {
                warn!("Skipping extraction although the store has never been populated");
            }
            let documents = self.store.documents().await?;
            info!("Loaded {} documents from the store", documents.len());
            let report = PhaseReport::new(phase, PhaseStatus::Skipped, documents.len());
            return Ok((documents, report));
        }

        let documents = corpus::extract_documents(&self.options.corpus_dir, &self.options.text_limits)?;
        if documents.is_empty() {
            return Err(PipelineError::Corpus {
                path: self.options.corpus_dir.display().to_string(),
                reason: "no proposals found".to_string(),
            });
        }

        let corpus_version = dataset_version(&documents)?;
        if !self.should_run(phase, &corpus_version).await? {
            let report = PhaseReport::new(phase, PhaseStatus::Skipped, documents.len());
            return Ok((documents, report));
        }

        self.store.replace_documents(&documents).await?;
        let annotated = AnnotatedDocument::join(&documents, &[]);
        self.artifacts
            .write_records(records_artifact(phase), &annotated, &[])?;
        self.store
            .mark_complete(phase.as_str(), &corpus_version, documents.len())
            .await?;

        let report = PhaseReport::new(phase, PhaseStatus::Completed, documents.len());
        Ok((documents, report))
    }

    // ── Classification phases ──────────────────────────────────────────────

    async fn run_classification(
        &self,
        phase: Phase,
        documents: &[Document],
        version: &str,
    ) -> Result<PhaseReport, PipelineError> {
        let Some(mut group) = phase.group() else {
            return Err(PipelineError::Config(format!("phase {phase} classifies nothing")));
        };
        let ids: Vec<DocumentId> = documents.iter().map(|d| d.document_id).collect();

        if !self.should_run(phase, version).await? {
            let records = self.store.records(&ids).await?;
            return Ok(PhaseReport::tally(phase, PhaseStatus::Skipped, &group.names(), &records));
        }
        self.require_predecessor(phase, version).await?;

        let forced = self.options.force.contains(&phase);
        if forced {
            self.store.invalidate(phase.as_str()).await?;
            let cleared = self.store.clear_dimensions(&group.names(), &ids).await?;
            info!("Cleared {} stored {} values ahead of the forced re-run", cleared, phase);
        }

        let targets = self.unclassified(&group, documents).await?;
        info!(
            "{} of {} documents need {} classification",
            targets.len(),
            documents.len(),
            phase
        );

        let mut outcome = ClassifyOutcome::default();
        if !targets.is_empty() {
            self.freeze_vocabulary(&mut group, documents, version, forced).await?;
            let mode = if forced {
                MergeMode::Overwrite
            } else {
                MergeMode::FillMissing
            };
            let classifier = DimensionClassifier::new(
                &self.llm,
                &self.store,
                &self.prompts,
                self.options.classifier.clone(),
            );
            outcome = classifier.classify(&group, &targets, mode).await?;
        }

        let records = self.store.records(&ids).await?;
        self.write_phase_artifacts(phase, &group, documents, &records)?;
        if outcome.failed.is_empty() {
            self.store
                .mark_complete(phase.as_str(), version, documents.len())
                .await?;
        } else {
            warn!(
                "Phase {} could not process {} documents; the next run retries them",
                phase,
                outcome.failed.len()
            );
            self.store
                .mark_partial(phase.as_str(), version, documents.len(), outcome.failed.len())
                .await?;
        }

        Ok(PhaseReport::tally(phase, PhaseStatus::Completed, &group.names(), &records).with_outcome(&outcome))
    }

    /// Documents missing a value for any dimension of `group`, in working-set order.
    async fn unclassified(
        &self,
        group: &DimensionGroup,
        documents: &[Document],
    ) -> Result<Vec<Document>, PipelineError> {
        let ids: Vec<DocumentId> = documents.iter().map(|d| d.document_id).collect();
        let mut missing = HashSet::new();
        for dimension in group.names() {
            missing.extend(self.store.enumerate_unclassified(dimension, &ids).await?);
        }
        Ok(documents
            .iter()
            .filter(|d| missing.contains(&d.document_id))
            .cloned()
            .collect())
    }

    /// Fixes every open dimension of `group` to a vocabulary: the stored one
    /// when available, otherwise a fresh discovery pass over the first
    /// `discovery_sample_size` documents of the working set.
    async fn freeze_vocabulary(
        &self,
        group: &mut DimensionGroup,
        documents: &[Document],
        version: &str,
        forced: bool,
    ) -> Result<(), PipelineError> {
        for spec in group.dimensions.iter_mut().filter(|d| !d.is_closed()) {
            let stored = if forced {
                None
            } else {
                self.store.vocabulary(&spec.name).await?
            };

            let vocabulary = match stored {
                Some(vocabulary) => {
                    if vocabulary.dataset_version != version {
                        info!(
                            "Reusing {} vocabulary discovered on a different dataset version",
                            spec.name
                        );
                    }
                    vocabulary
                }
                None => {
                    let size = self.options.discovery_sample_size.min(documents.len());
                    let vocabulary = discover_vocabulary(
                        &self.llm,
                        &self.prompts,
                        spec,
                        &documents[..size],
                        version,
                        self.options.classifier.schema_retries,
                    )
                    .await?;
                    self.store.save_vocabulary(&vocabulary).await?;
                    if spec.name == BUSINESS_USE_CASE {
                        self.artifacts
                            .write_json(DISCOVERED_VOCABULARY_ARTIFACT, &vocabulary)?;
                    }
                    vocabulary
                }
            };

            info!("{} vocabulary ({} labels):", spec.name, vocabulary.labels.len());
            for (i, label) in vocabulary.labels.iter().enumerate() {
                info!("  {}. {}", i + 1, label);
            }
            *spec = spec.freeze(vocabulary.labels);
        }
        Ok(())
    }

    fn write_phase_artifacts(
        &self,
        phase: Phase,
        group: &DimensionGroup,
        documents: &[Document],
        records: &[ClassificationRecord],
    ) -> Result<(), PipelineError> {
        let populated = dimensions_through(phase);
        let names: Vec<&str> = populated.iter().map(|d| d.name.as_str()).collect();
        let annotated = AnnotatedDocument::join(documents, records);
        self.artifacts
            .write_records(records_artifact(phase), &annotated, &names)?;

        let summaries = summary::summarize_dimensions(&group.dimensions, records);
        for spec in &group.dimensions {
            if let Some(dimension) = summaries.get(&spec.name) {
                summary::log_distribution(&spec.title, dimension);
            }
        }

        match phase {
            Phase::BusinessClustering => {
                let rows = summary::cluster_summary(BUSINESS_USE_CASE, documents, records);
                self.artifacts
                    .write_cluster_summary(BUSINESS_SUMMARY_ARTIFACT, &rows)?;
            }
            Phase::ArchitectureClassification => {
                self.artifacts
                    .write_json(ARCHITECTURE_SUMMARY_ARTIFACT, &summaries)?;
            }
            Phase::ImplementationClassification => {
                self.artifacts
                    .write_json(IMPLEMENTATION_SUMMARY_ARTIFACT, &summaries)?;
            }
            Phase::Extraction | Phase::SummaryGeneration => {}
        }
        Ok(())
    }

    // ── Summary ────────────────────────────────────────────────────────────

    /// `records_changed` regenerates the summary even over a checkpoint, since an
    /// earlier phase wrote new values in this run.
    async fn run_summary(
        &self,
        documents: &[Document],
        version: &str,
        records_changed: bool,
    ) -> Result<PhaseReport, PipelineError> {
        let phase = Phase::SummaryGeneration;
        let specs = dimensions_through(phase);
        let names: Vec<&str> = specs.iter().map(|d| d.name.as_str()).collect();
        let ids: Vec<DocumentId> = documents.iter().map(|d| d.document_id).collect();

        if records_changed {
            info!("Earlier phases wrote new values, regenerating the summary");
        } else if !self.should_run(phase, version).await? {
            let records = self.store.records(&ids).await?;
            return Ok(PhaseReport::tally(phase, PhaseStatus::Skipped, &names, &records));
        }
        self.require_predecessor(phase, version).await?;

        let records = self.store.records(&ids).await?;
        let analysis = summary::analysis_summary(&specs, documents, &records);
        self.artifacts
            .write_json(ANALYSIS_SUMMARY_ARTIFACT, &analysis)?;

        info!("Total proposals: {}", analysis.total_documents);
        info!("Companies: {}", analysis.num_companies);
        for (dimension, summary) in &analysis.dimensions {
            let valid = summary
                .buckets
                .iter()
                .filter(|b| b.value != INVALID_MARKER && b.value != NOT_CLASSIFIED_MARKER)
                .count();
            info!("  {}: {} distinct values", dimension, valid);
        }

        self.store
            .mark_complete(phase.as_str(), version, documents.len())
            .await?;
        Ok(PhaseReport::tally(phase, PhaseStatus::Completed, &names, &records))
    }
}

fn check_cancelled(cancel: &CancellationToken, next: Phase) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        warn!("Run cancelled before phase {}", next);
        return Err(PipelineError::Cancelled(next.as_str()));
    }
    Ok(())
}

fn banner(phase: Phase) {
    info!("{}", "=".repeat(80));
    info!("PHASE: {}", phase.title());
    info!("{}", "=".repeat(80));
}

fn records_artifact(phase: Phase) -> &'static str {
    phase.records_artifact().unwrap_or("records")
}

/// Every dimension populated once `phase` has completed.
fn dimensions_through(phase: Phase) -> Vec<DimensionSpec> {
    Phase::ALL
        .into_iter()
        .filter(|p| *p <= phase)
        .filter_map(|p| p.group())
        .flat_map(|g| g.dimensions)
        .collect()
}
