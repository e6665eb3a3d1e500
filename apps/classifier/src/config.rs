use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::classify::ClassifierSettings;
use crate::corpus;
use crate::llm_client::retry::RetryPolicy;
use crate::pipeline::{Phase, RunOptions};

#[derive(Debug, Parser)]
#[command(name = "proposal-classifier", version, about = "Batch LLM classification of AI system proposals")]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Loads `.env` (if present) and parses flags; flags win over the environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every phase, resuming from checkpoints.
    Run(RunArgs),
    /// Check the environment and corpus without calling the LLM.
    Validate,
    /// Serve the output directory and store read-only over HTTP.
    Serve,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Args)]
pub struct Config {
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true, global = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = "CLASSIFIER_MODEL", default_value = "claude-sonnet-4-5", global = true)]
    pub model: String,

    #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = "https://api.anthropic.com", global = true)]
    pub api_base_url: String,

    #[arg(long, env = "PROPOSAL_CORPUS_DIR", default_value = "../proposal-data/companies", global = true)]
    pub corpus_dir: PathBuf,

    #[arg(long, env = "CLASSIFIER_OUTPUT_DIR", default_value = "outputs", global = true)]
    pub output_dir: PathBuf,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://outputs/classifier.db?mode=rwc", global = true)]
    pub database_url: String,

    /// Directory of `<template>.txt` prompt overrides.
    #[arg(long, env = "CLASSIFIER_PROMPTS_DIR", global = true)]
    pub prompts_dir: Option<PathBuf>,

    #[arg(long, env = "CLASSIFIER_MAX_RETRIES", default_value_t = 3, global = true)]
    pub max_retries: u32,

    #[arg(long, env = "CLASSIFIER_BACKOFF_BASE_SECONDS", default_value_t = 1.0, global = true)]
    pub backoff_base_seconds: f64,

    /// Fraction of each backoff delay added as random jitter.
    #[arg(long, env = "CLASSIFIER_BACKOFF_JITTER", default_value_t = 0.0, global = true)]
    pub backoff_jitter: f64,

    #[arg(long, env = "CLASSIFIER_REQUEST_TIMEOUT_SECONDS", default_value_t = 120, global = true)]
    pub request_timeout_seconds: u64,

    #[arg(long, env = "CLASSIFIER_SCHEMA_RETRIES", default_value_t = 2, global = true)]
    pub schema_retries: u32,

    #[arg(long, env = "CLASSIFIER_CONCURRENCY", default_value_t = 4, global = true)]
    pub concurrency: usize,

    #[arg(long, env = "CLASSIFIER_DISCOVERY_SAMPLE", default_value_t = 60, global = true)]
    pub discovery_sample_size: usize,

    #[arg(long, env = "CLASSIFIER_SAMPLE_SEED", default_value_t = 42, global = true)]
    pub sample_seed: u64,

    #[arg(long, env = "PORT", default_value_t = 8080, global = true)]
    pub port: u16,

    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    pub rust_log: String,
}

/// Flags of the `run` subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Classify a deterministic sample of at most N documents.
    #[arg(long = "sample", value_name = "N")]
    pub sample_size: Option<usize>,

    #[arg(long)]
    pub skip_extraction: bool,
    #[arg(long)]
    pub skip_business: bool,
    #[arg(long)]
    pub skip_architecture: bool,
    #[arg(long)]
    pub skip_implementation: bool,

    /// Re-run a phase from scratch, replacing its stored values.
    #[arg(long = "force", value_name = "PHASE")]
    pub force: Vec<Phase>,

    #[arg(long, conflicts_with = "force")]
    pub force_all: bool,

    /// Documents per LLM request, for every phase.
    #[arg(long)]
    pub batch_size: Option<usize>,
}

impl Config {
    pub fn api_key(&self) -> Result<&str> {
        match self.anthropic_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!("Required environment variable 'ANTHROPIC_API_KEY' is not set"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let base_delay = Duration::try_from_secs_f64(self.backoff_base_seconds).with_context(|| {
            format!(
                "CLASSIFIER_BACKOFF_BASE_SECONDS must be a finite, non-negative number of seconds (got {})",
                self.backoff_base_seconds
            )
        })?;
        Ok(RetryPolicy {
            max_retries: self.max_retries,
            base_delay,
            jitter_fraction: self.backoff_jitter.clamp(0.0, 1.0),
            ..RetryPolicy::default()
        })
    }

    /// Environment check run before any LLM work: API key present, corpus
    /// readable, output directory creatable.
    pub fn validate(&self) -> Result<()> {
        self.api_key()?;
        info!("API key configured (model: {})", self.model);
        self.retry_policy()?;

        if !self.corpus_dir.is_dir() {
            bail!("Corpus directory not found: {}", self.corpus_dir.display());
        }
        let files = corpus::collection_files(&self.corpus_dir)
            .with_context(|| format!("Failed to scan corpus at {}", self.corpus_dir.display()))?;
        if files.is_empty() {
            warn!("No proposal files found under {}", self.corpus_dir.display());
        } else {
            info!("Found {} proposal files under {}", files.len(), self.corpus_dir.display());
        }

        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Cannot create output directory {}", self.output_dir.display()))?;
        info!("Output directory ready: {}", self.output_dir.display());
        Ok(())
    }

    pub fn run_options(&self, args: &RunArgs) -> RunOptions {
        let mut options = RunOptions::new(&self.corpus_dir);
        options.sample_size = args.sample_size;
        options.sample_seed = self.sample_seed;
        options.discovery_sample_size = self.discovery_sample_size;
        options.skip = args.skipped();
        options.force = if args.force_all {
            Phase::ALL.into_iter().collect()
        } else {
            args.force.iter().copied().collect()
        };
        options.classifier = ClassifierSettings {
            concurrency: self.concurrency.max(1),
            schema_retries: self.schema_retries,
            batch_size: args.batch_size.filter(|n| *n > 0),
        };
        options
    }
}

impl RunArgs {
    fn skipped(&self) -> BTreeSet<Phase> {
        [
            (self.skip_extraction, Phase::Extraction),
            (self.skip_business, Phase::BusinessClustering),
            (self.skip_architecture, Phase::ArchitectureClassification),
            (self.skip_implementation, Phase::ImplementationClassification),
        ]
        .into_iter()
        .filter_map(|(skip, phase)| skip.then_some(phase))
        .collect()
    }
}
