mod classify;
mod config;
mod corpus;
mod db;
mod errors;
mod llm_client;
mod models;
mod output;
mod pipeline;
mod routes;
mod state;
mod store;
mod summary;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Cli, Command, Config, RunArgs};
use crate::llm_client::prompts::PromptLibrary;
use crate::llm_client::{AnthropicBackend, LlmClient};
use crate::output::ArtifactWriter;
use crate::pipeline::Orchestrator;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::RecordStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::load();
    let config = cli.config;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Proposal classifier v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run(args) => run(&config, &args).await,
        Command::Validate => {
            config.validate()?;
            info!("Environment OK");
            Ok(())
        }
        Command::Serve => serve(&config).await,
    }
}

async fn run(config: &Config, args: &RunArgs) -> Result<()> {
    let backend = AnthropicBackend::new(
        config.api_key()?.to_string(),
        &config.api_base_url,
        config.model.clone(),
        config.request_timeout(),
    )?;
    let llm = LlmClient::new(Arc::new(backend), config.retry_policy()?, config.request_timeout());
    info!("LLM client initialized (model: {})", config.model);

    let prompts = PromptLibrary::load(config.prompts_dir.as_deref())?;
    // The default database lives inside the output directory, so create it first.
    let artifacts = ArtifactWriter::new(&config.output_dir)?;
    let store = RecordStore::connect(&config.database_url).await?;

    let orchestrator = Orchestrator::new(store, llm, prompts, artifacts, config.run_options(args));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current phase");
            on_interrupt.cancel();
        }
    });

    let report = orchestrator.run(&cancel).await?;

    info!("Run complete (dataset version {})", report.dataset_version);
    for phase in &report.phases {
        phase.log();
    }
    let failed = report.failed_documents();
    if failed > 0 {
        warn!("{} document classifications failed; re-run to retry them", failed);
    }
    info!("Outputs saved to {}", config.output_dir.display());
    Ok(())
}

async fn serve(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.output_dir)?;
    let store = RecordStore::connect(&config.database_url).await?;
    let state = AppState {
        store,
        output_dir: config.output_dir.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
