//! End-to-end commands.
//!
//! `run` wires the stages together: chunk the policy library, build (or
//! reuse) the vector index, assemble the toolbox and drive the mission.
//! The other functions back the single-stage CLI commands.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{error, info, warn};

use crate::agent::prompt::MISSION_PROMPT;
use crate::agent::{ChatModel, MissionExecutor, MissionOutcome, OpenAIChatModel, Toolbox};
use crate::chunk::TextSplitter;
use crate::config::Config;
use crate::embedding::{create_provider, embed_query, EmbeddingProvider};
use crate::index::{build_index, Retriever, VectorIndex};
use crate::ingest::{chunk_report, collect_chunks, FileReport};
use crate::models::ScoredChunk;
use crate::report::{ReportRenderer, RulesInput};
use crate::validator::IndustryValidator;

/// Full audit run.
///
/// Setup failures (unknown provider, missing `OPENAI_API_KEY`) are returned.
/// Mission failures are logged and the run ends normally without a report.
pub async fn run_mission(config: &Config) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let model = OpenAIChatModel::new(&config.llm)?;
    let validator = IndustryValidator::from_env(&config.validation);
    if !validator.has_credentials() {
        warn!("SERPER_API_KEY not set; industry validation will report a missing key");
    }

    match execute_mission(config, provider, Box::new(model), validator).await {
        Ok(MissionOutcome::Completed { output, steps, .. }) => {
            info!(tool_calls = steps.len(), "Mission finished");
            println!("\nFinal Agent Response:");
            println!("{}", output);
        }
        Ok(MissionOutcome::Exhausted {
            iterations,
            last_message,
        }) => {
            error!(
                iterations,
                last_message = last_message.as_deref().unwrap_or(""),
                "Mission ended without generating a report"
            );
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Critical error during agent execution");
        }
    }
    Ok(())
}

/// Chunk, index and run the mission with the given components.
pub async fn execute_mission(
    config: &Config,
    provider: Box<dyn EmbeddingProvider>,
    model: Box<dyn ChatModel>,
    validator: IndustryValidator,
) -> Result<MissionOutcome> {
    info!("Step 1: Loading and chunking policy documents");
    let splitter = TextSplitter::from_config(&config.chunking);
    let chunks = collect_chunks(&config.data, &splitter);

    info!("Step 2: Building vector index");
    let index = build_index(
        &chunks,
        provider.as_ref(),
        &config.index,
        config.embedding.batch_size,
    )
    .await;
    if index.is_none() {
        warn!("Vector index unavailable; policy retrieval will report it");
    }

    info!("Step 3: Initializing agent");
    let retriever = Retriever::new(index, provider, config.index.top_k);
    let renderer = ReportRenderer::new(&config.report)?;
    let toolbox = Toolbox::new(retriever, validator, renderer);
    let executor = MissionExecutor::new(model, toolbox, config.agent.clone());

    info!("Step 4: Agent execution started. Analyzing policies");
    executor.run(MISSION_PROMPT, &[]).await
}

/// Outcome of the `index` command.
#[derive(Debug)]
pub enum IndexSummary {
    DryRun(Vec<FileReport>),
    Built { entries: usize, path: std::path::PathBuf },
}

pub async fn build_index_only(config: &Config, dry_run: bool) -> Result<IndexSummary> {
    let splitter = TextSplitter::from_config(&config.chunking);
    if dry_run {
        return Ok(IndexSummary::DryRun(chunk_report(&config.data, &splitter)));
    }

    let provider = create_provider(&config.embedding)?;
    let chunks = collect_chunks(&config.data, &splitter);
    match build_index(
        &chunks,
        provider.as_ref(),
        &config.index,
        config.embedding.batch_size,
    )
    .await
    {
        Some(index) => Ok(IndexSummary::Built {
            entries: index.len(),
            path: config.index.path.clone(),
        }),
        None => bail!("No index was built; see the log for details"),
    }
}

/// Query the persisted index.
pub async fn search_index(config: &Config, query: &str, k: Option<usize>) -> Result<Vec<ScoredChunk>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let index = VectorIndex::load(&config.index.path)
        .with_context(|| "Failed to load vector index; run `policy-audit index` first")?;
    let provider = create_provider(&config.embedding)?;
    if index.model() != provider.model_name() {
        warn!(
            index_model = index.model(),
            provider_model = provider.model_name(),
            "Index was built with a different embedding model"
        );
    }

    let vector = embed_query(provider.as_ref(), query).await?;
    Ok(index.search(&vector, k.unwrap_or(config.index.top_k)))
}

pub async fn validate_once(config: &Config, query: &str) -> String {
    IndustryValidator::from_env(&config.validation)
        .validate(query)
        .await
}

/// Render a rules file (a JSON list, optionally fenced) to the report path.
pub fn render_file(config: &Config, path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
    let renderer = ReportRenderer::new(&config.report)?;
    let summary = renderer.write_report(RulesInput::Text(text))?;
    info!(path = %summary.path.display(), "Report written");
    Ok(summary.to_string())
}
