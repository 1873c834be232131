//! # Policy Audit CLI (`policy-audit`)
//!
//! Turns a directory of medical policy PDFs into an HTML report of
//! machine-checkable billing rules.
//!
//! ## Usage
//!
//! ```bash
//! policy-audit --config ./config/audit.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `policy-audit run` | Chunk, index, run the agent and write the report |
//! | `policy-audit index` | Build and persist the vector index only |
//! | `policy-audit search "<query>"` | Query the persisted index |
//! | `policy-audit validate "<rule>"` | Run one industry-standard search |
//! | `policy-audit render <rules.json>` | Render a rules file to HTML |
//!
//! ## Environment
//!
//! - `OPENAI_API_KEY`: chat model and embeddings
//! - `SERPER_API_KEY`: industry validation (optional)
//! - `RUST_LOG`: log filter (default `info`)

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use policy_audit::config;
use policy_audit::logging::RunLog;
use policy_audit::pipeline::{self, IndexSummary};

/// Extract billing rules from medical policy documents.
#[derive(Parser)]
#[command(
    name = "policy-audit",
    about = "Extract billing rules from medical policy PDFs into an audited HTML report",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/audit.toml`. A missing file means all defaults.
    #[arg(long, global = true, default_value = "./config/audit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full audit mission.
    ///
    /// Chunks every PDF under the data directory, builds or reuses the
    /// vector index, and lets the agent extract, validate and report rules.
    /// Mission failures are logged; the command still exits successfully.
    Run,

    /// Chunk the documents and build the vector index.
    Index {
        /// Only show per-file chunk counts; nothing is embedded or written.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the persisted index.
    Search {
        query: String,

        /// Number of results (defaults to `index.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Check a billing rule against industry sources.
    Validate { query: String },

    /// Render a JSON rules file into the HTML report.
    Render { rules: PathBuf },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let run_log = RunLog::start(&cfg.logging);
    if let Some(path) = run_log.path() {
        tracing::info!(log = %path.display(), "Run log started");
    }

    match cli.command {
        Commands::Run => {
            pipeline::run_mission(&cfg).await?;
        }
        Commands::Index { dry_run } => match pipeline::build_index_only(&cfg, dry_run).await? {
            IndexSummary::DryRun(reports) => {
                println!("{:<48} {:>8}", "FILE", "CHUNKS");
                for report in &reports {
                    match &report.skipped {
                        Some(reason) => {
                            println!("{:<48} {:>8}  (skipped: {})", report.file_name, 0, reason)
                        }
                        None => println!("{:<48} {:>8}", report.file_name, report.chunks),
                    }
                }
                let total: usize = reports.iter().map(|r| r.chunks).sum();
                println!("{} files, {} chunks", reports.len(), total);
            }
            IndexSummary::Built { entries, path } => {
                println!("Indexed {} chunks into {}", entries, path.display());
            }
        },
        Commands::Search { query, k } => {
            let hits = pipeline::search_index(&cfg, &query, k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. [{:.3}] {}", i + 1, hit.score, hit.chunk.source);
                println!("   {}", hit.chunk.text.replace('\n', " "));
            }
        }
        Commands::Validate { query } => {
            println!("{}", pipeline::validate_once(&cfg, &query).await);
        }
        Commands::Render { rules } => {
            println!("{}", pipeline::render_file(&cfg, &rules)?);
        }
    }

    Ok(())
}
