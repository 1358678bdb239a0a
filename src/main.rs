//! # chatscope CLI (`chs`)
//!
//! The `chs` binary is the primary interface for chatscope. It provides
//! commands for database initialization, chat-export ingestion, worker
//! management, and report retrieval.
//!
//! ## Usage
//!
//! ```bash
//! chs --config ./config/chs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chs init` | Create the SQLite database and run schema migrations |
//! | `chs ingest <conversation> <paths…>` | Stage exports and run or enqueue a case |
//! | `chs worker` | Run the worker pool until the queue drains |
//! | `chs status <case>` | Print case status and latest progress |
//! | `chs report <case>` | Print the stored report JSON |
//! | `chs ask <case> "<question>"` | Answer a question over a finished case |
//! | `chs suggest <screenshot>` | Suggest a reply to a screenshotted exchange |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use chatscope::cases::AnalysisType;
use chatscope::config;
use chatscope::ingest;
use chatscope::migrate;
use chatscope::models::StagedFile;
use chatscope::pipeline::{self, PipelineContext};
use chatscope::progress::ProgressMode;
use chatscope::queue::JobQueue;
use chatscope::worker;

/// chatscope CLI — ingest two-party chat exports and analyze them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chs.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "chs",
    about = "chatscope — chat-export ingestion and tiered conversation analysis",
    version,
    long_about = "chatscope normalizes chat exports (WhatsApp, iMessage, generic logs, JSON, \
    screenshots, zip archives) into a deduplicated timeline and runs tiered analysis over it: \
    a fast baseline triage or a deep multi-specialist pass with verification, assembled into \
    a hierarchical report."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chs.toml")]
    config: PathBuf,

    /// Progress output on stderr: `auto` (human when stderr is a TTY),
    /// `human`, `json`, or `off`.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (cases,
    /// artifacts, jobs). This command is idempotent — running it multiple
    /// times is safe.
    Init,

    /// Stage chat exports and analyze them.
    ///
    /// Files are read from the given paths (directories are walked
    /// recursively) and staged under a new case for the conversation.
    /// By default the case runs inline; with `--enqueue` it is handed to
    /// the durable queue for `chs worker` to pick up.
    Ingest {
        /// Conversation identifier the case belongs to.
        conversation: String,

        /// Export files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Analysis tier: `baseline` (fast triage) or `deep` (full
        /// specialist pass; requires a completed baseline).
        #[arg(long, default_value = "baseline")]
        kind: String,

        /// Queue the case instead of running it inline.
        #[arg(long)]
        enqueue: bool,
    },

    /// Run the worker pool until the job queue drains.
    Worker {
        /// Number of jobs to run concurrently (defaults to config).
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Print a case's status and latest progress.
    Status {
        /// Case UUID.
        case: String,
    },

    /// Print the stored report for a case.
    Report {
        /// Case UUID.
        case: String,
    },

    /// Answer an ad hoc question over a finished case.
    Ask {
        /// Case UUID.
        case: String,

        /// The question to answer.
        question: String,
    },

    /// Suggest a reply to a screenshotted exchange.
    Suggest {
        /// Path to the screenshot (or text excerpt) file.
        screenshot: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let progress = parse_progress(&cli.progress)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            conversation,
            paths,
            kind,
            enqueue,
        } => {
            let kind = AnalysisType::parse(&kind)?;
            let backoff = cfg.worker.backoff_base_secs;
            let ctx = PipelineContext::new(cfg).await?;
            let queue = JobQueue::new(ctx.pool().clone(), backoff);
            ingest::run_ingest(&ctx, &queue, &conversation, &paths, kind, enqueue, progress)
                .await?;
        }
        Commands::Worker { concurrency } => {
            init_tracing();
            let concurrency = concurrency.unwrap_or(cfg.worker.concurrency);
            let backoff = cfg.worker.backoff_base_secs;
            let ctx = Arc::new(PipelineContext::new(cfg).await?);
            let queue = JobQueue::new(ctx.pool().clone(), backoff);
            let settled = worker::run(ctx, queue, concurrency, progress).await?;
            println!("{} job(s) settled", settled);
        }
        Commands::Status { case } => {
            let ctx = PipelineContext::new(cfg).await?;
            let record = ctx
                .cases
                .get(&case)
                .await?
                .ok_or_else(|| anyhow::anyhow!("unknown case: {}", case))?;
            let progress: Option<chatscope::progress::ProgressRecord> = ctx
                .store
                .get(&case, chatscope::store::ArtifactKind::Progress)
                .await?;

            let status = serde_json::json!({
                "case_id": record.id,
                "conversation_id": record.conversation_id,
                "analysis_type": record.analysis_type,
                "status": record.status,
                "error": record.error,
                "progress": progress,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Report { case } => {
            let ctx = PipelineContext::new(cfg).await?;
            let report = report_json(&ctx, &case).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Ask { case, question } => {
            let ctx = PipelineContext::new(cfg).await?;
            let answer = pipeline::ask(&ctx, &case, &question).await?;
            println!("{}", answer);
        }
        Commands::Suggest { screenshot } => {
            let ctx = PipelineContext::new(cfg).await?;
            let staged: Vec<StagedFile> = ingest::stage_paths(&[screenshot])?;
            let reply = pipeline::suggest(&ctx, &staged[0]).await?;
            println!("{}", reply);
        }
    }

    Ok(())
}

async fn report_json(ctx: &PipelineContext, case: &str) -> anyhow::Result<serde_json::Value> {
    use chatscope::store::ArtifactKind;

    for kind in [ArtifactKind::DeepReport, ArtifactKind::BaselineReport] {
        if let Some(report) = ctx.store.get::<serde_json::Value>(case, kind).await? {
            return Ok(report);
        }
    }
    anyhow::bail!("no stored report for case {} (expired or never completed)", case)
}

fn parse_progress(mode: &str) -> anyhow::Result<ProgressMode> {
    match mode {
        "auto" => Ok(ProgressMode::default_for_tty()),
        "human" => Ok(ProgressMode::Human),
        "json" => Ok(ProgressMode::Json),
        "off" => Ok(ProgressMode::Off),
        other => anyhow::bail!("unknown progress mode: {} (expected auto|human|json|off)", other),
    }
}

/// Structured logs for long-running workers; `RUST_LOG` controls the
/// filter, defaulting to info.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
