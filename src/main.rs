//! papers-digest is a CLI tool that scrapes a papers index, summarizes each new paper's
//! PDF with an LLM and stores the papers in a SQLite database.
//!
//! The tool has four commands:
//! 1. `run` - Scrapes the index, summarizes and stores new papers (the scheduled flow)
//! 2. `init` - Creates the papers table
//! 3. `backfill` - Regenerates the summaries of stored papers
//! 4. `summarize` - Summarizes a single PDF and prints the sections

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use env_logger::Builder;
use log::{LevelFilter, info, warn};
use url::Url;

use papers_digest::constants::{
    BASE_URL_ENV_NAME, CHAT_MODEL_ENV_NAME, DATABASE_ENV_NAME, DEFAULT_BASE_URL,
    EMBED_MODEL_ENV_NAME, FORMAT_MODEL_ENV_NAME, MODEL_API_KEY_ENV_NAME,
};
use papers_digest::fetch::HttpFetcher;
use papers_digest::index::VectorIndex;
use papers_digest::pipeline::{PipelineOptions, check_connection, run_pipeline};
use papers_digest::storage::Storage;
use papers_digest::summarize::{SummaryModels, build_formatter, llm_builder};
use papers_digest::{BackfillTarget, RagSummarizer, Summarizer, backfill};

/// A scheduled pipeline building a digest of newly published papers
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The command to execute
    #[command(subcommand)]
    command: Command,

    /// Path to the SQLite database holding papers and the vector index
    #[arg(long, env = DATABASE_ENV_NAME, default_value = "papers.db", global = true)]
    db: String,

    #[arg(long, short, action = clap::ArgAction::Count, help = "Output v(v...)erbosity: error (0), warn (1), info (2), debug (3), trace (4)", global = true, default_value_t = 2)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the index, summarize new papers and store them.
    ///
    /// Meant to be triggered by a scheduler, e.g. the crontab entry
    /// `0 0 * * * papers-digest run`.
    Run {
        /// Root URL of the papers index
        #[arg(long, env = BASE_URL_ENV_NAME, default_value = DEFAULT_BASE_URL)]
        base_url: String,
        /// Skip papers whose detail page fails instead of aborting the run
        #[arg(long)]
        isolate_failures: bool,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Create the papers table if it does not exist
    Init,
    /// Regenerate the summary columns of stored papers
    Backfill {
        /// Rows to process: "all" (default) or "missing"
        #[arg(long, short = 't', default_value = "all")]
        target: BackfillTarget,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Index and summarize a single PDF, printing the sections
    Summarize {
        /// URL of the PDF to summarize
        url: String,
        #[command(flatten)]
        models: ModelArgs,
    },
}

/// Models are given as URLs of the form `backend://model`.
#[derive(Args)]
struct ModelArgs {
    /// Model answering questions over the retrieved chunks
    #[arg(long, env = CHAT_MODEL_ENV_NAME, default_value = "groq://llama-3.3-70b-versatile")]
    chat_model: String,
    /// Model splitting the answer into summary sections
    #[arg(long, env = FORMAT_MODEL_ENV_NAME, default_value = "groq://gemma2-9b-it")]
    format_model: String,
    /// Model embedding PDF chunks
    #[arg(long, env = EMBED_MODEL_ENV_NAME, default_value = "ollama://nomic-embed-text")]
    embed_model: String,
    /// API key passed to every model
    #[arg(long, env = MODEL_API_KEY_ENV_NAME, hide_env_values = true)]
    api_key: Option<String>,
    /// Rate limit: chat requests per minute (default: no limit)
    #[arg(long, short = 'r')]
    rpm: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        return Err(anyhow!("Unable to load .env file: {e}"));
    }

    let cli = Cli::parse();

    Builder::new()
        .filter_level(match cli.verbose {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .init();

    match cli.command {
        Command::Run {
            base_url,
            isolate_failures,
            models,
        } => handle_run_command(cli.db, base_url, isolate_failures, &models).await,
        Command::Init => {
            check_connection(&cli.db)?;
            Storage::open(&cli.db)?.ensure_table();
            VectorIndex::open(&cli.db)?;
            Ok(())
        }
        Command::Backfill { target, models } => {
            let summarizer = build_summarizer(&cli.db, &models)?;
            let report = backfill(&cli.db, target, &summarizer).await?;
            if report.failed > 0 {
                warn!("{} records could not be backfilled", report.failed);
            }
            Ok(())
        }
        Command::Summarize { url, models } => {
            let summarizer = build_summarizer(&cli.db, &models)?;
            summarizer.save(&url).await?;
            let summary = summarizer.create_summary(&url).await?;
            println!(
                "## Introduction\n{}\n\n## Methodology\n{}\n\n## Limitations\n{}\n\n## Results\n{}\n\n## Conclusions\n{}",
                summary.introduction,
                summary.methodology,
                summary.limitations,
                summary.results,
                summary.conclusions
            );
            Ok(())
        }
    }
}

async fn handle_run_command(
    db: String,
    base_url: String,
    isolate_failures: bool,
    models: &ModelArgs,
) -> Result<()> {
    Url::parse(&base_url).map_err(|e| anyhow!("Invalid base url: {}", e))?;

    let summarizer = build_summarizer(&db, models)?;
    let fetcher = HttpFetcher::default();
    let options = PipelineOptions {
        base_url: base_url.trim_end_matches('/').to_owned(),
        database_path: db,
        isolate_failures,
    };

    let report = run_pipeline(&options, &fetcher, &summarizer).await?;
    info!(
        "Run finished: {} cards, {} valid, {} summarized, {} stored, {} already known",
        report.cards, report.valid, report.summarized, report.stored.inserted, report.stored.skipped
    );

    Ok(())
}

fn build_summarizer(db: &str, models: &ModelArgs) -> Result<RagSummarizer> {
    let api_key = models.api_key.as_deref();

    let chat = llm_builder(&models.chat_model, api_key)?
        .build()
        .map_err(|e| anyhow!("Failed to build chat model: {}", e))?;
    let formatter = build_formatter(llm_builder(&models.format_model, api_key)?)?;
    let embedder = llm_builder(&models.embed_model, api_key)?
        .build()
        .map_err(|e| anyhow!("Failed to build embedding model: {}", e))?;

    Ok(RagSummarizer::new(
        Box::new(HttpFetcher::default()),
        VectorIndex::open(db)?,
        SummaryModels {
            chat,
            formatter,
            embedder,
        },
        models.rpm,
    ))
}
