//! The pipeline module runs one scrape: fetch the index page, extract every paper,
//! keep the valid ones, summarize them and store them. Steps run one after another,
//! one paper at a time.

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::future::Future;

use crate::constants::{HOMEPAGE_TIMEOUT, TASK_RETRIES};
use crate::fetch::Fetcher;
use crate::paper::{PaperRecord, validate_paper};
use crate::parse::{extract_paper, parse_homepage};
use crate::storage::{Storage, UpsertReport};
use crate::summarize::Summarizer;

/// Settings of a pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Site root; the index page lives here and card links are relative to it.
    pub base_url: String,
    pub database_path: String,
    /// Skip papers whose detail page fails instead of aborting the run.
    pub isolate_failures: bool,
}

/// Counts of a finished run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub cards: usize,
    pub extracted: usize,
    pub valid: usize,
    pub summarized: usize,
    pub stored: UpsertReport,
}

/// Runs the whole scrape → extract → validate → summarize → store sequence.
///
/// # Arguments
///
/// * `options` - Site and database settings
/// * `fetcher` - Source of the index and detail pages
/// * `summarizer` - Produces the summary sections; its failures never abort the run
///
/// # Errors
///
/// Returns an error if:
/// * The database cannot be opened
/// * The index page cannot be fetched
/// * A detail page cannot be fetched, unless failures are isolated
/// * Storing the batch fails after all retries
pub async fn run_pipeline(
    options: &PipelineOptions,
    fetcher: &dyn Fetcher,
    summarizer: &dyn Summarizer,
) -> Result<RunReport> {
    let database_path = options.database_path.as_str();
    check_connection(database_path)?;

    with_retries("create_papers_table", TASK_RETRIES, || async move {
        Storage::open(database_path)?.ensure_table();
        Ok::<(), anyhow::Error>(())
    })
    .await?;

    info!("Starting data ingestion from {}", options.base_url);
    let homepage = fetcher
        .fetch_text(&options.base_url, Some(HOMEPAGE_TIMEOUT))
        .await
        .context("Unable to fetch the index page")?;
    info!("Data ingestion complete");

    let cards = parse_homepage(&homepage);
    let papers = extract_papers(&cards, options, fetcher).await?;
    let extracted = papers.len();

    let mut valid: Vec<PaperRecord> = papers.into_iter().filter(validate_paper).collect();
    info!("{}/{extracted} papers passed validation", valid.len());

    let summarized = summarize_papers(&mut valid, summarizer).await;

    let batch = valid.as_slice();
    let stored = with_retries("save_to_db", TASK_RETRIES, || async move {
        Storage::open(database_path)?.upsert_papers(batch)
    })
    .await?;

    Ok(RunReport {
        cards: cards.len(),
        extracted,
        valid: valid.len(),
        summarized,
        stored,
    })
}

/// Opens and closes the database once so a misconfigured run fails before scraping.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub fn check_connection(database_path: &str) -> Result<()> {
    match Storage::open(database_path) {
        Ok(_) => {
            info!("Connection successful");
            Ok(())
        }
        Err(e) => {
            error!("Connection failed: {e}");
            Err(e)
        }
    }
}

async fn extract_papers(
    cards: &[String],
    options: &PipelineOptions,
    fetcher: &dyn Fetcher,
) -> Result<Vec<PaperRecord>> {
    let mut papers = Vec::with_capacity(cards.len());

    for (idx, card) in cards.iter().enumerate() {
        match extract_paper(card, &options.base_url, fetcher).await {
            Ok(paper) => papers.push(paper),
            Err(e) if options.isolate_failures => {
                error!("Skipping paper card {idx}: {e:#}");
            }
            Err(e) => return Err(e.context(format!("Unable to extract paper card {idx}"))),
        }
    }

    Ok(papers)
}

/// Saves and summarizes each paper's PDF, attaching the summary to the record.
///
/// A paper whose summary cannot be produced keeps `summary: None` and is still stored.
/// Returns the number of summarized papers.
pub async fn summarize_papers(papers: &mut [PaperRecord], summarizer: &dyn Summarizer) -> usize {
    let mut summarized = 0;

    for paper in papers.iter_mut() {
        let Some(pdf) = paper.pdf_url() else {
            error!("No URL found for paper: {}", paper.url);
            continue;
        };

        let summary = match summarizer.save(&pdf).await {
            Ok(()) => summarizer.create_summary(&pdf).await,
            Err(e) => Err(e),
        };

        match summary {
            Ok(summary) => {
                paper.summary = Some(summary);
                summarized += 1;
            }
            Err(e) => error!("Failed to create summary for paper: {} - {e:#}", paper.url),
        }
    }

    info!("Summarized {summarized}/{} papers", papers.len());
    summarized
}

/// Runs `task` up to `retries + 1` times, returning the first success or the last error.
///
/// # Errors
///
/// Returns the error of the last attempt.
pub async fn with_retries<T, F, Fut>(name: &str, retries: u32, mut task: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match task().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!("Task {name} failed, retrying ({attempt}/{retries}): {e:#}");
            }
            Err(e) => {
                error!("Task {name} failed: {e:#}");
                return Err(e);
            }
        }
    }
}
