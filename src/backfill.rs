//! The backfill module regenerates the summary columns of rows already stored.

use anyhow::Result;
use log::{error, info};

use crate::BackfillTarget;
use crate::storage::Storage;
use crate::summarize::Summarizer;

/// Counts of a finished backfill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Re-summarizes stored papers and writes the five sections back by row id.
///
/// With [`BackfillTarget::All`] every row is processed again, including rows that
/// already have a summary.
///
/// # Arguments
///
/// * `db_path` - Path to the database holding the `papers` table
/// * `target` - Which rows to process
/// * `summarizer` - Produces the summary sections
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the rows cannot be read.
/// Failures of single rows are logged and counted instead.
pub async fn backfill(
    db_path: &str,
    target: BackfillTarget,
    summarizer: &dyn Summarizer,
) -> Result<BackfillReport> {
    let storage = Storage::open(db_path)?;
    let rows = storage.fetch_backfill_rows(target)?;
    info!("Backfilling {} papers ({target:?})", rows.len());

    let mut report = BackfillReport::default();
    for (id, pdf) in rows {
        report.processed += 1;
        info!("Record id {id} and url {pdf}");

        let updated: Result<usize> = async {
            summarizer.save(&pdf).await?;
            let summary = summarizer.create_summary(&pdf).await?;
            storage.update_summary(id, &summary)
        }
        .await;

        match updated {
            Ok(_) => {
                info!("Updated record {id}");
                report.updated += 1;
            }
            Err(e) => {
                error!("Failed to backfill record {id}: {e:#}");
                report.failed += 1;
            }
        }
    }

    info!(
        "Backfilled {}/{} records",
        report.updated, report.processed
    );
    Ok(report)
}
