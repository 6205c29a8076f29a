//! The papers-digest library scrapes a papers index, summarizes every new paper's PDF
//! with retrieval-augmented generation and stores the result in SQLite.

pub mod backfill;
pub mod constants;
pub mod document;
pub mod fetch;
pub mod index;
pub mod paper;
pub mod parse;
pub mod pipeline;
pub mod storage;
pub mod summarize;

/// Enum representing the rows a backfill processes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum BackfillTarget {
    /// All stored rows, summarized or not.
    #[default]
    All,
    /// Rows with at least one empty summary column.
    Missing,
}

impl std::str::FromStr for BackfillTarget {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "all" => Ok(BackfillTarget::All),
            "missing" => Ok(BackfillTarget::Missing),
            _ => Err(format!("Invalid backfill target: {}", input)),
        }
    }
}

pub use backfill::backfill;
pub use paper::{PaperRecord, PaperSummary, validate_paper};
pub use pipeline::run_pipeline;
pub use summarize::{RagSummarizer, Summarizer};
