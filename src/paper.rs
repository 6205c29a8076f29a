//! The paper module holds the record flowing through the pipeline and the
//! checks applied to it before summarization and storage.

use chrono::NaiveDate;
use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::constants::PAPER_DATE_FORMAT;

/// Five narrative sections generated from a paper's PDF.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperSummary {
    #[serde(alias = "Introduction")]
    pub introduction: String,
    #[serde(alias = "Methodology")]
    pub methodology: String,
    #[serde(alias = "Limitations")]
    pub limitations: String,
    #[serde(alias = "Results")]
    pub results: String,
    #[serde(alias = "Conclusions")]
    pub conclusions: String,
}

/// A paper scraped from the index and its detail page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaperRecord {
    /// Paper title.
    pub topic: String,
    /// Canonical detail page URL, unique among stored rows.
    pub url: String,
    /// Linked code repository.
    pub github: Option<String>,
    pub tags: Vec<String>,
    /// Thumbnail URL from the detail page.
    pub image: Option<String>,
    /// Publication date as written on the page, `DD Mon YYYY`.
    pub date: Option<String>,
    pub authors: Vec<String>,
    pub abstract_text: Option<String>,
    pub pdf: Option<String>,
    /// Filled in by the summarizer, absent when it failed.
    pub summary: Option<PaperSummary>,
}

impl PaperRecord {
    /// Returns the PDF URL with NUL characters and surrounding whitespace removed,
    /// or `None` if nothing is left.
    pub fn pdf_url(&self) -> Option<String> {
        self.pdf
            .as_deref()
            .map(|pdf| pdf.replace('\0', "").trim().to_owned())
            .filter(|pdf| !pdf.is_empty())
    }
}

/// Checks that `topic`, `url`, `pdf` and `date` are all present and non-empty.
///
/// Only the first missing field is logged.
pub fn validate_paper(paper: &PaperRecord) -> bool {
    let required = [
        ("topic", Some(paper.topic.as_str())),
        ("url", Some(paper.url.as_str())),
        ("pdf", paper.pdf.as_deref()),
        ("date", paper.date.as_deref()),
    ];

    for (field, value) in required {
        if value.is_none_or(|value| value.trim().is_empty()) {
            error!("Missing required field: {field} ({})", paper.url);
            return false;
        }
    }

    true
}

/// Parses a `DD Mon YYYY` date, e.g. `15 Mar 2023`.
///
/// Returns `None` and logs a warning when the text does not match, so a bad date
/// never blocks the row it belongs to.
pub fn parse_paper_date(url: &str, date: &str) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(date.trim(), PAPER_DATE_FORMAT) {
        Ok(parsed) => Some(parsed),
        Err(parse_error) => {
            warn!("Invalid date format for {url}: {date} ({parse_error})");
            None
        }
    }
}
