//! The storage module persists scraped papers into the `papers` table of a
//! SQLite database and serves the rows back to the backfill flow.

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use log::{debug, error, info};
use rusqlite::{Connection, OptionalExtension, Row, Statement, params};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::BackfillTarget;
use crate::paper::{PaperRecord, PaperSummary, parse_paper_date};

const CREATE_PAPERS_SQL: &str = "CREATE TABLE IF NOT EXISTS papers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic TEXT NOT NULL,
    abstract TEXT,
    url TEXT UNIQUE NOT NULL,
    github TEXT NOT NULL,
    authors TEXT,
    introduction TEXT,
    methodology TEXT,
    limitations TEXT,
    results TEXT,
    conclusions TEXT,
    image TEXT,
    date DATE,
    tags TEXT,
    pdf TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

const INSERT_PAPER_SQL: &str = "INSERT INTO papers
    (topic, abstract, url, github, authors, introduction, methodology, limitations, results, conclusions, image, date, tags, pdf)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
    ON CONFLICT (url) DO NOTHING";

const SELECT_PAPER_SQL: &str = "SELECT id, topic, abstract, url, github, authors, introduction, methodology, limitations, results, conclusions, image, date, tags, pdf FROM papers";

const STORED_DATE_FORMAT: &str = "%Y-%m-%d";

/// Storage wraps one SQLite connection, opened for a single unit of work and closed on drop.
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

/// Outcome of a batch insert. Rows that failed individually do not fail the batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub total: usize,
    pub inserted: usize,
    /// Rows whose URL was already stored.
    pub skipped: usize,
    pub failed: usize,
}

/// A row of the `papers` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredPaper {
    pub id: i64,
    pub topic: String,
    pub abstract_text: Option<String>,
    pub url: String,
    pub github: String,
    pub authors: Vec<String>,
    pub summary: Option<PaperSummary>,
    pub image: Option<String>,
    pub date: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub pdf: Option<String>,
}

impl Storage {
    /// Opens the database at the specified path, creating the file if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(database_path: &str) -> Result<Self> {
        let conn = Connection::open(database_path)
            .with_context(|| format!("Unable to open database {database_path}"))?;
        debug!("Opened database {database_path}");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Storage mutex poisoned"))
    }

    /// Creates the `papers` table if it does not exist yet.
    ///
    /// A failing statement is logged and swallowed so the run can go on.
    pub fn ensure_table(&self) {
        let created = self
            .lock()
            .and_then(|conn| conn.execute(CREATE_PAPERS_SQL, []).map_err(Into::into));

        match created {
            Ok(_) => info!("Table papers is ready"),
            Err(e) => error!("Failed to create table: {e}"),
        }
    }

    /// Inserts the papers in one transaction, skipping those whose URL is already stored.
    ///
    /// Rows are never updated. A row that cannot be written is logged and counted in
    /// [`UpsertReport::failed`]; the remaining rows are still inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started, prepared or committed.
    /// Nothing from the batch is kept in that case.
    pub fn upsert_papers(&self, papers: &[PaperRecord]) -> Result<UpsertReport> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Unable to begin transaction")?;
        let mut report = UpsertReport {
            total: papers.len(),
            ..UpsertReport::default()
        };

        {
            let mut statement = tx
                .prepare(INSERT_PAPER_SQL)
                .context("Unable to prepare paper insert")?;

            for (idx, paper) in papers.iter().enumerate() {
                match insert_paper(&mut statement, paper) {
                    Ok(0) => {
                        debug!("Paper {} already stored", paper.url);
                        report.skipped += 1;
                    }
                    Ok(_) => report.inserted += 1,
                    Err(e) => {
                        error!("Failed to process paper {idx}: {e}");
                        debug!("Problematic paper data: {paper:?}");
                        report.failed += 1;
                    }
                }
            }
        }

        tx.commit()
            .context("Unable to commit papers, batch rolled back")?;
        info!(
            "Successfully inserted {}/{} records",
            report.inserted, report.total
        );

        Ok(report)
    }

    /// Returns `(id, pdf)` of the rows the backfill should process, in id order.
    /// Rows without a PDF link are left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn fetch_backfill_rows(&self, target: BackfillTarget) -> Result<Vec<(i64, String)>> {
        let conn = self.lock()?;
        let query = match target {
            BackfillTarget::All => {
                "SELECT id, pdf FROM papers WHERE pdf IS NOT NULL AND pdf != '' ORDER BY id"
            }
            BackfillTarget::Missing => {
                "SELECT id, pdf FROM papers WHERE pdf IS NOT NULL AND pdf != ''
                    AND (introduction IS NULL OR introduction = ''
                        OR methodology IS NULL OR methodology = ''
                        OR limitations IS NULL OR limitations = ''
                        OR results IS NULL OR results = ''
                        OR conclusions IS NULL OR conclusions = '')
                    ORDER BY id"
            }
        };

        let mut stmt = conn.prepare(query)?;
        let rows: Result<Vec<(i64, String)>, rusqlite::Error> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect();

        rows.map_err(Into::into)
    }

    /// Overwrites the five summary columns of the row with the given id.
    ///
    /// Returns the number of updated rows, 0 when the id does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn update_summary(&self, id: i64, summary: &PaperSummary) -> Result<usize> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE papers SET introduction = ?1, methodology = ?2, limitations = ?3, results = ?4, conclusions = ?5 WHERE id = ?6",
            params![
                summary.introduction,
                summary.methodology,
                summary.limitations,
                summary.results,
                summary.conclusions,
                id
            ],
        )?;

        Ok(updated)
    }

    /// Looks a stored paper up by its detail page URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored array is not valid JSON.
    pub fn get_paper(&self, url: &str) -> Result<Option<StoredPaper>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{SELECT_PAPER_SQL} WHERE url = ?1"))?;
        let row: Option<PaperRow> = stmt.query_row([url], PaperRow::from_row).optional()?;

        row.map(StoredPaper::try_from).transpose()
    }

    /// Returns every stored paper in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored array is not valid JSON.
    pub fn list_papers(&self) -> Result<Vec<StoredPaper>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{SELECT_PAPER_SQL} ORDER BY id"))?;
        let rows: Vec<PaperRow> = stmt
            .query_map([], PaperRow::from_row)?
            .collect::<Result<_, rusqlite::Error>>()?;

        rows.into_iter().map(StoredPaper::try_from).collect()
    }
}

fn insert_paper(statement: &mut Statement<'_>, paper: &PaperRecord) -> Result<usize> {
    let date = paper
        .date
        .as_deref()
        .and_then(|date| parse_paper_date(&paper.url, date))
        .map(|date| date.format(STORED_DATE_FORMAT).to_string());
    let summary = paper.summary.as_ref();

    let inserted = statement.execute(params![
        paper.topic,
        paper.abstract_text,
        paper.url,
        paper.github.as_deref().unwrap_or_default(),
        serde_json::to_string(&paper.authors)?,
        summary.map(|s| s.introduction.as_str()),
        summary.map(|s| s.methodology.as_str()),
        summary.map(|s| s.limitations.as_str()),
        summary.map(|s| s.results.as_str()),
        summary.map(|s| s.conclusions.as_str()),
        paper.image,
        date,
        serde_json::to_string(&paper.tags)?,
        paper.pdf,
    ])?;

    Ok(inserted)
}

/// Raw column values of a `papers` row.
struct PaperRow {
    id: i64,
    topic: String,
    abstract_text: Option<String>,
    url: String,
    github: String,
    authors: Option<String>,
    sections: [Option<String>; 5],
    image: Option<String>,
    date: Option<String>,
    tags: Option<String>,
    pdf: Option<String>,
}

impl PaperRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            topic: row.get(1)?,
            abstract_text: row.get(2)?,
            url: row.get(3)?,
            github: row.get(4)?,
            authors: row.get(5)?,
            sections: [row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?],
            image: row.get(11)?,
            date: row.get(12)?,
            tags: row.get(13)?,
            pdf: row.get(14)?,
        })
    }
}

fn json_list(value: Option<String>) -> Result<Vec<String>> {
    match value {
        Some(json) if !json.is_empty() => {
            serde_json::from_str(&json).context("Stored list is not a JSON array")
        }
        _ => Ok(Vec::new()),
    }
}

impl TryFrom<PaperRow> for StoredPaper {
    type Error = anyhow::Error;

    fn try_from(row: PaperRow) -> Result<Self> {
        let [introduction, methodology, limitations, results, conclusions] = row.sections;
        let summary = match (introduction, methodology, limitations, results, conclusions) {
            (None, None, None, None, None) => None,
            (introduction, methodology, limitations, results, conclusions) => Some(PaperSummary {
                introduction: introduction.unwrap_or_default(),
                methodology: methodology.unwrap_or_default(),
                limitations: limitations.unwrap_or_default(),
                results: results.unwrap_or_default(),
                conclusions: conclusions.unwrap_or_default(),
            }),
        };

        Ok(StoredPaper {
            id: row.id,
            topic: row.topic,
            abstract_text: row.abstract_text,
            url: row.url,
            github: row.github,
            authors: json_list(row.authors)?,
            summary,
            image: row.image,
            date: row
                .date
                .map(|date| NaiveDate::parse_from_str(&date, STORED_DATE_FORMAT))
                .transpose()
                .context("Unable to read stored date")?,
            tags: json_list(row.tags)?,
            pdf: row.pdf,
        })
    }
}
