//! The index module keeps chunk embeddings in SQLite, grouped into one
//! collection per PDF URL, and answers nearest-neighbour queries over a collection.

use anyhow::{Result, bail};
use log::{debug, info};
use rusqlite::params;

use crate::document::TextChunk;
use crate::storage::Storage;

const CREATE_CHUNKS_SQL: &str = "CREATE TABLE IF NOT EXISTS chunk_embeddings (
    collection TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    page INTEGER NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    PRIMARY KEY (collection, chunk_index)
)";

/// A stored chunk together with its similarity to a query.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
    pub page: u32,
    pub content: String,
    pub score: f32,
}

pub struct VectorIndex {
    storage: Storage,
}

impl VectorIndex {
    /// Opens the index inside the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the table cannot be created.
    pub fn open(database_path: &str) -> Result<Self> {
        let storage = Storage::open(database_path)?;
        storage.lock()?.execute(CREATE_CHUNKS_SQL, [])?;
        Ok(Self { storage })
    }

    /// Replaces everything stored under `collection` with the given chunks.
    ///
    /// Saving the same collection twice keeps only the second set of chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if chunks and embeddings differ in count or the write fails;
    /// the previous content is kept in that case.
    pub fn replace_collection(
        &self,
        collection: &str,
        chunks: &[TextChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            bail!(
                "Got {} embeddings for {} chunks of {collection}",
                embeddings.len(),
                chunks.len()
            );
        }

        let mut conn = self.storage.lock()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM chunk_embeddings WHERE collection = ?1",
            params![collection],
        )?;
        debug!("Removed {removed} previous chunks of {collection}");

        {
            let mut statement = tx.prepare(
                "INSERT INTO chunk_embeddings (collection, chunk_index, page, content, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (chunk_index, (chunk, embedding)) in chunks.iter().zip(embeddings).enumerate() {
                statement.execute(params![
                    collection,
                    i64::try_from(chunk_index)?,
                    chunk.page,
                    chunk.content,
                    encode_embedding(embedding),
                ])?;
            }
        }

        tx.commit()?;
        info!("Saved {} chunks to collection {collection}", chunks.len());
        Ok(chunks.len())
    }

    /// Number of chunks stored under `collection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.storage.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunk_embeddings WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;

        Ok(usize::try_from(count)?)
    }

    /// Returns the `limit` chunks of `collection` most similar to `query` by cosine
    /// similarity, best first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn search(&self, collection: &str, query: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        let conn = self.storage.lock()?;
        let mut stmt = conn.prepare(
            "SELECT page, content, embedding FROM chunk_embeddings WHERE collection = ?1 ORDER BY chunk_index",
        )?;

        let mut scored: Vec<ScoredChunk> = stmt
            .query_map(params![collection], |row| {
                let embedding: Vec<u8> = row.get(2)?;
                Ok(ScoredChunk {
                    page: row.get(0)?,
                    content: row.get(1)?,
                    score: cosine_similarity(query, &decode_embedding(&embedding)),
                })
            })?
            .collect::<Result<_, rusqlite::Error>>()?;

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap_or_default()))
        .collect()
}

/// Cosine similarity of two vectors; 0 when either is all zeros or they differ in length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
