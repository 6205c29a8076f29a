//! The summarize module turns a paper's PDF into five narrative sections: the PDF is
//! chunked into a vector index keyed by its URL, the chat model answers a fixed
//! analytical question over the retrieved chunks, and a formatter model with a
//! structured output schema splits the answer into sections.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use llm::LLMProvider;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::{ChatMessage, ChatProvider, StructuredOutputFormat};
use llm::embedding::EmbeddingProvider;
use log::{debug, error, info};
use once_cell::sync::Lazy;
use rate_guard::{RateLimit, StdTokenBucket, TokenBucketBuilder};
use regex::Regex;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::constants::{
    ANALYSIS_QUESTION, CODE_FENCE_STRIPPER, FORMATTER_SYSTEM_PROMPT, FORMATTER_USER_TEMPLATE,
    RETRIEVAL_PROMPT_TEMPLATE, RETRIEVAL_TOP_K, SUMMARY_SCHEMA, THINK_STRIPPER,
};
use crate::document::{PageText, load_pdf_pages, prepare_chunks};
use crate::fetch::Fetcher;
use crate::index::VectorIndex;
use crate::paper::PaperSummary;

static THINK_STRIPPER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(THINK_STRIPPER).expect("Failed to compile THINK_STRIPPER regex"));

static CODE_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(CODE_FENCE_STRIPPER).expect("Failed to compile CODE_FENCE_STRIPPER regex")
});

/// Failures of the summarizer that callers may want to tell apart.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("No valid text chunks found in {url}")]
    NoValidChunks { url: String },
    #[error("Nothing is indexed for {url}")]
    EmptyCollection { url: String },
    #[error("Formatter returned a malformed summary for {url}: {source}")]
    MalformedSummary {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Produces summaries for PDF URLs. Constructed once per run and handed to the pipeline.
#[async_trait(?Send)]
pub trait Summarizer {
    /// Indexes the PDF at `url`, replacing whatever was indexed for it before.
    ///
    /// # Errors
    ///
    /// Returns an error if the PDF cannot be loaded, has no usable text, or cannot be indexed.
    async fn save(&self, url: &str) -> Result<()>;

    /// Generates the five summary sections for a previously saved PDF.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval or either model call fails.
    async fn create_summary(&self, url: &str) -> Result<PaperSummary>;
}

/// Models used by [`RagSummarizer`].
pub struct SummaryModels {
    /// Answers the analytical question over retrieved chunks.
    pub chat: Box<dyn ChatProvider>,
    /// Reformats the answer into sections; expected to carry the summary schema.
    pub formatter: Box<dyn ChatProvider>,
    pub embedder: Box<dyn EmbeddingProvider>,
}

/// Retrieval-augmented summarizer over a SQLite vector index.
pub struct RagSummarizer {
    fetcher: Box<dyn Fetcher>,
    index: VectorIndex,
    models: SummaryModels,
    rate_limiter: Option<StdTokenBucket>,
}

impl RagSummarizer {
    /// # Arguments
    ///
    /// * `fetcher` - Used to download PDFs
    /// * `index` - Vector index the chunks are stored in
    /// * `models` - Chat, formatter and embedding models
    /// * `rpm` - Rate limit of chat requests per minute (default: no limit)
    pub fn new(
        fetcher: Box<dyn Fetcher>,
        index: VectorIndex,
        models: SummaryModels,
        rpm: Option<u32>,
    ) -> Self {
        Self {
            fetcher,
            index,
            models,
            rate_limiter: rpm.and_then(rate_limiter),
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Chunks, embeds and stores the pages under the `url` collection.
    ///
    /// Returns the number of stored chunks.
    ///
    /// # Errors
    ///
    /// Returns [`SummarizeError::NoValidChunks`] before touching the index when the pages
    /// hold no usable text, or an error if embedding or the index write fails.
    pub async fn index_pages(&self, url: &str, pages: &[PageText]) -> Result<usize> {
        let chunks = prepare_chunks(url, pages)?;

        let texts = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let embeddings = self.embed(texts).await?;

        self.index.replace_collection(url, &chunks, &embeddings)
    }

    /// Answers `question` from the chunks indexed under `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is indexed for `url` or a model call fails.
    pub async fn query(&self, url: &str, question: &str) -> Result<String> {
        info!("Querying source: {url}");
        let question_embedding = self
            .embed(vec![question.to_owned()])
            .await?
            .into_iter()
            .next()
            .context("Embedding model returned no vector for the question")?;

        let retrieved = self
            .index
            .search(url, &question_embedding, RETRIEVAL_TOP_K)?;
        if retrieved.is_empty() {
            return Err(SummarizeError::EmptyCollection {
                url: url.to_owned(),
            }
            .into());
        }
        debug!("Retrieved {} chunks for {url}", retrieved.len());

        let context = retrieved
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = RETRIEVAL_PROMPT_TEMPLATE
            .replace("{context}", &context)
            .replace("{question}", question);

        let answer = self.chat(self.models.chat.as_ref(), prompt).await?;
        info!("Retrieved answer for query: {question}");
        Ok(answer)
    }

    /// Splits a narrative summary into the five sections with the formatter model.
    ///
    /// # Errors
    ///
    /// Returns an error if the model call fails or its answer does not match the schema.
    pub async fn format_summary(&self, url: &str, narrative: &str) -> Result<PaperSummary> {
        let prompt = FORMATTER_USER_TEMPLATE.replace("{summary}", narrative);
        let response = self.chat(self.models.formatter.as_ref(), prompt).await?;

        Ok(parse_summary(url, &response)?)
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let embeddings = self
            .models
            .embedder
            .embed(texts)
            .await
            .map_err(|err| anyhow!("Embedding error: {err}."))?;

        if embeddings.len() != expected {
            return Err(anyhow!(
                "Embedding model returned {} vectors for {expected} texts",
                embeddings.len()
            ));
        }

        Ok(embeddings)
    }

    async fn chat(&self, model: &dyn ChatProvider, prompt: String) -> Result<String> {
        if let Some(limiter) = &self.rate_limiter {
            while limiter.try_acquire(1).is_err() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        let messages = vec![ChatMessage::user().content(prompt).build()];
        let response = model
            .chat(&messages)
            .await
            .map_err(|err| anyhow!("LLM error: {err}."))?
            .to_string();

        Ok(THINK_STRIPPER_REGEX
            .replace_all(&response, "")
            .trim()
            .to_owned())
    }
}

#[async_trait(?Send)]
impl Summarizer for RagSummarizer {
    async fn save(&self, url: &str) -> Result<()> {
        info!("Starting to save document from URL: {url}");
        let saved: Result<usize> = async {
            let bytes = self.fetcher.fetch_bytes(url).await?;
            let pages = load_pdf_pages(&bytes)?;
            self.index_pages(url, &pages).await
        }
        .await;

        match saved {
            Ok(count) => {
                info!("Saved {count} chunks of {url}");
                Ok(())
            }
            Err(e) => {
                error!("Error saving document from {url}: {e}");
                Err(e)
            }
        }
    }

    async fn create_summary(&self, url: &str) -> Result<PaperSummary> {
        info!("Creating summary for document: {url}");
        let narrative = self.query(url, ANALYSIS_QUESTION).await?;
        let summary = self.format_summary(url, &narrative).await?;
        info!("Created formatted summary for {url}");
        Ok(summary)
    }
}

/// Reads the formatter's JSON answer, tolerating a surrounding code fence.
///
/// # Errors
///
/// Returns [`SummarizeError::MalformedSummary`] if the answer is not a summary object.
pub fn parse_summary(url: &str, response: &str) -> Result<PaperSummary, SummarizeError> {
    let stripped = THINK_STRIPPER_REGEX.replace_all(response, "");
    let trimmed = stripped.trim();
    let json = CODE_FENCE_REGEX
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
        .map_or(trimmed, |body| body.as_str());

    serde_json::from_str(json).map_err(|source| SummarizeError::MalformedSummary {
        url: url.to_owned(),
        source,
    })
}

/// Structured output format constraining the formatter to the five summary fields.
///
/// # Errors
///
/// Returns an error if the built-in schema cannot be read.
pub fn summary_output_format() -> Result<StructuredOutputFormat> {
    serde_json::from_str(SUMMARY_SCHEMA).context("Invalid built-in summary schema")
}

/// Creates an LLM builder from a model URL of the form `backend://model`, e.g.
/// `groq://llama-3.3-70b-versatile` or `ollama://llama3:8b` (the tag goes into the user
/// part: `ollama://8b@llama3`).
///
/// # Errors
///
/// Returns an error if the URL or its backend is invalid.
pub fn llm_builder(model: &str, api_key: Option<&str>) -> Result<LLMBuilder> {
    let model_url = Url::parse(model).map_err(|e| anyhow!("Invalid model URL {model}: {e}"))?;
    let builder = LLMBuilder::new()
        .backend(
            LLMBackend::from_str(model_url.scheme())
                .map_err(|e| anyhow!("Invalid LLM backend: {}", e))?,
        )
        .model(
            [
                model_url
                    .host_str()
                    .context("Specify model name as host URL.")?,
                model_url.username(),
            ]
            .iter()
            .filter(|x| !x.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(":"),
        );

    Ok(match api_key {
        Some(api_key) => builder.api_key(api_key),
        None => builder,
    })
}

/// Builds the formatter model: the given builder with the formatter system prompt and
/// the summary schema applied.
///
/// # Errors
///
/// Returns an error if the model cannot be built.
pub fn build_formatter(builder: LLMBuilder) -> Result<Box<dyn LLMProvider>> {
    builder
        .system(FORMATTER_SYSTEM_PROMPT)
        .schema(summary_output_format()?)
        .build()
        .map_err(|e| anyhow!("Failed to build formatter model: {}", e))
}

fn rate_limiter(rpm: u32) -> Option<StdTokenBucket> {
    let capacity = u64::from(rpm.max(1));
    let refill_interval = Duration::from_secs_f64(60.0 / capacity as f64);

    TokenBucketBuilder::builder()
        .capacity(capacity)
        .refill_amount(1_u64)
        .refill_every(refill_interval)
        .with_time(rate_guard::StdTimeSource::new())
        .with_precision::<rate_guard::Nanos>()
        .build()
        .ok()
}
