use std::time::Duration;

pub const DATABASE_ENV_NAME: &str = "PAPERS_DB";
pub const BASE_URL_ENV_NAME: &str = "PAPERS_BASE_URL";
pub const CHAT_MODEL_ENV_NAME: &str = "PAPERS_CHAT_MODEL";
pub const FORMAT_MODEL_ENV_NAME: &str = "PAPERS_FORMAT_MODEL";
pub const EMBED_MODEL_ENV_NAME: &str = "PAPERS_EMBED_MODEL";
pub const MODEL_API_KEY_ENV_NAME: &str = "PAPERS_MODEL_API_KEY";

pub const DEFAULT_BASE_URL: &str = "https://paperswithcode.com";

/// Timeout of the index page request. Other requests carry none.
pub const HOMEPAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra attempts for the table creation and insert tasks.
pub const TASK_RETRIES: u32 = 2;

/// Textual form of the publication date on detail pages, e.g. `15 Mar 2023`.
pub const PAPER_DATE_FORMAT: &str = "%d %b %Y";

pub const CHUNK_SIZE: usize = 1000;
pub const CHUNK_OVERLAP: usize = 200;
pub const RETRIEVAL_TOP_K: usize = 4;

pub(crate) const CARD_SELECTOR: &str = "div.col-lg-9.item-content";
pub(crate) const TITLE_LINK_SELECTOR: &str = "h1 a";
pub(crate) const IMAGE_BLOCK_SELECTOR: &str = "div.col-lg-3.item-image-col";
pub(crate) const TITLE_BLOCK_SELECTOR: &str = "div.paper-title";
pub(crate) const AUTHOR_SPAN_SELECTOR: &str = "span.author-span";
pub(crate) const ABSTRACT_BLOCK_SELECTOR: &str = "div.paper-abstract";

pub(crate) const BACKGROUND_URL_PATTERN: &str = r#"url\(['"]?(.*?)['"]?\)"#;

pub(crate) const THINK_STRIPPER: &str = r"<think>[\s\S]*</think>\s*";

pub(crate) const CODE_FENCE_STRIPPER: &str = r"^```(?:json)?\s*([\s\S]*?)\s*```$";

pub(crate) const ANALYSIS_QUESTION: &str = "analyse the research paper and generate a summary of the introduction, methodology, limitations, results, conclusions";

pub(crate) const RETRIEVAL_PROMPT_TEMPLATE: &str = r#"Use the following pieces of context to answer the question at the end. If you don't know the answer, just say that you don't know, don't try to make up an answer.

{context}

Question: {question}
Helpful Answer:"#;

pub(crate) const FORMATTER_SYSTEM_PROMPT: &str = "You are an AI research paper formatter. You will be given a snippet of research paper and you will need to format it into an introduction section, methodology, limitations, results, conclusion sections";

pub(crate) const FORMATTER_USER_TEMPLATE: &str =
    "format {summary} into the introduction, methodology, limitations, Results and Conclusion Sections";

pub(crate) const SUMMARY_SCHEMA: &str = r#"{
    "name": "Summary",
    "schema": {
        "type": "object",
        "properties": {
            "introduction": { "type": "string" },
            "methodology": { "type": "string" },
            "limitations": { "type": "string" },
            "results": { "type": "string" },
            "conclusions": { "type": "string" }
        },
        "required": ["introduction", "methodology", "limitations", "results", "conclusions"]
    }
}"#;
