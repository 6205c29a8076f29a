#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use async_trait::async_trait;
use llm::{
    chat::{ChatMessage, ChatProvider, ChatResponse, Tool},
    embedding::EmbeddingProvider,
    error::LLMError,
};
use papers_digest::fetch::Fetcher;
use papers_digest::{PaperSummary, Summarizer};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const BASE_URL: &str = "https://papers.example";

pub fn index_page(cards: &[&str]) -> String {
    let rows: String = cards
        .iter()
        .map(|card| {
            format!(
                r#"<div class="row infinite-item item paper-card">
                    <div class="col-lg-3 item-image-col"><a href="/"><div class="item-image"></div></a></div>
                    {card}
                </div>"#
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html><html><head><title>Trending Papers</title></head>
        <body><div class="container"><span class="navbar-text">Browse</span>{rows}</div></body></html>"#
    )
}

pub fn card(slug: &str, title: &str, github: &str, tags: &[&str]) -> String {
    let tags: String = tags
        .iter()
        .map(|tag| format!("<span>{tag}</span>"))
        .collect();

    format!(
        r#"<div class="col-lg-9 item-content">
            <h1><a href="/paper/{slug}">{title}</a></h1>
            <p class="author-section" style="padding-top:2px">
                <span class="author-name-text item-github-link"><a href="{github}">repo</a></span>
                <span class="item-date-pub">2 days ago</span>
            </p>
            <p class="item-strip-abstract">Short teaser.</p>
            <div class="sota"></div>
            <div class="entity-stars"><span class="badge badge-secondary"><span class="icon"></span> 1,024</span></div>
            <div class="tags">{tags}</div>
        </div>"#
    )
}

pub fn detail_page(date: &str, authors: &[&str], abstract_text: &str, pdf: Option<&str>) -> String {
    let authors: String = authors
        .iter()
        .map(|author| format!(r#" · <span class="author-span "> {author} </span>"#))
        .collect();
    let pdf = pdf
        .map(|pdf| format!(r#"<a class="badge badge-light" href="{pdf}">PDF</a>"#))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html><html><body>
        <div class="row">
            <div class="col-lg-3 item-image-col">
                <a href="/paper/x"><div class="item-image" style="background-image: url('https://img.example/thumb.jpg');"></div></a>
            </div>
        </div>
        <div class="paper-title">
            <h1>Paper</h1>
            <p><span class="author-span">{date}</span>{authors}</p>
        </div>
        <div class="paper-abstract">
            <div class="col-md-12"><p>
                {abstract_text}
            </p>{pdf}</div>
        </div>
        </body></html>"#
    )
}

/// Serves fixed pages by URL; any other URL fails like a network error.
#[derive(Default)]
pub struct StubFetcher {
    pages: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
    pub requests: RefCell<Vec<(String, Option<Duration>)>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: String) -> Self {
        self.pages.insert(url.to_owned(), html);
        self
    }

    pub fn with_file(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(url.to_owned(), bytes);
        self
    }
}

#[async_trait(?Send)]
impl Fetcher for StubFetcher {
    async fn fetch_text(&self, url: &str, timeout: Option<Duration>) -> Result<String> {
        self.requests.borrow_mut().push((url.to_owned(), timeout));
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("Connection refused: {url}"))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.borrow_mut().push((url.to_owned(), None));
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("Connection refused: {url}"))
    }
}

/// Summarizer answering from the URL alone, failing for the given URLs.
#[derive(Default)]
pub struct StubSummarizer {
    failing: HashSet<String>,
    pub saved: RefCell<Vec<String>>,
}

impl StubSummarizer {
    pub fn failing_for(urls: &[&str]) -> Self {
        Self {
            failing: urls.iter().map(|url| (*url).to_owned()).collect(),
            saved: RefCell::default(),
        }
    }
}

pub fn summary_for(url: &str) -> PaperSummary {
    PaperSummary {
        introduction: format!("Introduction of {url}"),
        methodology: "Method".to_owned(),
        limitations: "Limits".to_owned(),
        results: "Results".to_owned(),
        conclusions: "Conclusions".to_owned(),
    }
}

#[async_trait(?Send)]
impl Summarizer for StubSummarizer {
    async fn save(&self, url: &str) -> Result<()> {
        if self.failing.contains(url) {
            bail!("Unable to parse PDF document");
        }
        self.saved.borrow_mut().push(url.to_owned());
        Ok(())
    }

    async fn create_summary(&self, url: &str) -> Result<PaperSummary> {
        Ok(summary_for(url))
    }
}

pub(crate) struct StubLlmProvider {
    response_content: String,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl StubLlmProvider {
    pub fn new(response_content: String) -> Self {
        StubLlmProvider {
            response_content,
            prompts: Arc::default(),
        }
    }
}

impl ChatProvider for StubLlmProvider {
    fn chat<'life0, 'life1, 'async_trait>(
        &'life0 self,
        messages: &'life1 [ChatMessage],
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Box<dyn ChatResponse>, LLMError>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.extend(messages.iter().map(|message| message.content.clone()));
        }

        Box::pin(async move {
            #[derive(Debug)]
            struct StringResponse(String);

            impl ChatResponse for StringResponse {
                fn text(&self) -> Option<String> {
                    Some(self.0.clone())
                }

                fn tool_calls(&self) -> Option<Vec<llm::ToolCall>> {
                    panic!()
                }

                fn thinking(&self) -> Option<String> {
                    None
                }

                fn usage(&self) -> Option<llm::chat::Usage> {
                    None
                }
            }

            impl std::fmt::Display for StringResponse {
                fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(formatter, "{}", self.0)
                }
            }

            Ok(Box::new(StringResponse(self.response_content.clone())) as Box<dyn ChatResponse>)
        })
    }

    fn chat_with_tools<'life0, 'life1, 'life2, 'async_trait>(
        &'life0 self,
        _messages: &'life1 [ChatMessage],
        _tools: Option<&'life2 [Tool]>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Box<dyn ChatResponse>, LLMError>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        'life2: 'async_trait,
        Self: 'async_trait,
    {
        panic!()
    }
}

/// Embeds text as a bag of hashed words, so texts sharing words are similar.
#[derive(Default)]
pub(crate) struct StubEmbedder {
    pub calls: Arc<AtomicUsize>,
}

pub(crate) const STUB_DIMENSION: usize = 16;

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; STUB_DIMENSION];
    for word in text.split_whitespace() {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(0_usize, |hash, byte| hash.wrapping_mul(31).wrapping_add(usize::from(byte)));
        if let Some(slot) = vector.get_mut(bucket % STUB_DIMENSION) {
            *slot += 1.0;
        }
    }
    vector
}

impl EmbeddingProvider for StubEmbedder {
    fn embed<'life0, 'async_trait>(
        &'life0 self,
        input: Vec<String>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Vec<Vec<f32>>, LLMError>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(input.iter().map(|text| bag_of_words(text)).collect())
        })
    }
}

pub fn temp_database() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("Expected a temporary directory.");
    let path = dir.path().join("papers.db").to_string_lossy().into_owned();
    (dir, path)
}

/// A one-page PDF showing each line with a `Tj` operator.
pub fn text_pdf(lines: &[&str]) -> Vec<u8> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = document.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 720.into()]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
    }
    operations.push(Operation::new("ET", vec![]));
    let content = Content { operations };
    let content_id = document.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("Expected encoded content."),
    ));

    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document
        .save_to(&mut bytes)
        .expect("Expected a written PDF.");
    bytes
}
