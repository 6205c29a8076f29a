use crate::pipeline_extras::{
    StubEmbedder, StubFetcher, StubLlmProvider, temp_database, text_pdf,
};
use papers_digest::document::PageText;
use papers_digest::index::VectorIndex;
use papers_digest::summarize::{
    SummarizeError, SummaryModels, parse_summary, summary_output_format,
};
use papers_digest::{PaperSummary, RagSummarizer, Summarizer};
use spectral::{assert_that, boolean::BooleanAssertions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

mod pipeline_extras;

const PDF_URL: &str = "https://arxiv.org/pdf/2303.00001v1.pdf";

const FORMATTED: &str = r#"{"introduction": "Intro", "methodology": "Method", "limitations": "Limits", "results": "Results", "conclusions": "Conclusions"}"#;

fn expected_summary() -> PaperSummary {
    PaperSummary {
        introduction: "Intro".to_owned(),
        methodology: "Method".to_owned(),
        limitations: "Limits".to_owned(),
        results: "Results".to_owned(),
        conclusions: "Conclusions".to_owned(),
    }
}

struct Harness {
    summarizer: RagSummarizer,
    embed_calls: Arc<AtomicUsize>,
    chat_prompts: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

fn harness(formatter_response: &str) -> Harness {
    harness_with(StubFetcher::new(), formatter_response)
}

fn harness_with(fetcher: StubFetcher, formatter_response: &str) -> Harness {
    let (dir, path) = temp_database();
    let chat = StubLlmProvider::new("<think>Reading</think>The paper proposes a method.".to_owned());
    let chat_prompts = Arc::clone(&chat.prompts);
    let embedder = StubEmbedder::default();
    let embed_calls = Arc::clone(&embedder.calls);

    let summarizer = RagSummarizer::new(
        Box::new(fetcher),
        VectorIndex::open(&path).expect("Expected an open index."),
        SummaryModels {
            chat: Box::new(chat),
            formatter: Box::new(StubLlmProvider::new(formatter_response.to_owned())),
            embedder: Box::new(embedder),
        },
        None,
    );

    Harness {
        summarizer,
        embed_calls,
        chat_prompts,
        _dir: dir,
    }
}

fn pages(texts: &[&str]) -> Vec<PageText> {
    texts
        .iter()
        .zip(1..)
        .map(|(text, page)| PageText {
            page,
            text: (*text).to_owned(),
        })
        .collect()
}

#[test]
fn plain_json_summary_is_parsed() {
    assert_that(&parse_summary(PDF_URL, FORMATTED).ok()).is_equal_to(Some(expected_summary()));
}

#[test]
fn fenced_json_summary_is_parsed() {
    let response = format!("```json\n{FORMATTED}\n```");

    assert_that(&parse_summary(PDF_URL, &response).ok()).is_equal_to(Some(expected_summary()));
}

#[test]
fn think_tags_are_ignored() {
    let response = format!("<think>\nLet me format this.\n</think>\n{FORMATTED}");

    assert_that(&parse_summary(PDF_URL, &response).ok()).is_equal_to(Some(expected_summary()));
}

#[test]
fn capitalized_keys_are_accepted() {
    let response = r#"{"Introduction": "Intro", "Methodology": "Method", "Limitations": "Limits", "Results": "Results", "Conclusions": "Conclusions"}"#;

    assert_that(&parse_summary(PDF_URL, response).ok()).is_equal_to(Some(expected_summary()));
}

#[test]
fn incomplete_summary_is_malformed() {
    let result = parse_summary(PDF_URL, r#"{"introduction": "Intro"}"#);

    assert_that(&matches!(result, Err(SummarizeError::MalformedSummary { .. }))).is_true();
}

#[test]
fn prose_summary_is_malformed() {
    let result = parse_summary(PDF_URL, "Here is your summary: it is good.");

    assert_that(&matches!(result, Err(SummarizeError::MalformedSummary { .. }))).is_true();
}

#[test]
fn summary_schema_is_valid() {
    let format = summary_output_format().expect("Expected a valid schema.");

    assert_that(&format.name).is_equal_to("Summary".to_owned());
}

#[tokio::test]
async fn indexed_pages_are_summarized() {
    let harness = harness(FORMATTED);

    let stored = harness
        .summarizer
        .index_pages(PDF_URL, &pages(&["Introduction to transformers.", "Results on translation."]))
        .await
        .expect("Expected indexed pages.");
    let summary = harness
        .summarizer
        .create_summary(PDF_URL)
        .await
        .expect("Expected a summary.");

    assert_that(&stored).is_equal_to(2);
    assert_that(&summary).is_equal_to(expected_summary());

    let prompts = harness.chat_prompts.lock().expect("Expected prompts.");
    assert_that(&prompts.len()).is_equal_to(1);
    let prompt = prompts.first().expect("Expected a prompt.");
    assert_that(&prompt.contains("Introduction to transformers.")).is_true();
    assert_that(&prompt.contains("Question: analyse the research paper")).is_true();
}

#[tokio::test]
async fn chat_answer_reaches_the_formatter_without_think_tags() {
    let harness = harness(FORMATTED);
    harness
        .summarizer
        .index_pages(PDF_URL, &pages(&["Some text."]))
        .await
        .expect("Expected indexed pages.");

    let answer = harness
        .summarizer
        .query(PDF_URL, "What is proposed?")
        .await
        .expect("Expected an answer.");

    assert_that(&answer).is_equal_to("The paper proposes a method.".to_owned());
}

#[tokio::test]
async fn pages_without_text_leave_the_index_untouched() {
    let harness = harness(FORMATTED);
    harness
        .summarizer
        .index_pages(PDF_URL, &pages(&["Earlier text."]))
        .await
        .expect("Expected indexed pages.");
    let calls_before = harness.embed_calls.load(Ordering::SeqCst);

    let result = harness
        .summarizer
        .index_pages(PDF_URL, &pages(&["", "\0\u{1}  "]))
        .await;

    let error = result.expect_err("Expected no valid chunks.");
    assert_that(&matches!(
        error.downcast_ref::<SummarizeError>(),
        Some(SummarizeError::NoValidChunks { .. })
    ))
    .is_true();
    assert_that(&harness.embed_calls.load(Ordering::SeqCst)).is_equal_to(calls_before);
    assert_that(&harness.summarizer.index().count(PDF_URL).expect("Expected a count."))
        .is_equal_to(1);
}

#[tokio::test]
async fn saving_again_replaces_the_collection() {
    let harness = harness(FORMATTED);
    let long_page = "Sentence about attention. ".repeat(100);

    harness
        .summarizer
        .index_pages(PDF_URL, &pages(&[long_page.as_str()]))
        .await
        .expect("Expected indexed pages.");
    let first_count = harness.summarizer.index().count(PDF_URL).expect("Expected a count.");
    harness
        .summarizer
        .index_pages(PDF_URL, &pages(&["Only one short page."]))
        .await
        .expect("Expected indexed pages.");

    assert_that(&(first_count > 1)).is_true();
    assert_that(&harness.summarizer.index().count(PDF_URL).expect("Expected a count."))
        .is_equal_to(1);
}

#[tokio::test]
async fn collections_are_kept_per_url() {
    let harness = harness(FORMATTED);

    harness
        .summarizer
        .index_pages(PDF_URL, &pages(&["First paper."]))
        .await
        .expect("Expected indexed pages.");
    harness
        .summarizer
        .index_pages("https://arxiv.org/pdf/other.pdf", &pages(&["Second paper.", "More."]))
        .await
        .expect("Expected indexed pages.");

    assert_that(&harness.summarizer.index().count(PDF_URL).expect("Expected a count."))
        .is_equal_to(1);
    assert_that(
        &harness
            .summarizer
            .index()
            .count("https://arxiv.org/pdf/other.pdf")
            .expect("Expected a count."),
    )
    .is_equal_to(2);
}

#[tokio::test]
async fn summary_of_unsaved_url_fails() {
    let harness = harness(FORMATTED);

    let error = harness
        .summarizer
        .create_summary(PDF_URL)
        .await
        .expect_err("Expected an empty collection.");

    assert_that(&matches!(
        error.downcast_ref::<SummarizeError>(),
        Some(SummarizeError::EmptyCollection { .. })
    ))
    .is_true();
    assert_that(&harness.chat_prompts.lock().expect("Expected prompts.").len()).is_equal_to(0);
}

#[tokio::test]
async fn malformed_formatter_answer_fails_the_summary() {
    let harness = harness("I cannot format this.");
    harness
        .summarizer
        .index_pages(PDF_URL, &pages(&["Some text."]))
        .await
        .expect("Expected indexed pages.");

    let result = harness.summarizer.create_summary(PDF_URL).await;

    assert_that(&result.is_err()).is_true();
}

#[tokio::test]
async fn unreachable_pdf_fails_the_save() {
    let harness = harness(FORMATTED);

    let result = harness.summarizer.save(PDF_URL).await;

    assert_that(&result.is_err()).is_true();
    assert_that(&harness.embed_calls.load(Ordering::SeqCst)).is_equal_to(0);
}

#[tokio::test]
async fn downloaded_pdf_text_is_indexed_and_summarized() {
    let fetcher = StubFetcher::new().with_file(
        PDF_URL,
        text_pdf(&["Attention replaces recurrence.", "Translation quality improves."]),
    );
    let harness = harness_with(fetcher, FORMATTED);

    harness
        .summarizer
        .save(PDF_URL)
        .await
        .expect("Expected a saved PDF.");
    let summary = harness
        .summarizer
        .create_summary(PDF_URL)
        .await
        .expect("Expected a summary.");

    let count = harness.summarizer.index().count(PDF_URL).expect("Expected a count.");
    assert_that(&(count >= 1)).is_true();
    assert_that(&summary).is_equal_to(expected_summary());

    let prompts = harness.chat_prompts.lock().expect("Expected prompts.");
    let prompt = prompts.first().expect("Expected a prompt.");
    assert_that(&prompt.contains("Attention replaces recurrence.")).is_true();
}
