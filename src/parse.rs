//! The parse module turns the index page and the per-paper detail pages into
//! `PaperRecord`s. Every block of a page is read by its own function so a markup
//! change only touches one place.

use anyhow::{Context, Result};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::constants::{
    ABSTRACT_BLOCK_SELECTOR, AUTHOR_SPAN_SELECTOR, BACKGROUND_URL_PATTERN, CARD_SELECTOR,
    IMAGE_BLOCK_SELECTOR, TITLE_BLOCK_SELECTOR, TITLE_LINK_SELECTOR,
};
use crate::fetch::Fetcher;
use crate::paper::PaperRecord;

fn selector(query: &str) -> Selector {
    Selector::parse(query).unwrap_or_else(|e| panic!("Invalid built-in selector {query}: {e}"))
}

static CARD: Lazy<Selector> = Lazy::new(|| selector(CARD_SELECTOR));
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| selector(TITLE_LINK_SELECTOR));
static IMAGE_BLOCK: Lazy<Selector> = Lazy::new(|| selector(IMAGE_BLOCK_SELECTOR));
static TITLE_BLOCK: Lazy<Selector> = Lazy::new(|| selector(TITLE_BLOCK_SELECTOR));
static AUTHOR_SPAN: Lazy<Selector> = Lazy::new(|| selector(AUTHOR_SPAN_SELECTOR));
static ABSTRACT_BLOCK: Lazy<Selector> = Lazy::new(|| selector(ABSTRACT_BLOCK_SELECTOR));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| selector("p"));
static SPAN: Lazy<Selector> = Lazy::new(|| selector("span"));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a"));
static DIV: Lazy<Selector> = Lazy::new(|| selector("div"));

static BACKGROUND_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(BACKGROUND_URL_PATTERN).expect("Failed to compile BACKGROUND_URL_PATTERN regex")
});

/// Returns the HTML of every paper card on the index page, in document order.
///
/// A page without cards yields an empty list.
pub fn parse_homepage(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let cards: Vec<String> = document.select(&CARD).map(|card| card.html()).collect();
    info!("Found {} paper cards on the index page", cards.len());
    cards
}

/// Builds a paper record from a card fragment and the detail page it links to.
///
/// # Arguments
///
/// * `fragment` - HTML of a single card from the index page
/// * `base_url` - Site root the card's relative links are appended to
/// * `fetcher` - Used to download the detail page
///
/// # Errors
///
/// Returns an error if:
/// * The card has no title link
/// * The detail page cannot be fetched
pub async fn extract_paper(
    fragment: &str,
    base_url: &str,
    fetcher: &dyn Fetcher,
) -> Result<PaperRecord> {
    info!("Starting processing of a paper card");
    let mut paper = parse_card(fragment, base_url)?;

    let detail_html = fetcher
        .fetch_text(&paper.url, None)
        .await
        .with_context(|| format!("Unable to fetch detail page {}", paper.url))?;
    apply_detail_page(&mut paper, &detail_html);

    info!("Finished processing paper: {}", paper.url);
    Ok(paper)
}

/// Reads the title, detail URL, code link and tags of an index card.
///
/// # Errors
///
/// Returns an error if the card has no title link.
pub fn parse_card(fragment: &str, base_url: &str) -> Result<PaperRecord> {
    let card = Html::parse_fragment(fragment);
    let root = card.root_element();

    let (topic, href) = title_link(root).context("Paper card has no title link")?;

    Ok(PaperRecord {
        topic,
        url: format!("{base_url}{href}"),
        github: code_link(root),
        tags: classless_spans(root),
        ..Default::default()
    })
}

/// Fills the image, date, authors, abstract and PDF link from a detail page.
/// Blocks missing from the page leave their fields untouched.
pub fn apply_detail_page(paper: &mut PaperRecord, html: &str) {
    let page = Html::parse_document(html);
    let root = page.root_element();

    if let Some(image) = image_url(root) {
        paper.image = Some(image);
    }

    if let Some((date, authors)) = date_and_authors(root) {
        paper.date = Some(date);
        paper.authors = authors;
    }

    if let Some((abstract_text, pdf)) = abstract_and_pdf(root) {
        paper.abstract_text = Some(abstract_text);
        paper.pdf = Some(pdf);
    }

    debug!("Detail page of {} parsed: {paper:?}", paper.url);
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

fn first<'a>(scope: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    scope.select(selector).next()
}

fn title_link(card: ElementRef<'_>) -> Option<(String, String)> {
    let link = first(card, &TITLE_LINK)?;
    let href = link.value().attr("href")?;
    Some((element_text(link), href.to_owned()))
}

/// The `href` of the first link in the first span of the card's first paragraph.
fn code_link(card: ElementRef<'_>) -> Option<String> {
    let paragraph = first(card, &PARAGRAPH)?;
    let span = first(paragraph, &SPAN)?;
    let link = first(span, &LINK)?;
    link.value().attr("href").map(str::to_owned)
}

/// Tag labels of a card.
///
/// The index marks tags only by leaving their `span` unstyled: every `span` without
/// a `class` attribute is taken as a tag, styled spans are UI chrome. Labels are
/// trimmed, so indentation inside a span never reaches the stored tags.
pub fn classless_spans(card: ElementRef<'_>) -> Vec<String> {
    card.select(&SPAN)
        .filter(|span| span.value().attr("class").is_none())
        .map(|span| element_text(span).trim().to_owned())
        .collect()
}

/// The background image URL inside the inline style of the image block.
fn image_url(page: ElementRef<'_>) -> Option<String> {
    let block = first(page, &IMAGE_BLOCK)?;
    let link = first(block, &LINK)?;
    let style = first(link, &DIV)?.value().attr("style").unwrap_or_default();

    BACKGROUND_URL_REGEX
        .captures(style)
        .and_then(|captures| captures.get(1))
        .map(|url| url.as_str().to_owned())
}

/// The title block lists the date as its first `author-span`, then the authors.
fn date_and_authors(page: ElementRef<'_>) -> Option<(String, Vec<String>)> {
    let block = first(page, &TITLE_BLOCK)?;
    let mut spans = block
        .select(&AUTHOR_SPAN)
        .map(|span| element_text(span).trim().to_owned());

    let date = spans.next()?;
    Some((date, spans.collect()))
}

fn abstract_and_pdf(page: ElementRef<'_>) -> Option<(String, String)> {
    let block = first(page, &ABSTRACT_BLOCK)?;

    let abstract_text = first(block, &PARAGRAPH)
        .map(|paragraph| element_text(paragraph).trim().to_owned())
        .unwrap_or_default();
    let pdf = first(block, &LINK)
        .and_then(|link| link.value().attr("href"))
        .map(str::to_owned)
        .unwrap_or_default();

    Some((abstract_text, pdf))
}
