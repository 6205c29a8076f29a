//! The document module loads a paper's PDF into page texts and cuts them into
//! overlapping chunks ready for embedding.

use anyhow::{Context, Result};
use log::{info, warn};
use lopdf::Document;
use std::collections::VecDeque;

use crate::constants::{CHUNK_OVERLAP, CHUNK_SIZE};
use crate::summarize::SummarizeError;

/// Separators tried in order, coarsest first. The empty separator splits into characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Text of one PDF page. Page numbers start at 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

/// A piece of a page stored in the vector index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextChunk {
    pub page: u32,
    pub content: String,
}

/// Extracts the text of every page of a PDF.
///
/// Pages whose text cannot be extracted are logged and kept empty.
///
/// # Errors
///
/// Returns an error if the bytes are not a readable PDF.
pub fn load_pdf_pages(bytes: &[u8]) -> Result<Vec<PageText>> {
    let document = Document::load_mem(bytes).context("Unable to parse PDF document")?;

    let pages: Vec<PageText> = document
        .get_pages()
        .into_keys()
        .map(|page| {
            let text = document.extract_text(&[page]).unwrap_or_else(|e| {
                warn!("Unable to extract text of page {page}: {e}");
                String::new()
            });
            PageText { page, text }
        })
        .collect();

    info!("Loaded PDF with {} pages", pages.len());
    Ok(pages)
}

/// Splits the pages into chunks and keeps those with text left after sanitizing.
///
/// # Errors
///
/// Returns [`SummarizeError::NoValidChunks`] when no chunk survives.
pub fn prepare_chunks(url: &str, pages: &[PageText]) -> Result<Vec<TextChunk>, SummarizeError> {
    let mut chunks = Vec::new();
    let mut created = 0;

    for page in pages {
        for piece in split_text(&page.text, CHUNK_SIZE, CHUNK_OVERLAP) {
            created += 1;
            let content = sanitize(&piece);
            if content.is_empty() {
                warn!("Skipping chunk of page {}: empty content", page.page);
                continue;
            }
            chunks.push(TextChunk {
                page: page.page,
                content,
            });
        }
    }

    info!("Created {created} chunks from {url}, {} valid", chunks.len());
    if chunks.is_empty() {
        return Err(SummarizeError::NoValidChunks {
            url: url.to_owned(),
        });
    }

    Ok(chunks)
}

/// Removes NUL and other control characters except line breaks and tabs.
///
/// Uses the Unicode control class, so DEL and the C1 range go too, not only `< U+0020`.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Recursively splits `text` into chunks of at most `chunk_size` characters, with
/// consecutive chunks sharing up to `overlap` characters.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    split_with(text, &SEPARATORS, chunk_size.max(1), overlap)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_with(text: &str, separators: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(separator))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or_default();
    let finer = separators.get(position + 1..).unwrap_or_default();

    let splits: Vec<&str> = if separator.is_empty() {
        text.split_inclusive(|_: char| true).collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    };

    let mut chunks = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();
    for split in splits {
        if char_len(split) < chunk_size {
            fitting.push(split);
            continue;
        }

        if !fitting.is_empty() {
            chunks.extend(merge_splits(&fitting, separator, chunk_size, overlap));
            fitting.clear();
        }
        if finer.is_empty() {
            chunks.push(split.to_owned());
        } else {
            chunks.extend(split_with(split, finer, chunk_size, overlap));
        }
    }

    if !fitting.is_empty() {
        chunks.extend(merge_splits(&fitting, separator, chunk_size, overlap));
    }

    chunks
}

/// Greedily joins small splits into chunks, carrying the tail of each chunk into the next.
fn merge_splits(splits: &[&str], separator: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut merged = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0;

    for &split in splits {
        let len = char_len(split);
        let joint = if current.is_empty() { 0 } else { separator_len };

        if total + len + joint > chunk_size && !current.is_empty() {
            push_joined(&mut merged, &current, separator);

            while total > overlap
                || (total > 0 && total + len + joint_len(&current, separator_len) > chunk_size)
            {
                let Some(dropped) = current.pop_front() else {
                    break;
                };
                total -= char_len(dropped) + if current.is_empty() { 0 } else { separator_len };
            }
        }

        current.push_back(split);
        total += len + if current.len() > 1 { separator_len } else { 0 };
    }

    push_joined(&mut merged, &current, separator);
    merged
}

fn joint_len(current: &VecDeque<&str>, separator_len: usize) -> usize {
    if current.is_empty() { 0 } else { separator_len }
}

fn push_joined(merged: &mut Vec<String>, current: &VecDeque<&str>, separator: &str) {
    let joined = current.iter().copied().collect::<Vec<_>>().join(separator);
    let joined = joined.trim();
    if !joined.is_empty() {
        merged.push(joined.to_owned());
    }
}
