//! Parsers for the on-disk corpus and question sets.
//!
//! # Corpus format
//!
//! A directory tree of text files. Each file holds many pages:
//!
//! ```text
//! [[Paris]]
//! CATEGORIES: Cities, Capitals in Europe
//! Paris is the capital of France. [tpl]cite web[/tpl]
//! ==History==
//! Founded in the 3rd century BC ...
//! ```
//!
//! # Question format
//!
//! Blocks of three non-empty lines (category, clue, answer) separated by a
//! blank line.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::model::types::{Document, Query};

static TEMPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[tpl\].*?\[/tpl\]").expect("valid template regex"));
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\[(.+?)\]\]").expect("valid title regex"));
static SECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^==+\s*(.+?)\s*==+").expect("valid section regex"));

const CATEGORIES_PREFIX: &str = "CATEGORIES:";

/// Accumulates pages while scanning one file.
#[derive(Default)]
struct PageBuilder {
    title: Option<String>,
    body: Vec<String>,
    categories: Vec<String>,
    headers: Vec<String>,
}

impl PageBuilder {
    fn finish(&mut self, out: &mut Vec<Document>) {
        if let Some(title) = self.title.take() {
            let body = std::mem::take(&mut self.body).join(" ");
            let categories = std::mem::take(&mut self.categories);
            let headers = std::mem::take(&mut self.headers);
            out.push(
                Document::new(out.len(), title, body, categories).with_section_headers(headers),
            );
        }
        self.body.clear();
        self.categories.clear();
        self.headers.clear();
    }
}

/// Parse one corpus file's text, appending pages to `out`.
///
/// Ids continue from `out.len()`.
pub fn parse_corpus_text(text: &str, out: &mut Vec<Document>) {
    let mut page = PageBuilder::default();
    for raw in text.lines() {
        let stripped = TEMPLATE_RE.replace_all(raw, "");
        let line = stripped.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = TITLE_RE.captures(line) {
            page.finish(out);
            page.title = Some(caps[1].to_string());
        } else if let Some(rest) = line.strip_prefix(CATEGORIES_PREFIX) {
            page.categories = rest.split(',').map(|c| c.trim().to_lowercase()).collect();
        } else if let Some(caps) = SECTION_RE.captures(line) {
            // Headers feed their own feature, never the body.
            if page.title.is_some() {
                page.headers.push(caps[1].to_string());
            }
        } else if page.title.is_some() {
            page.body.push(line.to_string());
        }
    }
    page.finish(out);
}

/// Walk `dir` (sorted, recursive) and parse every file into documents.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    let mut files = 0usize;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk corpus dir {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = fs::read(entry.path())
            .with_context(|| format!("read corpus file {}", entry.path().display()))?;
        let text = String::from_utf8_lossy(&bytes);
        let before = documents.len();
        parse_corpus_text(&text, &mut documents);
        files += 1;
        debug!(
            path = %entry.path().display(),
            pages = documents.len() - before,
            "parsed corpus file"
        );
    }
    info!(files, documents = documents.len(), "Loaded corpus");
    Ok(documents)
}

fn flush_block(block: &mut Vec<&str>, queries: &mut Vec<Query>) {
    match block.as_slice() {
        [] => {}
        [category, clue, answer] => {
            queries.push(Query::new(category, *clue).with_expected(*answer));
        }
        other => warn!(
            lines = other.len(),
            first = other[0],
            "skipping malformed question block"
        ),
    }
    block.clear();
}

/// Parse a question set.
pub fn parse_questions(text: &str) -> Vec<Query> {
    let mut queries = Vec::new();
    let mut block: Vec<&str> = Vec::with_capacity(3);
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            flush_block(&mut block, &mut queries);
        } else {
            block.push(line);
        }
    }
    flush_block(&mut block, &mut queries);
    queries
}

/// Read and parse a question file.
pub fn load_questions(path: &Path) -> Result<Vec<Query>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read questions file {}", path.display()))?;
    let queries = parse_questions(&text);
    info!(count = queries.len(), path = %path.display(), "Loaded queries");
    Ok(queries)
}
