//! Answer synthesis from retrieved pages.
//!
//! Uses the LLM when available; on any LLM failure it assembles matching
//! sentences from the sources instead. Also flags missing information,
//! structures complex answers, and assigns a confidence tier.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, instrument, warn};

use awardsearch_shared::{
    AwardSearchError, Citation, Confidence, PageRecord, PageTable, Result, SynthesizedAnswer,
    truncate_chars,
};

use crate::llm::{ChatCompletion, ChatMessage, ChatRequest};
use crate::text::{is_heading_line, is_stop_word, words};

/// Per-source content excerpt sent to the LLM.
const PROMPT_EXCERPT_CHARS: usize = 2_000;
/// Body length a page needs to count as substantial.
const SUBSTANTIAL_CONTENT_CHARS: usize = 200;
const MAX_EXCERPTS_PER_PAGE: usize = 5;
const TABLE_PREVIEW_ROWS: usize = 3;
const COMPLEX_QUERY_WORDS: usize = 15;

pub(crate) const NO_SOURCES_ANSWER: &str = "I could not find information about this in the \
available award program sources. Please try rephrasing the question or check the official \
program website.";

pub(crate) const FALLBACK_PREAMBLE: &str =
    "The AI summary is unavailable, so here is the relevant raw data found in the sources:";

const FALLBACK_CLOSING: &str = "Note: this answer is a raw-data fallback assembled directly from \
the source pages and may be incomplete.";

pub(crate) const MISSING_CONTENT: &str = "The sources contain little substantive body content.";
pub(crate) const MISSING_STRUCTURE: &str =
    "The sources lack structured information (no headings or tables).";

const SYSTEM_PROMPT: &str = "You answer questions about business award programs using ONLY the \
sources provided. Do not use outside knowledge. Do not add citation markers such as [1]; \
citations are added separately. If the sources do not fully answer the question, say clearly \
which information is missing. Be concise and factual.";

static COMPARISON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:compare|comparison|difference|differences|versus|vs\.?|which is better|which one)\b")
        .expect("valid regex")
});

/// Bracketed numeric markers the model may invent despite instructions.
static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s?\[\d+(?:\s*,\s*\d+)*\]").expect("valid regex"));

static SENTENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?]?").expect("valid regex"));

/// Turns pages into a prose answer.
pub struct AnswerSynthesizer {
    llm: Option<Arc<dyn ChatCompletion>>,
    temperature: f32,
    max_tokens: u32,
}

impl AnswerSynthesizer {
    pub fn new(llm: Option<Arc<dyn ChatCompletion>>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            llm,
            temperature,
            max_tokens,
        }
    }

    /// Synthesize an answer to `query` from `pages`. Never fails.
    #[instrument(skip_all, fields(pages = pages.len()))]
    pub async fn synthesize(&self, query: &str, pages: &[PageRecord]) -> SynthesizedAnswer {
        if pages.is_empty() {
            return SynthesizedAnswer {
                answer: NO_SOURCES_ANSWER.to_string(),
                citations: Vec::new(),
                confidence: Confidence::Low,
                sources: 0,
                missing_info: None,
            };
        }

        let missing = detect_missing_info(pages);

        let (body, used_llm) = match self.generate(query, pages).await {
            Ok(text) => (text, true),
            Err(e) => {
                warn!(error = %e, "llm synthesis failed, using raw-data fallback");
                (fallback_answer(query, pages), false)
            }
        };

        let answer = if is_complex_query(query) && !is_structured(&body) {
            structure_answer(&body, &missing)
        } else {
            body
        };

        let mut confidence = confidence(pages.len(), missing.len());
        if !used_llm {
            confidence = confidence.min(Confidence::Medium);
        }

        debug!(?confidence, used_llm, missing = missing.len(), "answer synthesized");

        SynthesizedAnswer {
            answer,
            citations: pages.iter().map(Citation::from_page).collect(),
            confidence,
            sources: pages.len(),
            missing_info: (!missing.is_empty()).then_some(missing),
        }
    }

    async fn generate(&self, query: &str, pages: &[PageRecord]) -> Result<String> {
        let Some(llm) = &self.llm else {
            return Err(AwardSearchError::Llm("no LLM configured".into()));
        };

        let text = llm
            .chat_completion(ChatRequest {
                messages: vec![
                    ChatMessage::system(SYSTEM_PROMPT),
                    ChatMessage::user(build_prompt(query, pages)),
                ],
                temperature: Some(self.temperature),
                max_tokens: Some(self.max_tokens),
                ..ChatRequest::default()
            })
            .await?;

        Ok(MARKER_RE.replace_all(text.trim(), "").into_owned())
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

fn build_prompt(query: &str, pages: &[PageRecord]) -> String {
    let mut prompt = format!("Question: {query}\n\nSources:\n");
    for (i, page) in pages.iter().enumerate() {
        let _ = write!(prompt, "\n[Source {}] {}\nURL: {}\n", i + 1, page.title, page.url);
        if !page.headings.is_empty() {
            let _ = writeln!(prompt, "Headings: {}", page.headings.join("; "));
        }
        let _ = writeln!(
            prompt,
            "Content:\n{}",
            truncate_chars(&page.content, PROMPT_EXCERPT_CHARS)
        );
        for table in &page.tables {
            prompt.push_str(&summarize_table(table));
        }
    }
    prompt.push_str("\nAnswer the question using only these sources.");
    prompt
}

fn summarize_table(table: &PageTable) -> String {
    let mut out = format!(
        "Table ({} rows): {}\n",
        table.rows.len(),
        table.headers.join(" | ")
    );
    for row in table.rows.iter().take(TABLE_PREVIEW_ROWS) {
        let _ = writeln!(out, "  {}", row.join(" | "));
    }
    out
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// Sentences from each page that mention enough query terms.
fn fallback_answer(query: &str, pages: &[PageRecord]) -> String {
    let terms: HashSet<String> = words(query)
        .into_iter()
        .filter(|w| w.chars().count() >= 3 && !is_stop_word(w))
        .collect();
    let needed = if terms.len() <= 1 { 1 } else { 2 };

    let mut out = String::from(FALLBACK_PREAMBLE);
    out.push_str("\n\n");

    for page in pages {
        let excerpts: Vec<&str> = SENTENCE_RE
            .find_iter(&page.content)
            .map(|m| m.as_str().trim())
            .filter(|s| {
                let sentence_words: HashSet<String> = words(s).into_iter().collect();
                terms.iter().filter(|t| sentence_words.contains(*t)).count() >= needed
            })
            .take(MAX_EXCERPTS_PER_PAGE)
            .collect();

        let _ = writeln!(out, "From {}:", page.title);
        if excerpts.is_empty() {
            let _ = writeln!(out, "- {}", truncate_chars(page.content.trim(), SUBSTANTIAL_CONTENT_CHARS));
        } else {
            for excerpt in excerpts {
                let _ = writeln!(out, "- {excerpt}");
            }
        }
        out.push('\n');
    }

    out.push_str(FALLBACK_CLOSING);
    out
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

fn detect_missing_info(pages: &[PageRecord]) -> Vec<String> {
    let mut missing = Vec::new();
    if !pages
        .iter()
        .any(|p| p.content.chars().count() > SUBSTANTIAL_CONTENT_CHARS)
    {
        missing.push(MISSING_CONTENT.to_string());
    }
    if !pages.iter().any(PageRecord::has_structure) {
        missing.push(MISSING_STRUCTURE.to_string());
    }
    missing
}

fn is_complex_query(query: &str) -> bool {
    let lowered = query.to_lowercase();
    query.matches('?').count() > 1
        || lowered.contains(" and ")
        || lowered.contains(" or ")
        || COMPARISON_RE.is_match(&lowered)
        || query.split_whitespace().count() > COMPLEX_QUERY_WORDS
}

fn is_structured(answer: &str) -> bool {
    answer.lines().any(is_heading_line)
}

/// Summary + details split, plus a missing-information section.
fn structure_answer(body: &str, missing: &[String]) -> String {
    let paragraphs: Vec<&str> = body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let (summary, details) = match paragraphs.split_first() {
        Some((first, rest)) if !rest.is_empty() => ((*first).to_string(), rest.join("\n\n")),
        _ => {
            let first_sentence = SENTENCE_RE
                .find(body)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            (first_sentence, body.trim().to_string())
        }
    };

    let mut out = format!("## Summary\n\n{summary}\n\n## Detailed Information\n\n{details}");
    if !missing.is_empty() {
        out.push_str("\n\n## Missing Information\n\n");
        let list: Vec<String> = missing.iter().map(|m| format!("- {m}")).collect();
        out.push_str(&list.join("\n"));
    }
    out
}

fn confidence(sources: usize, flags: usize) -> Confidence {
    if sources >= 3 && flags == 0 {
        Confidence::High
    } else if sources >= 2 && flags <= 1 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}
