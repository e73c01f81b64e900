//! Core domain types for award search.
//!
//! Outward-facing shapes serialize with camelCase keys so the HTTP route layer
//! can forward them verbatim as JSON.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum characters of body text kept per page.
pub const CONTENT_CHAR_LIMIT: usize = 5_000;

/// Maximum characters in a citation snippet.
pub const SNIPPET_CHAR_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper used to correlate one search across log lines (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a new time-sortable request identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Query intent / search plan
// ---------------------------------------------------------------------------

/// The kind of question being asked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Category,
    Eligibility,
    Pricing,
    Deadline,
    Process,
    Comparison,
    #[default]
    General,
}

impl IntentType {
    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Eligibility => "eligibility",
            Self::Pricing => "pricing",
            Self::Deadline => "deadline",
            Self::Process => "process",
            Self::Comparison => "comparison",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified intent of one query. Produced once per query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIntent {
    #[serde(rename = "type")]
    pub kind: IntentType,
    pub sub_questions: Vec<String>,
}

/// Advisory scheduling hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Retrieval plan for one query. Built fresh per query; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPlan {
    pub intent: QueryIntent,
    pub keywords: BTreeSet<String>,
    /// Deduplicated, in generation order.
    pub target_urls: Vec<String>,
    pub requires_comparison: bool,
    pub entities: Vec<String>,
    pub priority: Priority,
    /// Subset of `target_urls` already fresh in the cache.
    pub cached_urls: Vec<String>,
}

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// A table recovered from a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// What an extracted entity denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Award,
    Category,
    Date,
    Price,
}

/// A heuristically extracted entity with surrounding text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntity {
    #[serde(rename = "type")]
    pub kind: EntityType,
    pub value: String,
    pub context: String,
}

/// Retrieval metadata for a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub retrieved_at: DateTime<Utc>,
    pub content_type: String,
    /// Link distance from the seed URL.
    pub depth: u32,
}

/// A fetched and normalized page. Identity is the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub title: String,
    /// Whitespace-normalized body text, at most [`CONTENT_CHAR_LIMIT`] characters.
    pub content: String,
    pub headings: Vec<String>,
    pub tables: Vec<PageTable>,
    pub entities: Vec<PageEntity>,
    pub metadata: PageMetadata,
}

impl PageRecord {
    /// Whether the page carries any structured signal (headings or tables).
    pub fn has_structure(&self) -> bool {
        !self.headings.is_empty() || !self.tables.is_empty()
    }
}

/// A cached page and its freshness window. `expires_at = cached_at + ttl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub url: String,
    pub data: PageRecord,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Stamp a page with a freshness window starting now.
    pub fn new(url: impl Into<String>, data: PageRecord, ttl: chrono::Duration) -> Self {
        let cached_at = Utc::now();
        Self {
            url: url.into(),
            data,
            cached_at,
            expires_at: cached_at + ttl,
        }
    }

    /// Entries past `expires_at` are treated as absent.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Answers and citations
// ---------------------------------------------------------------------------

/// How much the answer can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A source reference attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
    /// At most [`SNIPPET_CHAR_LIMIT`] characters.
    pub snippet: String,
}

impl Citation {
    /// Build a citation from a page, clipping the snippet.
    pub fn from_page(page: &PageRecord) -> Self {
        Self {
            url: page.url.clone(),
            title: page.title.clone(),
            snippet: truncate_chars(&page.content, SNIPPET_CHAR_LIMIT),
        }
    }
}

/// Synthesizer output, before attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: Confidence,
    pub sources: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_info: Option<Vec<String>>,
}

/// Answer text with inline markers and a footnote block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

// ---------------------------------------------------------------------------
// AwardSearchResult
// ---------------------------------------------------------------------------

/// Machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    QueueFull,
    InternalError,
}

/// User-safe failure description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchError {
    pub code: ErrorCode,
    pub message: String,
}

impl SearchError {
    /// Service at capacity; retry later.
    pub fn queue_full() -> Self {
        Self {
            code: ErrorCode::QueueFull,
            message: "The search service is at capacity. Please try again shortly.".into(),
        }
    }

    /// Generic failure; detail stays in the logs.
    pub fn internal() -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: "An error occurred while searching. Please try again later.".into(),
        }
    }
}

/// Telemetry attached to every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub request_id: RequestId,
    pub cache_hit: bool,
    pub response_time_ms: u64,
    pub sources_used: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_intent: Option<IntentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_info: Vec<String>,
}

/// Outward-facing result of one search. Always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwardSearchResult {
    pub success: bool,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub metadata: SearchMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SearchError>,
}

impl AwardSearchResult {
    /// A failed result with empty answer and the given error.
    pub fn failure(error: SearchError, request_id: RequestId, response_time_ms: u64) -> Self {
        Self {
            success: false,
            answer: String::new(),
            citations: Vec::new(),
            metadata: SearchMetadata {
                request_id,
                cache_hit: false,
                response_time_ms,
                sources_used: 0,
                query_intent: None,
                confidence: None,
                missing_info: Vec::new(),
            },
            error: Some(error),
        }
    }

    /// Error code, if the search failed.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
