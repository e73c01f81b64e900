//! Shared types, error model, and configuration for award search.
//!
//! This crate is the foundation depended on by all other award search crates.
//! It provides:
//! - [`AwardSearchError`]: the unified error type
//! - Domain types ([`PageRecord`], [`SearchPlan`], [`AwardSearchResult`], ...)
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheBackend, CacheConfig, CitationMode, CrawlConfig, CrawlPoliciesConfig,
    LlmConfig, ReaderConfig, RetrievalStrategy, SearchConfig, config_dir, config_file_path,
    init_config, llm_api_key, load_config, load_config_from, validate_config,
};
pub use error::{AwardSearchError, Result};
pub use types::{
    AwardSearchResult, CONTENT_CHAR_LIMIT, CacheEntry, Citation, CitedAnswer, Confidence,
    EntityType, ErrorCode, IntentType, PageEntity, PageMetadata, PageRecord, PageTable, Priority,
    QueryIntent, RequestId, SNIPPET_CHAR_LIMIT, SearchError, SearchMetadata, SearchPlan,
    SynthesizedAnswer, normalize_whitespace, truncate_chars,
};
