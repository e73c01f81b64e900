//! Application configuration for award search.
//!
//! User config lives at `~/.awardsearch/awardsearch.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AwardSearchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "awardsearch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".awardsearch";

// ---------------------------------------------------------------------------
// Config structs (matching awardsearch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM service settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Crawl policies.
    #[serde(default)]
    pub crawl_policies: CrawlPoliciesConfig,

    /// Remote content-reader settings.
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Search pipeline settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Freshness cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model used when a request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per completion, including the first.
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// How long an open circuit rejects calls.
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_llm_base_url(),
            default_model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_llm_retries(),
            retry_base_ms: default_retry_base_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_llm_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    2_000
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown() -> u64 {
    30
}

/// `[crawl_policies]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPoliciesConfig {
    /// Link depth followed from each seed URL.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Total request budget for one fetch batch.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Politeness delay before each request.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Extra attempts for a failed page fetch.
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,

    /// Maximum concurrent HTTP requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// URL include patterns.
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// URL exclude patterns.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for CrawlPoliciesConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_requests: default_max_requests(),
            request_delay_ms: default_request_delay(),
            max_retries: default_fetch_retries(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

fn default_max_depth() -> u32 {
    1
}
fn default_max_requests() -> u32 {
    20
}
fn default_request_delay() -> u64 {
    500
}
fn default_fetch_retries() -> u32 {
    2
}
fn default_concurrency() -> u32 {
    2
}

/// `[reader]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Base URL of the text-extraction service; the page URL is appended.
    #[serde(default = "default_reader_base_url")]
    pub base_url: String,

    /// Optional env var holding a reader API key.
    #[serde(default = "default_reader_key_env")]
    pub api_key_env: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts for a failed read.
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,

    /// Delay between consecutive reads.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            base_url: default_reader_base_url(),
            api_key_env: default_reader_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_fetch_retries(),
            request_delay_ms: default_request_delay(),
        }
    }
}

fn default_reader_base_url() -> String {
    "https://r.jina.ai".into()
}
fn default_reader_key_env() -> String {
    "JINA_API_KEY".into()
}

/// Content retrieval strategy wired in at composition time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    #[default]
    Crawl,
    Reader,
}

/// How the citation stage attributes an answer to its sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationMode {
    /// Per-paragraph markers plus a full reference list.
    #[default]
    Paragraph,
    /// One footnote for the best-matching source, no inline markers.
    SingleSource,
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Root of the awards website; program paths hang off it.
    #[serde(default = "default_site_root")]
    pub site_root: String,

    /// Backlog size at which new searches are rejected.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    /// Upper bound on one queued search, end to end.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,

    /// Which content retrieval strategy to compose.
    #[serde(default)]
    pub retrieval: RetrievalStrategy,

    /// Citation attribution mode.
    #[serde(default)]
    pub citation_mode: CitationMode,

    /// Sampling temperature for answer synthesis.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Completion budget for answer synthesis.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Ask the LLM to classify intent before falling back to keywords.
    #[serde(default = "default_true")]
    pub use_llm_intent: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            site_root: default_site_root(),
            max_queue_depth: default_max_queue_depth(),
            execution_timeout_secs: default_execution_timeout(),
            retrieval: RetrievalStrategy::default(),
            citation_mode: CitationMode::default(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            use_llm_intent: true,
        }
    }
}

fn default_site_root() -> String {
    "https://www.stevieawards.com".into()
}
fn default_max_queue_depth() -> usize {
    50
}
fn default_execution_timeout() -> u64 {
    120
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1_000
}
fn default_true() -> bool {
    true
}

/// Freshness cache backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    #[default]
    Sqlite,
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Where cached pages live.
    #[serde(default)]
    pub backend: CacheBackend,

    /// Days before a cached page is considered stale.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,

    /// Database path for the sqlite backend. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            ttl_days: default_ttl_days(),
            db_path: default_db_path(),
        }
    }
}

impl CacheConfig {
    /// Cache time-to-live as a chrono duration.
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ttl_days))
    }

    /// Resolve `db_path`, expanding a leading `~`.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match self.db_path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir().ok_or_else(|| {
                    AwardSearchError::config("could not determine home directory")
                })?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.db_path)),
        }
    }
}

fn default_ttl_days() -> u32 {
    7
}
fn default_db_path() -> String {
    format!("~/{CONFIG_DIR_NAME}/cache.db")
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration: merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Link depth followed from each seed URL (0 = seeds only).
    pub max_depth: u32,
    /// Total request budget for one batch.
    pub max_requests: u32,
    /// Politeness delay before each request, in ms.
    pub request_delay_ms: u64,
    /// Extra attempts for a failed page.
    pub max_retries: u32,
    /// Maximum concurrent HTTP requests.
    pub concurrency: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// URL include glob patterns.
    pub include_patterns: Vec<String>,
    /// URL exclude glob patterns.
    pub exclude_patterns: Vec<String>,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let policies = &config.crawl_policies;
        Self {
            max_depth: policies.max_depth,
            max_requests: policies.max_requests,
            request_delay_ms: policies.request_delay_ms,
            max_retries: policies.max_retries,
            concurrency: policies.concurrency.max(1),
            timeout: Duration::from_secs(policies.timeout_secs),
            include_patterns: policies.include_patterns.clone(),
            exclude_patterns: policies.exclude_patterns.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.awardsearch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AwardSearchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.awardsearch/awardsearch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AwardSearchError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        AwardSearchError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AwardSearchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AwardSearchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AwardSearchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    url::Url::parse(&config.search.site_root).map_err(|e| {
        AwardSearchError::config(format!(
            "search.site_root {:?} is not a URL: {e}",
            config.search.site_root
        ))
    })?;
    if config.search.max_queue_depth == 0 {
        return Err(AwardSearchError::config(
            "search.max_queue_depth must be at least 1",
        ));
    }
    if config.cache.ttl_days == 0 {
        return Err(AwardSearchError::config("cache.ttl_days must be at least 1"));
    }
    Ok(())
}

/// Read the LLM API key from the configured env var, if set and non-empty.
pub fn llm_api_key(config: &AppConfig) -> Option<String> {
    std::env::var(&config.llm.api_key_env)
        .ok()
        .filter(|val| !val.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("site_root"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("retrieval = \"crawl\""));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crawl_policies.max_depth, 1);
        assert_eq!(parsed.search.max_queue_depth, 50);
        assert_eq!(parsed.cache.ttl_days, 7);
        assert_eq!(parsed.llm.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[search]
retrieval = "reader"
citation_mode = "single_source"
max_queue_depth = 5

[cache]
backend = "memory"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.search.retrieval, RetrievalStrategy::Reader);
        assert_eq!(config.search.citation_mode, CitationMode::SingleSource);
        assert_eq!(config.search.max_queue_depth, 5);
        assert_eq!(config.search.execution_timeout_secs, 120);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.crawl_policies.request_delay_ms, 500);
    }

    #[test]
    fn crawl_config_from_app_config() {
        let app = AppConfig::default();
        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.max_depth, 1);
        assert_eq!(crawl.max_requests, 20);
        assert_eq!(crawl.max_retries, 2);
        assert_eq!(crawl.timeout, Duration::from_secs(30));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        assert!(validate_config(&config).is_ok());

        config.search.max_queue_depth = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.search.site_root = "not a url".into();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("site_root"));
    }

    #[test]
    fn db_path_expands_home() {
        let config = CacheConfig::default();
        let path = config.resolved_db_path().expect("resolve");
        assert!(path.ends_with(".awardsearch/cache.db"));

        let explicit = CacheConfig {
            db_path: "/tmp/cache.db".into(),
            ..CacheConfig::default()
        };
        assert_eq!(
            explicit.resolved_db_path().unwrap(),
            PathBuf::from("/tmp/cache.db")
        );
    }

    #[test]
    fn missing_api_key_env_yields_none() {
        let mut config = AppConfig::default();
        // Unique env var name so other tests are unaffected
        config.llm.api_key_env = "AS_TEST_NONEXISTENT_KEY_12345".into();
        assert!(llm_api_key(&config).is_none());
    }
}
