//! Depth-bounded, origin-scoped crawl strategy.
//!
//! The crawler starts from the given seed URLs, performs BFS traversal over
//! same-origin links, respects depth/budget/concurrency/politeness limits, and
//! parses each page into a [`PageRecord`]. A page that keeps failing after its
//! retries is recorded in [`CrawlResult::errors`] and never aborts the batch.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::{Origin, Url};

use awardsearch_shared::{AwardSearchError, CrawlConfig, PageRecord, Result};

use crate::extract;

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("AwardSearch/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// CrawlResult
// ---------------------------------------------------------------------------

/// Summary of a completed crawl operation.
#[derive(Debug, Clone, Default)]
pub struct CrawlResult {
    /// Number of pages successfully fetched and parsed.
    pub pages_fetched: usize,
    /// Number of URLs skipped (out of scope, duplicate, over budget, blocked).
    pub pages_skipped: usize,
    /// Failed URLs with the last error message.
    pub errors: Vec<(String, String)>,
    /// Total duration of the crawl.
    pub duration: Duration,
}

/// One frontier entry: the URL, its depth, and the origin of the seed it came from.
type Frontier = (Url, u32, Origin);

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Concurrent web crawler producing normalized page records.
pub struct Crawler {
    config: CrawlConfig,
    client: Client,
    /// Allow localhost/private IPs (for tests against mock servers).
    allow_localhost: bool,
}

impl Crawler {
    /// Create a new crawler with the given configuration.
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| AwardSearchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            allow_localhost: false,
        })
    }

    /// Allow crawling localhost/private IPs. Only meant for local mock servers.
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Crawl outward from `seeds`, returning a summary and every parsed page.
    #[instrument(skip_all, fields(seeds = seeds.len()))]
    pub async fn crawl(&self, seeds: &[Url]) -> (CrawlResult, Vec<PageRecord>) {
        let start_time = std::time::Instant::now();

        let scope = CrawlScope::new(&self.config);
        let concurrency = self.config.concurrency.max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: Vec<Frontier> = seeds
            .iter()
            .map(|u| (u.clone(), 0, u.origin()))
            .collect();
        let mut pages: Vec<PageRecord> = Vec::new();
        let mut result = CrawlResult::default();
        let mut requests_issued: u32 = 0;

        info!(
            max_depth = self.config.max_depth,
            max_requests = self.config.max_requests,
            concurrency,
            request_delay_ms = self.config.request_delay_ms,
            "starting crawl"
        );

        while !queue.is_empty() {
            let batch: Vec<Frontier> = {
                let drain_count = queue.len().min(concurrency);
                queue.drain(..drain_count).collect()
            };

            let mut handles = Vec::new();

            for (url, depth, seed_origin) in batch {
                if !visited.insert(normalize_url(&url)) {
                    result.pages_skipped += 1;
                    continue;
                }

                // Seeds are always fetched; patterns only filter discovered links.
                if depth > 0 && !scope.in_scope(&url, &seed_origin) {
                    debug!(%url, "out of scope, skipping");
                    result.pages_skipped += 1;
                    continue;
                }

                if !self.allow_localhost && is_ssrf_target(&url) {
                    warn!(%url, "SSRF protection: blocked");
                    result.errors.push((url.to_string(), "blocked target".into()));
                    result.pages_skipped += 1;
                    continue;
                }

                if requests_issued >= self.config.max_requests {
                    debug!(%url, "request budget exhausted, skipping");
                    result.pages_skipped += 1;
                    continue;
                }
                requests_issued += 1;

                let client = self.client.clone();
                let sem = semaphore.clone();
                let delay = Duration::from_millis(self.config.request_delay_ms);
                let max_retries = self.config.max_retries;

                handles.push(tokio::spawn(async move {
                    let fetched = match sem.acquire_owned().await {
                        Ok(_permit) => {
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                            fetch_with_retries(&client, &url, depth, max_retries, delay).await
                        }
                        Err(e) => Err(AwardSearchError::Retrieval(format!("semaphore closed: {e}"))),
                    };
                    (url, depth, seed_origin, fetched)
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok((_, depth, seed_origin, Ok((page, links)))) => {
                        if depth < self.config.max_depth {
                            for link in links {
                                if let Ok(link_url) = Url::parse(&link) {
                                    queue.push((link_url, depth + 1, seed_origin.clone()));
                                }
                            }
                        }
                        pages.push(page);
                    }
                    Ok((url, _, _, Err(e))) => {
                        warn!(%url, error = %e, "page failed after retries");
                        result.errors.push((url.to_string(), e.to_string()));
                    }
                    Err(e) => {
                        warn!(error = %e, "crawl task panicked");
                        result.errors.push(("task".into(), e.to_string()));
                    }
                }
            }
        }

        result.pages_fetched = pages.len();
        result.duration = start_time.elapsed();

        info!(
            pages_fetched = result.pages_fetched,
            pages_skipped = result.pages_skipped,
            errors = result.errors.len(),
            duration_ms = result.duration.as_millis(),
            "crawl completed"
        );

        (result, pages)
    }
}

// ---------------------------------------------------------------------------
// Scope checking
// ---------------------------------------------------------------------------

/// Determines which discovered URLs are followed.
struct CrawlScope {
    /// Include patterns (if non-empty, the path must match at least one).
    include_patterns: Vec<regex::Regex>,
    /// Exclude patterns (if the path matches any, it's excluded).
    exclude_patterns: Vec<regex::Regex>,
}

impl CrawlScope {
    fn new(config: &CrawlConfig) -> Self {
        Self {
            include_patterns: config
                .include_patterns
                .iter()
                .filter_map(|p| glob_to_regex(p))
                .collect(),
            exclude_patterns: config
                .exclude_patterns
                .iter()
                .filter_map(|p| glob_to_regex(p))
                .collect(),
        }
    }

    fn in_scope(&self, url: &Url, seed_origin: &Origin) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }

        if &url.origin() != seed_origin {
            return false;
        }

        let path = url.path();

        if self.exclude_patterns.iter().any(|p| p.is_match(path)) {
            return false;
        }

        self.include_patterns.is_empty() || self.include_patterns.iter().any(|p| p.is_match(path))
    }
}

/// Convert a glob-like pattern to a regex.
fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$")).ok()
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ---------------------------------------------------------------------------
// Page fetching
// ---------------------------------------------------------------------------

/// A single failed attempt, tagged with whether another attempt may help.
struct AttemptError {
    retryable: bool,
    error: AwardSearchError,
}

/// Fetch one page, retrying transient failures with a linear backoff.
async fn fetch_with_retries(
    client: &Client,
    url: &Url,
    depth: u32,
    max_retries: u32,
    delay: Duration,
) -> Result<(PageRecord, Vec<String>)> {
    let mut attempt = 0;
    loop {
        match fetch_page(client, url, depth).await {
            Ok(fetched) => return Ok(fetched),
            Err(AttemptError { retryable, error }) if retryable && attempt < max_retries => {
                attempt += 1;
                debug!(%url, attempt, error = %error, "retrying fetch");
                tokio::time::sleep(delay * attempt).await;
            }
            Err(AttemptError { error, .. }) => return Err(error),
        }
    }
}

/// Fetch a single page and parse it into a record plus its outgoing links.
async fn fetch_page(
    client: &Client,
    url: &Url,
    depth: u32,
) -> std::result::Result<(PageRecord, Vec<String>), AttemptError> {
    debug!(%url, depth, "fetching page");

    let response = client.get(url.as_str()).send().await.map_err(|e| AttemptError {
        retryable: true,
        error: AwardSearchError::Network(format!("{url}: {e}")),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(AttemptError {
            retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            error: AwardSearchError::Network(format!("{url}: HTTP {status}")),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .unwrap_or_else(|| "text/html".to_string());

    let body = response.text().await.map_err(|e| AttemptError {
        retryable: true,
        error: AwardSearchError::Network(format!("{url}: body read failed: {e}")),
    })?;

    if content_type.contains("html") || body.trim_start().starts_with('<') {
        Ok(extract::parse_html(&body, url, depth, &content_type))
    } else if content_type.starts_with("text/") {
        let mut page = extract::parse_text(url.as_str(), "", &body, &content_type);
        page.metadata.depth = depth;
        Ok((page, Vec::new()))
    } else {
        Err(AttemptError {
            retryable: false,
            error: AwardSearchError::Retrieval(format!(
                "{url}: unsupported content type {content_type}"
            )),
        })
    }
}

/// Normalize a URL for deduplication (strip fragment and trailing slash).
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}
