//! Remote content-reader strategy.
//!
//! Delegates fetching and cleaning to an external reader service
//! (`GET {base_url}/{page_url}` returning `{ data: { title, url, content } }`)
//! and adapts the returned Markdown into [`PageRecord`]s.

use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use awardsearch_shared::{AwardSearchError, PageRecord, ReaderConfig, Result};

use crate::extract;

/// Strict shape of a reader response.
#[derive(Debug, Deserialize)]
struct ReaderEnvelope {
    data: ReaderData,
}

#[derive(Debug, Deserialize)]
struct ReaderData {
    #[serde(default)]
    title: String,
    url: String,
    content: String,
}

/// HTTP client for the reader service.
pub struct ReaderClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    request_delay: Duration,
}

impl ReaderClient {
    /// Build a client from `[reader]` config. The API key is optional.
    pub fn new(config: &ReaderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AwardSearchError::Network(format!("failed to build HTTP client: {e}")))?;

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            request_delay: Duration::from_millis(config.request_delay_ms),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Read every URL in order. Individual failures are logged and skipped.
    #[instrument(skip_all, fields(urls = urls.len()))]
    pub async fn read_all(&self, urls: &[String]) -> Vec<PageRecord> {
        let mut pages = Vec::with_capacity(urls.len());

        for (i, url) in urls.iter().enumerate() {
            if i > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
            match self.read_with_retries(url).await {
                Ok(page) => pages.push(page),
                Err(e) => warn!(%url, error = %e, "reader failed for url"),
            }
        }

        info!(requested = urls.len(), read = pages.len(), "reader batch complete");
        pages
    }

    async fn read_with_retries(&self, url: &str) -> Result<PageRecord> {
        let mut attempt = 0;
        loop {
            match self.read(url).await {
                Ok(page) => return Ok(page),
                Err((true, e)) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!(%url, attempt, error = %e, "retrying reader request");
                    tokio::time::sleep(self.request_delay * attempt).await;
                }
                Err((_, e)) => return Err(e),
            }
        }
    }

    /// One attempt. The flag on the error says whether a retry may help.
    async fn read(&self, url: &str) -> std::result::Result<PageRecord, (bool, AwardSearchError)> {
        let endpoint = format!("{}/{}", self.base_url, url);
        let mut request = self
            .client
            .get(&endpoint)
            .header(header::ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| (true, AwardSearchError::Network(format!("{url}: {e}"))))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
            return Err((
                retryable,
                AwardSearchError::Retrieval(format!("{url}: reader returned HTTP {status}")),
            ));
        }

        let envelope: ReaderEnvelope = response.json().await.map_err(|e| {
            (false, AwardSearchError::parse(format!("{url}: malformed reader response: {e}")))
        })?;

        // Keyed by the requested URL so cache lookups match the plan.
        let data = envelope.data;
        if !data.url.is_empty() && data.url != url {
            debug!(requested = %url, resolved = %data.url, "reader resolved a different url");
        }
        Ok(extract::parse_text(url, &data.title, &data.content, "text/markdown"))
    }
}
