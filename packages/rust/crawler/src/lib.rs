//! Content retrieval for award search.
//!
//! This crate provides:
//! - [`ContentRetriever`]: the `fetch(urls) -> pages` capability the pipeline depends on
//! - [`Crawler`]: depth-bounded crawl strategy that parses HTML itself
//! - [`ReaderClient`]: strategy backed by a remote content-reader service
//! - [`extract`]: HTML/text parsing into [`PageRecord`]s

pub mod engine;
pub mod extract;
pub mod reader;

use async_trait::async_trait;
use tracing::warn;
use url::Url;

use awardsearch_shared::{PageRecord, Result};

pub use engine::{CrawlResult, Crawler};
pub use extract::{extract_entities, parse_html, parse_text};
pub use reader::ReaderClient;

/// Fetches and structurally parses a batch of URLs.
///
/// Implementations retry internally and drop URLs that ultimately fail;
/// a failing URL never aborts the rest of the batch.
#[async_trait]
pub trait ContentRetriever: Send + Sync {
    /// Retrieve `urls` and return a record for each page that succeeded.
    async fn fetch(&self, urls: &[String]) -> Result<Vec<PageRecord>>;

    /// Strategy name, for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl ContentRetriever for Crawler {
    async fn fetch(&self, urls: &[String]) -> Result<Vec<PageRecord>> {
        let seeds: Vec<Url> = urls
            .iter()
            .filter_map(|u| match Url::parse(u) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(url = %u, error = %e, "skipping unparseable url");
                    None
                }
            })
            .collect();

        let (_, pages) = self.crawl(&seeds).await;
        Ok(pages)
    }

    fn name(&self) -> &str {
        "crawl"
    }
}

#[async_trait]
impl ContentRetriever for ReaderClient {
    async fn fetch(&self, urls: &[String]) -> Result<Vec<PageRecord>> {
        Ok(self.read_all(urls).await)
    }

    fn name(&self) -> &str {
        "reader"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use awardsearch_shared::{CrawlConfig, ReaderConfig};
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve_award_page(server: &MockServer, route: &str) {
        Mock::given(path(route.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><head><title>ABA Deadlines</title></head><body>\
                 <h1>Deadlines</h1><p>Final deadline: March 10, 2026.</p></body></html>",
                "text/html",
            ))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn strategies_share_the_contract() {
        let server = MockServer::start().await;
        serve_award_page(&server, "/aba/deadlines").await;

        let page_url = format!("{}/aba/deadlines", server.uri());
        Mock::given(path(format!("/{page_url}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "title": "ABA Deadlines", "url": page_url, "content": "# Deadlines\nFinal deadline: March 10, 2026." }
            })))
            .mount(&server)
            .await;

        let crawler = Crawler::new(CrawlConfig {
            max_depth: 0,
            max_requests: 5,
            request_delay_ms: 0,
            max_retries: 0,
            concurrency: 1,
            timeout: Duration::from_secs(5),
            include_patterns: vec![],
            exclude_patterns: vec![],
        })
        .unwrap()
        .allow_localhost();
        let reader = ReaderClient::new(&ReaderConfig {
            base_url: server.uri(),
            api_key_env: "AWARDSEARCH_TEST_UNSET_READER_KEY".into(),
            timeout_secs: 5,
            max_retries: 0,
            request_delay_ms: 0,
        })
        .unwrap();

        let strategies: Vec<Arc<dyn ContentRetriever>> = vec![Arc::new(crawler), Arc::new(reader)];
        for strategy in strategies {
            let pages = strategy.fetch(&[page_url.clone(), "not a url".into()]).await.unwrap();
            assert_eq!(pages.len(), 1, "{}", strategy.name());
            assert_eq!(pages[0].title, "ABA Deadlines");
            assert!(pages[0].content.contains("March 10, 2026"));
            assert_eq!(pages[0].headings, vec!["Deadlines"]);
        }
    }
}
