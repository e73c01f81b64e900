//! Award search orchestrator: admission control plus a single-flight queue.
//!
//! `search()` rejects immediately with `QUEUE_FULL` when the backlog is at
//! capacity; otherwise the request is queued and a single drain task runs
//! admitted requests one at a time, FIFO:
//! plan → cache → retrieval (missing URLs only) → cache write → synthesis → citations.
//! Each execution is bounded by a timeout and isolated in its own task, so a
//! stuck or panicking request fails alone and the drain continues.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use awardsearch_crawler::{ContentRetriever, Crawler, ReaderClient};
use awardsearch_shared::{
    AppConfig, AwardSearchError, AwardSearchResult, CacheBackend, CrawlConfig, PageRecord,
    RequestId, Result, RetrievalStrategy, SearchConfig, SearchError, SearchMetadata, SearchPlan,
    llm_api_key,
};
use awardsearch_storage::{FreshnessCache, MemoryCache, Storage};

use crate::citations::CitationSystem;
use crate::llm::{ChatCompletion, OpenAiClient};
use crate::planner::QueryPlanner;
use crate::synthesizer::AnswerSynthesizer;
use crate::telemetry::{RequestStatus, Telemetry};

/// Characters of the query included in log lines.
const LOG_QUERY_CHARS: usize = 50;

/// Admission and execution limits.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Queued (not yet executing) requests allowed before `QUEUE_FULL`.
    pub max_queue_depth: usize,
    /// Upper bound on one request's execution.
    pub execution_timeout: Duration,
}

impl From<&SearchConfig> for ServiceOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            max_queue_depth: config.max_queue_depth.max(1),
            execution_timeout: Duration::from_secs(config.execution_timeout_secs),
        }
    }
}

/// The pipeline stages an orchestrator drives.
pub struct Pipeline {
    pub planner: QueryPlanner,
    pub cache: Arc<dyn FreshnessCache>,
    pub retriever: Arc<dyn ContentRetriever>,
    pub synthesizer: AnswerSynthesizer,
    pub citations: CitationSystem,
}

struct QueuedRequest {
    query: String,
    request_id: RequestId,
    started: Instant,
    respond: oneshot::Sender<AwardSearchResult>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedRequest>,
    draining: bool,
}

struct Inner {
    pipeline: Pipeline,
    options: ServiceOptions,
    queue: Mutex<QueueState>,
    telemetry: Telemetry,
}

/// Façade over the award search pipeline. Cheap to clone.
#[derive(Clone)]
pub struct AwardSearchService {
    inner: Arc<Inner>,
}

impl AwardSearchService {
    pub fn new(pipeline: Pipeline, options: ServiceOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline,
                options,
                queue: Mutex::new(QueueState::default()),
                telemetry: Telemetry::new(),
            }),
        }
    }

    /// Answer `query`. Always resolves to a well-formed result.
    pub async fn search(&self, query: &str) -> AwardSearchResult {
        let started = Instant::now();
        let request_id = RequestId::new();
        let (tx, rx) = oneshot::channel();

        let admitted = {
            let mut queue = self.inner.lock_queue();
            if queue.pending.len() >= self.inner.options.max_queue_depth {
                None
            } else {
                queue.pending.push_back(QueuedRequest {
                    query: query.to_string(),
                    request_id,
                    started,
                    respond: tx,
                });
                let start_drain = !queue.draining;
                queue.draining = true;
                Some((queue.pending.len(), start_drain))
            }
        };

        let Some((depth, start_drain)) = admitted else {
            warn!(%request_id, query = %log_prefix(query), "queue full, rejecting search");
            self.inner
                .telemetry
                .record_request(RequestStatus::QueueFull, false, elapsed_ms(started));
            return AwardSearchResult::failure(SearchError::queue_full(), request_id, elapsed_ms(started));
        };

        self.inner.telemetry.set_queue_depth(depth);
        if start_drain {
            tokio::spawn(drain(self.inner.clone()));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                error!(%request_id, "search dropped without a result");
                AwardSearchResult::failure(SearchError::internal(), request_id, elapsed_ms(started))
            }
        }
    }

    /// Build the plan for `query` without executing it.
    pub async fn plan(&self, query: &str) -> SearchPlan {
        self.inner.pipeline.planner.plan_search(query).await
    }

    /// Requests admitted but not yet executing.
    pub fn queue_depth(&self) -> usize {
        self.inner.lock_queue().pending.len()
    }

    /// Request, latency and queue metrics for this service.
    pub fn telemetry(&self) -> &Telemetry {
        &self.inner.telemetry
    }
}

// ---------------------------------------------------------------------------
// Drain loop
// ---------------------------------------------------------------------------

/// Run queued requests one at a time until the queue is empty.
async fn drain(inner: Arc<Inner>) {
    loop {
        let (request, depth) = {
            let mut queue = inner.lock_queue();
            match queue.pending.pop_front() {
                Some(request) => {
                    let depth = queue.pending.len();
                    (request, depth)
                }
                None => {
                    queue.draining = false;
                    return;
                }
            }
        };
        inner.telemetry.set_queue_depth(depth);

        let result = inner.clone().run(&request).await;
        // The caller may have gone away; nothing to do then.
        let _ = request.respond.send(result);
    }
}

impl Inner {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Execute one request under the timeout and map the outcome to a result.
    async fn run(self: Arc<Self>, request: &QueuedRequest) -> AwardSearchResult {
        let QueuedRequest {
            query,
            request_id,
            started,
            ..
        } = request;
        let timeout = self.options.execution_timeout;

        let mut task = tokio::spawn({
            let inner = self.clone();
            let query = query.clone();
            let (request_id, started) = (*request_id, *started);
            async move { inner.execute(&query, request_id, started).await }
        });

        let outcome = match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => Err(AwardSearchError::Retrieval(format!(
                "execution task failed: {join_error}"
            ))),
            Err(_) => {
                task.abort();
                Err(AwardSearchError::Timeout(timeout.as_millis() as u64))
            }
        };

        match outcome {
            Ok(result) => {
                self.telemetry.record_request(
                    RequestStatus::Success,
                    result.metadata.cache_hit,
                    result.metadata.response_time_ms,
                );
                result
            }
            Err(e) => {
                let ms = elapsed_ms(*started);
                error!(
                    %request_id,
                    query = %log_prefix(query),
                    error = %e,
                    elapsed_ms = ms,
                    "search execution failed"
                );
                self.telemetry.record_request(RequestStatus::Error, false, ms);
                AwardSearchResult::failure(SearchError::internal(), *request_id, ms)
            }
        }
    }

    #[instrument(skip_all, fields(%request_id, query = %log_prefix(query)))]
    async fn execute(
        &self,
        query: &str,
        request_id: RequestId,
        started: Instant,
    ) -> Result<AwardSearchResult> {
        let pipeline = &self.pipeline;
        let plan = pipeline.planner.plan_search(query).await;

        let mut cached = match pipeline.cache.get_multiple(&plan.target_urls).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "cache read failed, fetching everything");
                HashMap::new()
            }
        };
        let missing: Vec<String> = plan
            .target_urls
            .iter()
            .filter(|u| !cached.contains_key(*u))
            .cloned()
            .collect();
        let cache_hit = missing.is_empty() && !cached.is_empty();

        let fetched = if missing.is_empty() {
            Vec::new()
        } else {
            self.retrieve(&missing).await
        };

        let mut fetched_by_url: HashMap<String, PageRecord> = HashMap::new();
        for page in fetched {
            fetched_by_url.entry(page.url.clone()).or_insert(page);
        }
        // Sources are the planned targets in plan order; linked pages stay cache-only.
        let pages: Vec<PageRecord> = plan
            .target_urls
            .iter()
            .filter_map(|u| cached.remove(u).or_else(|| fetched_by_url.remove(u)))
            .collect();

        if pages.is_empty() {
            return Err(AwardSearchError::NoResults);
        }

        let synthesized = pipeline.synthesizer.synthesize(query, &pages).await;
        let cited = pipeline.citations.add_citations(&synthesized.answer, &pages);
        let response_time_ms = elapsed_ms(started);

        info!(
            intent = %plan.intent.kind,
            cache_hit,
            sources = pages.len(),
            confidence = ?synthesized.confidence,
            response_time_ms,
            "search completed"
        );

        Ok(AwardSearchResult {
            success: true,
            answer: cited.answer,
            citations: cited.citations,
            metadata: SearchMetadata {
                request_id,
                cache_hit,
                response_time_ms,
                sources_used: pages.len(),
                query_intent: Some(plan.intent.kind),
                confidence: Some(synthesized.confidence),
                missing_info: synthesized.missing_info.unwrap_or_default(),
            },
            error: None,
        })
    }

    /// Fetch `urls` and write every page back to the cache, linked pages included.
    async fn retrieve(&self, urls: &[String]) -> Vec<PageRecord> {
        let pipeline = &self.pipeline;
        let pages = match pipeline.retriever.fetch(urls).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!(strategy = pipeline.retriever.name(), error = %e, "retrieval failed");
                return Vec::new();
            }
        };

        for page in &pages {
            if let Err(e) = pipeline.cache.set(&page.url, page).await {
                warn!(url = %page.url, error = %e, "cache write failed");
            }
        }
        debug!(
            strategy = pipeline.retriever.name(),
            requested = urls.len(),
            fetched = pages.len(),
            "retrieval complete"
        );
        pages
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn log_prefix(query: &str) -> String {
    query.chars().take(LOG_QUERY_CHARS).collect()
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Wire a service from config: cache backend, retrieval strategy, optional LLM,
/// and citation mode are all chosen here.
pub async fn build_service(config: &AppConfig) -> Result<AwardSearchService> {
    let cache: Arc<dyn FreshnessCache> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(config.cache.ttl())),
        CacheBackend::Sqlite => {
            let path = config.cache.resolved_db_path()?;
            Arc::new(Storage::open(&path, config.cache.ttl()).await?)
        }
    };

    let retriever: Arc<dyn ContentRetriever> = match config.search.retrieval {
        RetrievalStrategy::Crawl => Arc::new(Crawler::new(CrawlConfig::from(config))?),
        RetrievalStrategy::Reader => Arc::new(ReaderClient::new(&config.reader)?),
    };

    let llm: Option<Arc<dyn ChatCompletion>> = match llm_api_key(config) {
        Some(key) => Some(Arc::new(OpenAiClient::new(&config.llm, key)?)),
        None => {
            warn!(
                env = %config.llm.api_key_env,
                "no LLM API key set; using heuristic intent and raw-data answers"
            );
            None
        }
    };

    info!(
        cache = ?config.cache.backend,
        retrieval = retriever.name(),
        llm = llm.is_some(),
        citation_mode = ?config.search.citation_mode,
        "award search service configured"
    );

    let pipeline = Pipeline {
        planner: QueryPlanner::new(
            llm.clone(),
            cache.clone(),
            &config.search.site_root,
            config.search.use_llm_intent,
        ),
        cache,
        retriever,
        synthesizer: AnswerSynthesizer::new(
            llm,
            config.search.temperature,
            config.search.max_tokens,
        ),
        citations: CitationSystem::new(config.search.citation_mode),
    };

    Ok(AwardSearchService::new(pipeline, ServiceOptions::from(&config.search)))
}
