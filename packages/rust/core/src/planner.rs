//! Query planner: free text → [`SearchPlan`].
//!
//! Intent comes from the LLM when one is configured, otherwise (or on any LLM
//! failure) from a keyword heuristic. Keywords and target URLs are derived from
//! a static program vocabulary, so the plan for a given query and cache state
//! is deterministic once the intent is fixed.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, instrument, warn};

use awardsearch_shared::{
    AwardSearchError, IntentType, Priority, QueryIntent, Result, SearchPlan,
};
use awardsearch_storage::FreshnessCache;

use crate::llm::{ChatCompletion, ChatMessage, ChatRequest};

const INTENT_PROMPT: &str = "You classify questions about business award programs. \
Reply with JSON only, no prose, in the form \
{\"type\": \"<category|eligibility|pricing|deadline|process|comparison|general>\", \
\"subQuestions\": [\"<each distinct question asked>\"]}.";

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

/// A recognized award program.
struct Program {
    /// Keyword emitted into the plan.
    id: &'static str,
    /// Full name, used as a comparison entity.
    name: &'static str,
    /// Root path on the site.
    path: &'static str,
    matcher: Regex,
}

static PROGRAMS: LazyLock<Vec<Program>> = LazyLock::new(|| {
    [
        ("aba", "American Business Awards", "/aba", r"\baba\b|american business award"),
        ("iba", "International Business Awards", "/iba", r"\biba\b|international business award"),
        ("sales", "Stevie Awards for Sales & Customer Service", "/sales", r"\bsales\b|customer service"),
        ("women", "Stevie Awards for Women in Business", "/women", r"\bwomen\b"),
        ("asia-pacific", "Asia-Pacific Stevie Awards", "/asia-pacific", r"asia[- ]pacific|\bapac\b"),
        ("german", "German Stevie Awards", "/gsa", r"\bgerman\b|\bgsa\b"),
        ("mena", "Middle East & North Africa Stevie Awards", "/mena", r"\bmena\b|middle east"),
        ("tech", "Stevie Awards for Technology Excellence", "/tech", r"\btech\b|technology excellence"),
        ("employers", "Stevie Awards for Great Employers", "/employers", r"\bemployers?\b"),
    ]
    .into_iter()
    .map(|(id, name, path, pattern)| Program {
        id,
        name,
        path,
        matcher: Regex::new(pattern).expect("valid regex"),
    })
    .collect()
});

/// Topic keyword → stems that signal it.
const TOPICS: &[(&str, &[&str])] = &[
    ("category", &["categor"]),
    ("pricing", &["price", "pricing", "cost", "fee"]),
    ("eligibility", &["eligib", "qualif", "who can"]),
    ("deadline", &["deadline", "due date", "closing date"]),
    ("nomination", &["nominat"]),
    ("process", &["process", "how to", "how do i", "submit"]),
    ("award", &["award"]),
];

/// Heuristic intent table, checked in order.
const INTENT_RULES: &[(IntentType, &[&str])] = &[
    (IntentType::Comparison, &["compare", "comparison", "difference", "versus", " vs ", " vs."]),
    (IntentType::Deadline, &["deadline", "due date", "closing date", "cut-off", "cutoff"]),
    (IntentType::Pricing, &["price", "pricing", "cost", "fee"]),
    (IntentType::Eligibility, &["eligib", "qualify", "qualifies", "who can"]),
    (IntentType::Category, &["categor"]),
    (IntentType::Process, &["process", "how to", "how do i", "nominate", "nomination", " enter ", " entering ", "submit"]),
];

static COMPARISON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:compare|comparison|difference|differences|versus|vs\.?|which is better|which one)\b")
        .expect("valid regex")
});

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["“]([^"”]{2,80})["”]"#).expect("valid regex"));

/// Canonical sub-paths per intent, appended to a program root.
fn intent_paths(intent: IntentType) -> &'static [&'static str] {
    match intent {
        IntentType::Category => &["/categories"],
        IntentType::Eligibility => &["/eligibility", "/entry-guidelines"],
        IntentType::Pricing => &["/entry-fees", "/pricing"],
        IntentType::Deadline => &["/deadlines", "/important-dates"],
        IntentType::Process => &["/how-to-enter", "/entry-guidelines"],
        IntentType::Comparison => &["", "/categories"],
        IntentType::General => &[""],
    }
}

// ---------------------------------------------------------------------------
// QueryPlanner
// ---------------------------------------------------------------------------

/// Builds a [`SearchPlan`] for each query.
pub struct QueryPlanner {
    llm: Option<Arc<dyn ChatCompletion>>,
    cache: Arc<dyn FreshnessCache>,
    /// Site root without a trailing slash.
    site_root: String,
    use_llm_intent: bool,
}

impl QueryPlanner {
    pub fn new(
        llm: Option<Arc<dyn ChatCompletion>>,
        cache: Arc<dyn FreshnessCache>,
        site_root: &str,
        use_llm_intent: bool,
    ) -> Self {
        Self {
            llm,
            cache,
            site_root: site_root.trim_end_matches('/').to_string(),
            use_llm_intent,
        }
    }

    /// Turn `query` into a plan. Never fails: every collaborator failure degrades.
    #[instrument(skip_all, fields(query = %query.chars().take(50).collect::<String>()))]
    pub async fn plan_search(&self, query: &str) -> SearchPlan {
        let intent = self.classify_intent(query).await;
        let lowered = query.to_lowercase();

        let programs: Vec<&Program> = PROGRAMS
            .iter()
            .filter(|p| p.matcher.is_match(&lowered))
            .collect();

        let keywords = extract_keywords(&lowered, &programs);
        let target_urls = self.target_urls(intent.kind, &programs);
        let cached_urls = self.cached_subset(&target_urls).await;

        let requires_comparison =
            intent.kind == IntentType::Comparison || COMPARISON_RE.is_match(&lowered);
        let entities = if requires_comparison {
            comparison_entities(query, &programs)
        } else {
            Vec::new()
        };

        let priority = priority(intent.sub_questions.len(), target_urls.len(), cached_urls.len());

        debug!(
            intent = %intent.kind,
            targets = target_urls.len(),
            cached = cached_urls.len(),
            ?priority,
            "search planned"
        );

        SearchPlan {
            intent,
            keywords,
            target_urls,
            requires_comparison,
            entities,
            priority,
            cached_urls,
        }
    }

    async fn classify_intent(&self, query: &str) -> QueryIntent {
        if let (Some(llm), true) = (&self.llm, self.use_llm_intent) {
            match llm_intent(llm.as_ref(), query).await {
                Ok(intent) => return intent,
                Err(e) => warn!(error = %e, "intent classification failed, using heuristic"),
            }
        }
        heuristic_intent(query)
    }

    fn target_urls(&self, intent: IntentType, programs: &[&Program]) -> Vec<String> {
        if programs.is_empty() {
            return vec![format!("{}/", self.site_root)];
        }

        let mut seen = HashSet::new();
        programs
            .iter()
            .flat_map(|p| {
                intent_paths(intent)
                    .iter()
                    .map(move |sub| format!("{}{}{}", self.site_root, p.path, sub))
            })
            .filter(|u| seen.insert(u.clone()))
            .collect()
    }

    async fn cached_subset(&self, target_urls: &[String]) -> Vec<String> {
        match self.cache.get_multiple(target_urls).await {
            Ok(fresh) => target_urls
                .iter()
                .filter(|u| fresh.contains_key(*u))
                .cloned()
                .collect(),
            Err(e) => {
                warn!(error = %e, "cache precheck failed");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

async fn llm_intent(llm: &dyn ChatCompletion, query: &str) -> Result<QueryIntent> {
    let raw = llm
        .chat_completion(ChatRequest {
            messages: vec![ChatMessage::system(INTENT_PROMPT), ChatMessage::user(query)],
            temperature: Some(0.0),
            max_tokens: Some(300),
            ..ChatRequest::default()
        })
        .await?;
    parse_intent_json(&raw, query)
}

/// Parse the model's reply into a strict [`QueryIntent`].
pub(crate) fn parse_intent_json(raw: &str, query: &str) -> Result<QueryIntent> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &raw[s..=e],
        _ => return Err(AwardSearchError::parse("intent reply contains no JSON object")),
    };

    let mut intent: QueryIntent = serde_json::from_str(json)
        .map_err(|e| AwardSearchError::parse(format!("intent reply rejected: {e}")))?;
    intent.sub_questions.retain(|q| !q.trim().is_empty());
    if intent.sub_questions.is_empty() {
        intent.sub_questions = vec![query.trim().to_string()];
    }
    Ok(intent)
}

/// Keyword-table classification. Never calls the LLM.
pub fn heuristic_intent(query: &str) -> QueryIntent {
    // Space-padded with clause punctuation blanked, so " word " needles match whole words.
    let lowered = format!(" {} ", query.to_lowercase().replace(['?', '!', ',', ';', ':'], " "));
    let kind = INTENT_RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lowered.contains(n)))
        .map(|(kind, _)| *kind)
        .unwrap_or_default();

    QueryIntent {
        kind,
        sub_questions: split_sub_questions(query),
    }
}

fn split_sub_questions(query: &str) -> Vec<String> {
    let parts: Vec<String> = query
        .split(['?', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        vec![query.trim().to_string()]
    } else {
        parts
    }
}

// ---------------------------------------------------------------------------
// Keywords, entities, priority
// ---------------------------------------------------------------------------

fn extract_keywords(lowered: &str, programs: &[&Program]) -> BTreeSet<String> {
    let mut keywords: BTreeSet<String> = programs.iter().map(|p| p.id.to_string()).collect();
    for (topic, stems) in TOPICS {
        if stems.iter().any(|s| lowered.contains(s)) {
            keywords.insert((*topic).to_string());
        }
    }
    keywords
}

fn comparison_entities(query: &str, programs: &[&Program]) -> Vec<String> {
    if !programs.is_empty() {
        return programs.iter().map(|p| p.name.to_string()).collect();
    }
    let mut seen = HashSet::new();
    QUOTED_RE
        .captures_iter(query)
        .map(|c| c[1].trim().to_string())
        .filter(|e| !e.is_empty() && seen.insert(e.clone()))
        .collect()
}

fn priority(sub_questions: usize, targets: usize, cached: usize) -> Priority {
    let mostly_cached = targets > 0 && cached * 10 >= targets * 8;
    if mostly_cached || (sub_questions == 1 && targets <= 2) {
        Priority::High
    } else if sub_questions > 3 || targets > 5 {
        Priority::Low
    } else {
        Priority::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use awardsearch_shared::{PageMetadata, PageRecord};
    use awardsearch_storage::MemoryCache;

    const ROOT: &str = "https://www.stevieawards.com";

    /// LLM double that counts calls and returns a fixed reply.
    struct ScriptedLlm {
        reply: Result<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatCompletion for ScriptedLlm {
        async fn chat_completion(&self, _request: ChatRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(AwardSearchError::Llm("unavailable".into())),
            }
        }
    }

    fn cache() -> Arc<MemoryCache> {
        Arc::new(MemoryCache::new(chrono::Duration::days(7)))
    }

    fn page(url: &str) -> PageRecord {
        PageRecord {
            url: url.into(),
            title: "t".into(),
            content: "c".into(),
            headings: vec![],
            tables: vec![],
            entities: vec![],
            metadata: PageMetadata {
                retrieved_at: chrono::Utc::now(),
                content_type: "text/html".into(),
                depth: 0,
            },
        }
    }

    #[test]
    fn heuristic_classifies_deadline() {
        let intent = heuristic_intent("What is the deadline for ABA 2026?");
        assert_eq!(intent.kind, IntentType::Deadline);
        assert_eq!(intent.sub_questions, vec!["What is the deadline for ABA 2026"]);
    }

    #[test]
    fn heuristic_order_and_default() {
        assert_eq!(heuristic_intent("compare ABA and IBA fees").kind, IntentType::Comparison);
        assert_eq!(heuristic_intent("How much is the entry fee").kind, IntentType::Pricing);
        assert_eq!(heuristic_intent("Am I eligible").kind, IntentType::Eligibility);
        assert_eq!(heuristic_intent("List the categories").kind, IntentType::Category);
        assert_eq!(heuristic_intent("How do I nominate someone").kind, IntentType::Process);
        assert_eq!(heuristic_intent("Tell me about the Stevies").kind, IntentType::General);
        // "vs" only as a standalone word.
        assert_eq!(heuristic_intent("canvas awards").kind, IntentType::General);
    }

    #[test]
    fn enter_matches_only_as_a_word() {
        assert_eq!(heuristic_intent("Can I enter IBA?").kind, IntentType::Process);
        assert_eq!(heuristic_intent("Entering the ABA, what next").kind, IntentType::Process);
        for query in [
            "ABA awards for entertainment companies",
            "Awards for a contact center",
            "Who was the presenter at the gala",
        ] {
            assert_eq!(heuristic_intent(query).kind, IntentType::General, "{query}");
        }
    }

    #[test]
    fn sub_questions_split_on_question_marks_and_semicolons() {
        let intent = heuristic_intent("When is the deadline? How much is it; who can enter?");
        assert_eq!(
            intent.sub_questions,
            vec!["When is the deadline", "How much is it", "who can enter"]
        );
    }

    #[test]
    fn intent_json_is_parsed_strictly() {
        let fenced = "```json\n{\"type\": \"pricing\", \"subQuestions\": [\"How much?\"]}\n```";
        let intent = parse_intent_json(fenced, "q").unwrap();
        assert_eq!(intent.kind, IntentType::Pricing);
        assert_eq!(intent.sub_questions, vec!["How much?"]);

        let no_subs = parse_intent_json("{\"type\": \"general\", \"subQuestions\": []}", "q").unwrap();
        assert_eq!(no_subs.sub_questions, vec!["q"]);

        assert!(parse_intent_json("{\"type\": \"weather\", \"subQuestions\": []}", "q").is_err());
        assert!(parse_intent_json("I think it's about pricing", "q").is_err());
    }

    #[tokio::test]
    async fn deadline_plan_targets_program_paths_without_llm() {
        let planner = QueryPlanner::new(None, cache(), ROOT, true);
        let plan = planner.plan_search("what is the deadline for ABA 2026?").await;

        assert_eq!(plan.intent.kind, IntentType::Deadline);
        assert_eq!(
            plan.target_urls,
            vec![
                "https://www.stevieawards.com/aba/deadlines",
                "https://www.stevieawards.com/aba/important-dates"
            ]
        );
        assert!(plan.keywords.contains("aba"));
        assert!(plan.keywords.contains("deadline"));
        assert!(plan.cached_urls.is_empty());
        assert!(!plan.requires_comparison);
        assert_eq!(plan.priority, Priority::High);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_heuristic() {
        let llm = Arc::new(ScriptedLlm {
            reply: Err(AwardSearchError::Llm("down".into())),
            calls: AtomicUsize::new(0),
        });
        let planner = QueryPlanner::new(Some(llm.clone()), cache(), ROOT, true);
        let plan = planner.plan_search("IBA entry fee?").await;

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(plan.intent.kind, IntentType::Pricing);
        assert!(plan.target_urls[0].ends_with("/iba/entry-fees"));
    }

    #[tokio::test]
    async fn llm_intent_is_used_when_valid() {
        let llm = Arc::new(ScriptedLlm {
            reply: Ok("{\"type\": \"eligibility\", \"subQuestions\": [\"Can startups enter?\"]}".into()),
            calls: AtomicUsize::new(0),
        });
        let planner = QueryPlanner::new(Some(llm), cache(), ROOT, true);
        let plan = planner.plan_search("Can startups enter the tech awards?").await;

        assert_eq!(plan.intent.kind, IntentType::Eligibility);
        assert_eq!(
            plan.target_urls,
            vec![
                "https://www.stevieawards.com/tech/eligibility",
                "https://www.stevieawards.com/tech/entry-guidelines"
            ]
        );
    }

    #[tokio::test]
    async fn no_program_falls_back_to_site_root() {
        let planner = QueryPlanner::new(None, cache(), "https://www.stevieawards.com/", true);
        let plan = planner.plan_search("Tell me about the awards").await;
        assert_eq!(plan.target_urls, vec!["https://www.stevieawards.com/"]);
        assert!(plan.keywords.contains("award"));
    }

    #[tokio::test]
    async fn comparison_expands_program_names() {
        let planner = QueryPlanner::new(None, cache(), ROOT, true);
        let plan = planner
            .plan_search("What is the difference between ABA and IBA?")
            .await;

        assert!(plan.requires_comparison);
        assert_eq!(plan.intent.kind, IntentType::Comparison);
        assert_eq!(
            plan.entities,
            vec!["American Business Awards", "International Business Awards"]
        );
        assert_eq!(plan.target_urls.len(), 4);
        assert_eq!(plan.priority, Priority::Medium);
    }

    #[tokio::test]
    async fn comparison_uses_quoted_names_without_programs() {
        let planner = QueryPlanner::new(None, cache(), ROOT, true);
        let plan = planner
            .plan_search("Which is better: \"Best New Product\" or \"Product Innovation\"?")
            .await;
        assert!(plan.requires_comparison);
        assert_eq!(plan.entities, vec!["Best New Product", "Product Innovation"]);
    }

    #[tokio::test]
    async fn cached_urls_and_idempotence() {
        let cache = cache();
        cache
            .set("https://www.stevieawards.com/aba/deadlines", &page("https://www.stevieawards.com/aba/deadlines"))
            .await
            .unwrap();
        let planner = QueryPlanner::new(None, cache, ROOT, true);

        let first = planner.plan_search("ABA deadline and fees?").await;
        let second = planner.plan_search("ABA deadline and fees?").await;

        assert_eq!(first, second);
        assert_eq!(first.cached_urls, vec!["https://www.stevieawards.com/aba/deadlines"]);
    }

    #[test]
    fn priority_rules() {
        assert_eq!(priority(1, 2, 0), Priority::High);
        assert_eq!(priority(2, 5, 4), Priority::High);
        assert_eq!(priority(4, 3, 0), Priority::Low);
        assert_eq!(priority(1, 6, 0), Priority::Low);
        assert_eq!(priority(2, 4, 1), Priority::Medium);
    }
}
