//! Query-time content retrieval
//!
//! Given a query, finds the most relevant indexed URLs, serves summaries
//! already fresh in the page cache, and fetches + summarizes + caches the
//! rest under bounded concurrency. Any single URL's failure is recorded
//! and excluded; it never fails the batch or the overall call.

use crate::config::FetchConfig;
use crate::crawl::{process_in_batches, PageFetcher};
use crate::embed::{embed_or_zero, Embedder};
use crate::error::{Error, Result};
use crate::events::{ProgressEvent, SharedSink};
use crate::llm::{parse_structured, CompletionClient, CompletionRequest, Structured};
use crate::parse::{content_hash, extract_page_content};
use crate::store::{CacheEntry, SqliteStore, UrlMatch};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One summary backing an answer, cached or freshly fetched
#[derive(Debug, Clone)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub similarity: f32,
    pub cached: bool,
}

/// Result of one retrieval pass
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub summaries: Vec<PageSummary>,
    pub cache_hits: usize,
    pub new_fetches: usize,
    pub errors: Vec<String>,
    pub total_fetch_time: Duration,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
    #[serde(rename = "keyPoints", default)]
    key_points: Vec<String>,
}

const SUMMARIZE_SYSTEM: &str = "You summarize organization web pages for people asking \
questions about the organization. Be accurate and concise. \
Always respond with valid JSON only, no markdown formatting.";

/// Length of the raw-text fallback summary when the model's response cannot
/// be parsed
const FALLBACK_SUMMARY_CHARS: usize = 200;

/// Similarity assigned to keyword-search fallback matches
const KEYWORD_FALLBACK_SIMILARITY: f32 = 0.5;

/// Broad-query vocabulary: questions needing comprehensive pages
const BROAD_TERMS: &[&str] = &[
    "services", "treatments", "what do you", "what does", "what can you",
    "about", "hours", "schedule", "contact", "insurance", "accepted",
    "location", "address", "parking", "phone", "email",
    "cost", "price", "payment", "billing",
    "overview", "general", "everything",
];

/// Specific-condition vocabulary: questions best served by narrow pages
const SPECIFIC_TERMS: &[&str] = &[
    "sinusitis", "hearing loss", "tinnitus", "sleep apnea",
    "deviated septum", "tonsils", "thyroid", "allergy", "vertigo",
    "ear infection", "throat pain",
];

/// Narrow page vocabulary penalized when ranking for broad queries
const NARROW_PAGE_TERMS: &[&str] = &["sinusitis", "balloon", "deviated", "tonsillectomy", "thyroidectomy"];

/// Finds, fetches, and summarizes the pages relevant to one query
pub struct IntelligentFetcher {
    store: SqliteStore,
    embedder: Arc<dyn Embedder>,
    completions: Arc<dyn CompletionClient>,
    fetcher: PageFetcher,
    config: FetchConfig,
    events: SharedSink,
}

impl IntelligentFetcher {
    pub fn new(
        store: SqliteStore,
        embedder: Arc<dyn Embedder>,
        completions: Arc<dyn CompletionClient>,
        fetcher: PageFetcher,
        config: FetchConfig,
        events: SharedSink,
    ) -> Self {
        Self {
            store,
            embedder,
            completions,
            fetcher,
            config,
            events,
        }
    }

    /// Retrieve up to `max_pages` relevant summaries for a query
    ///
    /// Cached rows fresh within `ttl_hours` are served without network I/O;
    /// the rest are fetched in bounded batches. Never errors: per-URL
    /// failures land in the outcome's error list.
    pub async fn retrieve(
        &self,
        org_id: i64,
        query: &str,
        ttl_hours: i64,
        max_pages: usize,
    ) -> FetchOutcome {
        let started = Instant::now();
        let mut outcome = FetchOutcome::default();

        let query_embedding = embed_or_zero(self.embedder.as_ref(), query).await;
        let candidates = self
            .find_relevant_urls(org_id, query, &query_embedding, max_pages)
            .await;

        if candidates.is_empty() {
            debug!("No candidate URLs for query");
            outcome.total_fetch_time = started.elapsed();
            return outcome;
        }

        let urls: Vec<String> = candidates.iter().map(|m| m.url.clone()).collect();
        let cached = match self.store.cache_lookup(org_id, &urls, ttl_hours).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Cache lookup failed, treating all URLs as uncached: {}", e);
                outcome.errors.push(format!("cache lookup: {}", e));
                Vec::new()
            }
        };

        let similarity_of = |url: &str| {
            candidates
                .iter()
                .find(|m| m.url == url)
                .map(|m| m.similarity)
                .unwrap_or(0.0)
        };

        let cached_urls: Vec<String> = cached.iter().map(|c| c.url.clone()).collect();
        for page in &cached {
            outcome.summaries.push(PageSummary {
                url: page.url.clone(),
                title: page.title.clone(),
                summary: page.summary.clone(),
                similarity: similarity_of(&page.url),
                cached: true,
            });
        }
        outcome.cache_hits = cached.len();
        if !cached_urls.is_empty() {
            self.store.track_access(org_id, &cached_urls).await;
        }

        let to_fetch: Vec<UrlMatch> = candidates
            .into_iter()
            .filter(|m| !cached_urls.contains(&m.url))
            .collect();

        if !to_fetch.is_empty() {
            info!(
                "Fetching {} pages ({} served from cache)",
                to_fetch.len(),
                outcome.cache_hits
            );
            let total = to_fetch.len();
            let results = process_in_batches(
                to_fetch,
                self.config.concurrency,
                Duration::from_millis(self.config.batch_delay_ms),
                |candidate| async move { self.fetch_and_summarize(candidate).await },
            )
            .await;
            self.events.emit(ProgressEvent::BatchCompleted {
                completed: total,
                total,
            });

            let mut new_entries = Vec::new();
            for result in results {
                match result {
                    Ok((entry, summary)) => {
                        new_entries.push(entry);
                        outcome.summaries.push(summary);
                        outcome.new_fetches += 1;
                    }
                    Err(e) => outcome.errors.push(e.to_string()),
                }
            }

            if !new_entries.is_empty() {
                if let Err(e) = self.store.cache_upsert(org_id, &new_entries).await {
                    warn!("Cache write failed: {}", e);
                    outcome.errors.push(format!("cache write: {}", e));
                }
            }
        }

        outcome.summaries.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        outcome.total_fetch_time = started.elapsed();
        outcome
    }

    /// Rank indexed URLs for a query
    ///
    /// Vector search over a candidate pool twice the requested size, then
    /// intent-aware re-ranking; keyword matching is the fallback when
    /// vector search fails or returns nothing.
    async fn find_relevant_urls(
        &self,
        org_id: i64,
        query: &str,
        query_embedding: &[f32],
        max_results: usize,
    ) -> Vec<UrlMatch> {
        let pool_size = max_results * 2;
        match self
            .store
            .similarity_search(org_id, query_embedding, self.config.similarity_floor, pool_size)
            .await
        {
            Ok(matches) if !matches.is_empty() => {
                let mut ranked = apply_intelligent_ranking(query, matches);
                ranked.truncate(max_results);
                ranked
            }
            Ok(_) => {
                debug!("Vector search returned nothing, falling back to keywords");
                self.keyword_fallback(org_id, query, max_results).await
            }
            Err(e) => {
                warn!("Vector search failed, falling back to keywords: {}", e);
                self.keyword_fallback(org_id, query, max_results).await
            }
        }
    }

    async fn keyword_fallback(&self, org_id: i64, query: &str, max_results: usize) -> Vec<UrlMatch> {
        match self.store.keyword_search(org_id, query, max_results).await {
            Ok(mut matches) => {
                for m in &mut matches {
                    m.similarity = KEYWORD_FALLBACK_SIMILARITY;
                }
                matches
            }
            Err(e) => {
                warn!("Keyword search failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Fetch one page, summarize it, and prepare its cache entry
    async fn fetch_and_summarize(
        &self,
        candidate: UrlMatch,
    ) -> Result<(CacheEntry, PageSummary)> {
        let fetched = self.fetcher.fetch(&candidate.url).await?;
        if !fetched.is_usable() {
            return Err(Error::Fetch(format!(
                "{}: HTTP {}",
                candidate.url, fetched.status
            )));
        }

        let content = extract_page_content(&fetched.body);
        if content.clean_text.is_empty() {
            return Err(Error::Parse(format!("{}: no readable content", candidate.url)));
        }

        let title = if content.title.is_empty() {
            candidate.title.clone()
        } else {
            content.title.clone()
        };

        let (summary, key_points) = self.summarize(&title, &content.clean_text).await;
        let embedding_text = format!("{} {} {}", title, summary, key_points.join(" "));
        let embedding = embed_or_zero(self.embedder.as_ref(), &embedding_text).await;

        let entry = CacheEntry {
            url: candidate.url.clone(),
            title: title.clone(),
            summary: summary.clone(),
            content_hash: content_hash(&content.clean_text),
            embedding,
            response_time_ms: fetched.elapsed_ms as i64,
        };
        let page_summary = PageSummary {
            url: candidate.url,
            title,
            summary,
            similarity: candidate.similarity,
            cached: false,
        };
        Ok((entry, page_summary))
    }

    /// Summarize cleaned page text
    ///
    /// Structured response; a parse failure degrades to a raw-text
    /// truncation rather than dropping the page.
    async fn summarize(&self, title: &str, clean_text: &str) -> (String, Vec<String>) {
        let capped: String = clean_text.chars().take(self.config.max_content_chars).collect();
        let prompt = format!(
            "Summarize this page in 2-3 sentences focused on what a visitor would want \
to know, plus 3-5 key points.\n\nPage title: {}\n\nPage content:\n{}\n\n\
Return JSON: {{\"summary\": \"...\", \"keyPoints\": [\"...\"]}}",
            title, capped
        );

        let raw = match self
            .completions
            .complete(
                CompletionRequest::new(SUMMARIZE_SYSTEM, prompt)
                    .temperature(0.3)
                    .max_tokens(400)
                    .json_response(),
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Summarization failed, truncating raw text: {}", e);
                return (truncate_summary(&capped), Vec::new());
            }
        };

        match parse_structured::<SummaryResponse>(&raw) {
            Structured::Ok(response) => (response.summary, response.key_points),
            Structured::ParseFailure(_) => {
                warn!("Summary response was not valid JSON, truncating raw text");
                (truncate_summary(&capped), Vec::new())
            }
        }
    }
}

fn truncate_summary(text: &str) -> String {
    text.chars().take(FALLBACK_SUMMARY_CHARS).collect()
}

/// Re-rank candidates by query scope
///
/// Specific queries trust vector similarity; broad queries favor
/// comprehensive pages (home/services/about, shallow depth, more content).
pub fn apply_intelligent_ranking(query: &str, mut matches: Vec<UrlMatch>) -> Vec<UrlMatch> {
    let query_lower = query.to_lowercase();

    if !is_broad_query(&query_lower) {
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        return matches;
    }

    let mut scored: Vec<(f32, UrlMatch)> = matches
        .into_iter()
        .map(|m| (comprehensive_score(&m), m))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, m)| m).collect()
}

/// Broad when the query uses overview vocabulary, or names nothing specific
fn is_broad_query(query_lower: &str) -> bool {
    let has_broad = BROAD_TERMS.iter().any(|t| query_lower.contains(t));
    let has_specific = SPECIFIC_TERMS.iter().any(|t| query_lower.contains(t));
    has_broad || !has_specific
}

/// Comprehensiveness score for broad queries, clamped to [0, 1]
fn comprehensive_score(m: &UrlMatch) -> f32 {
    use crate::classify::PageType;

    let mut score = m.similarity * 0.4;

    score += match m.page_type {
        PageType::Home => 0.4,
        PageType::Services => 0.35,
        PageType::About => 0.3,
        PageType::Contact | PageType::Hours | PageType::Insurance => 0.25,
        _ => 0.0,
    };

    let url = m.url.to_lowercase();
    if url.ends_with('/') || url.contains("/home") {
        score += 0.15;
    }
    if url.contains("/services") || url.contains("/treatments") {
        score += 0.12;
    }
    if url.contains("/about") || url.contains("/our-practice") {
        score += 0.1;
    }
    if url.contains("/contact") || url.contains("/hours") || url.contains("/insurance") {
        score += 0.08;
    }

    let title = m.title.to_lowercase();
    if title.contains("services") || title.contains("treatments") || title.contains("what we do") {
        score += 0.1;
    }
    if title.contains("about") || title.contains("our practice") || title.contains("welcome") {
        score += 0.08;
    }
    if title.contains("home") && title.len() < 20 {
        score += 0.12;
    }

    if m.word_count > 500 {
        score += 0.05;
    }
    if m.crawl_depth <= 1 {
        score += 0.08;
    }
    if m.crawl_depth <= 2 {
        score += 0.04;
    }

    if NARROW_PAGE_TERMS.iter().any(|t| title.contains(t) || url.contains(t)) {
        score -= 0.15;
    }

    score.clamp(0.0, 1.0)
}
