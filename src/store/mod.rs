//! SQLite-backed storage
//!
//! One store covers the URL index, the page cache, the query log, and
//! crawl-status bookkeeping. Per-organization row counts are small (the
//! discovery page cap bounds the URL index), so vector similarity is
//! cosine computed in process over the loaded rows rather than delegated
//! to a vector database.

mod schema;

pub use schema::SCHEMA_SQL;

use crate::classify::{ClassifiedPage, PageType};
use crate::config::OrgConfig;
use crate::embed::cosine_similarity;
use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// URLs recommended for fetching when no confident cache match exists
const RECOMMENDED_URL_LIMIT: usize = 5;

/// One URL-index match with its similarity to the query
#[derive(Debug, Clone)]
pub struct UrlMatch {
    pub url: String,
    pub title: String,
    pub description: String,
    pub page_type: PageType,
    pub similarity: f32,
    pub word_count: i64,
    pub crawl_depth: i64,
}

/// One cached page summary, as stored
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub fetch_timestamp: DateTime<Utc>,
    pub response_time_ms: i64,
    pub access_count: i64,
}

/// A freshly produced summary ready for caching
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub response_time_ms: i64,
}

/// Output of the cache-vs-fetch decision
#[derive(Debug, Clone, Default)]
pub struct RagDecision {
    pub content_found: bool,
    pub best_match_url: String,
    pub best_match_title: String,
    pub best_match_summary: String,
    pub confidence_score: f32,
    pub recommended_urls: Vec<String>,
}

/// Append-only record of one answered query
#[derive(Debug, Clone)]
pub struct QueryLogRecord {
    pub query: String,
    pub intent: String,
    pub decision_confidence: f32,
    pub used_web_search: bool,
    pub urls_fetched: Vec<String>,
    pub cache_hit: bool,
    pub response_time_ms: i64,
    pub final_confidence: f32,
    pub error: Option<String>,
}

/// Aggregates over the query log
#[derive(Debug, Clone, Default, Serialize)]
pub struct Analytics {
    pub total_queries: i64,
    pub avg_confidence: f32,
    pub cache_hit_rate: f32,
    pub web_search_rate: f32,
    pub avg_response_time_ms: f32,
    pub popular_intents: Vec<IntentCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentCount {
    pub intent: String,
    pub count: i64,
}

/// Outcome of a discovery run, recorded per (organization, domain)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    Success,
    Partial,
    Failed,
}

impl std::fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CrawlStatus::Success => "success",
            CrawlStatus::Partial => "partial",
            CrawlStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UrlIndexRow {
    url: String,
    title: String,
    description: String,
    keywords: String,
    page_type: String,
    title_embedding: String,
    crawl_depth: i64,
    word_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct PageCacheRow {
    url: String,
    title: String,
    summary: String,
    content_hash: String,
    embedding: String,
    fetch_timestamp: String,
    response_time_ms: i64,
    access_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct QueryLogRow {
    intent: String,
    used_web_search: bool,
    cache_hit: bool,
    response_time_ms: i64,
    final_confidence: f64,
}

fn parse_embedding(json: &str) -> Vec<f32> {
    serde_json::from_str(json).unwrap_or_default()
}

fn embedding_json(embedding: &[f32]) -> String {
    serde_json::to_string(embedding).unwrap_or_else(|_| "[]".to_string())
}

impl PageCacheRow {
    fn into_cached_page(self) -> CachedPage {
        let fetch_timestamp = DateTime::parse_from_rfc3339(&self.fetch_timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        CachedPage {
            url: self.url,
            title: self.title,
            summary: self.summary,
            content_hash: self.content_hash,
            embedding: parse_embedding(&self.embedding),
            fetch_timestamp,
            response_time_ms: self.response_time_ms,
            access_count: self.access_count,
        }
    }
}

/// SQLite store for all persisted engine state
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a file-backed store with WAL journaling
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        debug!("Opened store at {:?}", path);
        Ok(store)
    }

    /// Open an in-memory store (tests)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- organization configuration ---

    /// Per-organization answering policy, if the organization is known
    pub async fn get_org_config(&self, org_id: i64) -> Result<Option<OrgConfig>> {
        let row: Option<(f64, i64, bool, i64, Option<String>)> = sqlx::query_as(
            "SELECT confidence_threshold, cache_expiry_hours, enable_web_search, \
             max_web_pages_per_query, website_url FROM organizations WHERE id = ?",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(threshold, expiry, web_search, max_pages, website_url)| OrgConfig {
                confidence_threshold: threshold as f32,
                cache_expiry_hours: expiry,
                enable_web_search: web_search,
                max_web_pages_per_query: max_pages.max(0) as usize,
                website_url,
            },
        ))
    }

    pub async fn upsert_org_config(&self, org_id: i64, config: &OrgConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO organizations \
             (id, website_url, confidence_threshold, cache_expiry_hours, enable_web_search, max_web_pages_per_query) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             website_url = excluded.website_url, \
             confidence_threshold = excluded.confidence_threshold, \
             cache_expiry_hours = excluded.cache_expiry_hours, \
             enable_web_search = excluded.enable_web_search, \
             max_web_pages_per_query = excluded.max_web_pages_per_query",
        )
        .bind(org_id)
        .bind(&config.website_url)
        .bind(config.confidence_threshold as f64)
        .bind(config.cache_expiry_hours)
        .bind(config.enable_web_search)
        .bind(config.max_web_pages_per_query as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- URL index ---

    /// Replace the organization's URL index with a new discovery run
    ///
    /// Delete and insert happen in one transaction so readers never observe
    /// an empty or partially populated index.
    pub async fn replace_url_index(&self, org_id: i64, pages: &[ClassifiedPage]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM url_index WHERE org_id = ?")
            .bind(org_id)
            .execute(&mut *tx)
            .await?;

        for classified in pages {
            let page = &classified.page;
            sqlx::query(
                "INSERT INTO url_index \
                 (org_id, url, title, description, keywords, page_type, title_embedding, \
                  crawl_depth, is_accessible, http_status, word_count, has_forms, \
                  has_contact_info, has_scheduling) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(org_id)
            .bind(&page.url)
            .bind(&page.title)
            .bind(&page.description)
            .bind(serde_json::to_string(&page.keywords)?)
            .bind(classified.page_type.to_string())
            .bind(embedding_json(&classified.title_embedding))
            .bind(page.crawl_depth as i64)
            .bind(page.is_accessible)
            .bind(page.http_status as i64)
            .bind(page.word_count as i64)
            .bind(page.has_forms)
            .bind(page.has_contact_info)
            .bind(page.has_scheduling)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Replaced URL index for org {}: {} pages", org_id, pages.len());
        Ok(())
    }

    async fn accessible_url_rows(&self, org_id: i64) -> Result<Vec<UrlIndexRow>> {
        let rows: Vec<UrlIndexRow> = sqlx::query_as(
            "SELECT url, title, description, keywords, page_type, title_embedding, \
             crawl_depth, word_count \
             FROM url_index WHERE org_id = ? AND is_accessible = 1",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Rank accessible indexed URLs by cosine similarity to the query
    ///
    /// Rows below the similarity floor are dropped.
    pub async fn similarity_search(
        &self,
        org_id: i64,
        query_embedding: &[f32],
        similarity_floor: f32,
        limit: usize,
    ) -> Result<Vec<UrlMatch>> {
        let rows = self.accessible_url_rows(org_id).await?;

        let mut matches: Vec<UrlMatch> = rows
            .into_iter()
            .filter_map(|row| {
                let embedding = parse_embedding(&row.title_embedding);
                let similarity = cosine_similarity(query_embedding, &embedding);
                if similarity < similarity_floor {
                    return None;
                }
                Some(UrlMatch {
                    url: row.url,
                    title: row.title,
                    description: row.description,
                    page_type: PageType::from_str(&row.page_type).unwrap_or(PageType::Other),
                    similarity,
                    word_count: row.word_count,
                    crawl_depth: row.crawl_depth,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);
        Ok(matches)
    }

    /// Term matching over title/description/keywords, used when vector
    /// search fails or returns nothing
    ///
    /// Matches carry a fixed nominal similarity of 0.5.
    pub async fn keyword_search(
        &self,
        org_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<UrlMatch>> {
        let rows = self.accessible_url_rows(org_id).await?;
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();

        let mut matches: Vec<UrlMatch> = rows
            .into_iter()
            .filter(|row| {
                let haystack = format!(
                    "{} {} {}",
                    row.title.to_lowercase(),
                    row.description.to_lowercase(),
                    row.keywords.to_lowercase()
                );
                terms.iter().any(|t| haystack.contains(t))
            })
            .map(|row| UrlMatch {
                page_type: PageType::from_str(&row.page_type).unwrap_or(PageType::Other),
                url: row.url,
                title: row.title,
                description: row.description,
                similarity: 0.5,
                word_count: row.word_count,
                crawl_depth: row.crawl_depth,
            })
            .collect();

        matches.truncate(limit);
        Ok(matches)
    }

    // --- page cache ---

    /// Cached rows for the given URLs fetched within the TTL window
    ///
    /// A pure store read; never touches the network.
    pub async fn cache_lookup(
        &self,
        org_id: i64,
        urls: &[String],
        ttl_hours: i64,
    ) -> Result<Vec<CachedPage>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<PageCacheRow> = sqlx::query_as(
            "SELECT url, title, summary, content_hash, embedding, fetch_timestamp, \
             response_time_ms, access_count FROM page_cache WHERE org_id = ?",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        let cutoff = Utc::now() - ChronoDuration::hours(ttl_hours);
        Ok(rows
            .into_iter()
            .map(PageCacheRow::into_cached_page)
            .filter(|page| urls.contains(&page.url) && page.fetch_timestamp > cutoff)
            .collect())
    }

    /// Idempotent write keyed by (org, url)
    pub async fn cache_upsert(&self, org_id: i64, entries: &[CacheEntry]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for entry in entries {
            sqlx::query(
                "INSERT INTO page_cache \
                 (org_id, url, title, summary, content_hash, embedding, fetch_timestamp, response_time_ms) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(org_id, url) DO UPDATE SET \
                 title = excluded.title, \
                 summary = excluded.summary, \
                 content_hash = excluded.content_hash, \
                 embedding = excluded.embedding, \
                 fetch_timestamp = excluded.fetch_timestamp, \
                 response_time_ms = excluded.response_time_ms",
            )
            .bind(org_id)
            .bind(&entry.url)
            .bind(&entry.title)
            .bind(&entry.summary)
            .bind(&entry.content_hash)
            .bind(embedding_json(&entry.embedding))
            .bind(&now)
            .bind(entry.response_time_ms)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Delete cache rows for URLs whose source content is known to have
    /// changed
    pub async fn cache_invalidate(&self, org_id: i64, urls: &[String]) -> Result<u64> {
        let mut deleted = 0;
        for url in urls {
            let result = sqlx::query("DELETE FROM page_cache WHERE org_id = ? AND url = ?")
                .bind(org_id)
                .bind(url)
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    /// Increment access counters for served cache rows (best-effort)
    pub async fn track_access(&self, org_id: i64, urls: &[String]) {
        for url in urls {
            let result = sqlx::query(
                "UPDATE page_cache SET access_count = access_count + 1 \
                 WHERE org_id = ? AND url = ?",
            )
            .bind(org_id)
            .bind(url)
            .execute(&self.pool)
            .await;
            if let Err(e) = result {
                warn!("Access tracking failed for {}: {}", url, e);
            }
        }
    }

    // --- decision policy ---

    /// One round trip combining the cache similarity check and the URL
    /// recommendation fallback
    ///
    /// A fresh cache row at or above the threshold wins; otherwise the top
    /// accessible URL-index matches come back as fetch recommendations.
    pub async fn hybrid_decision(
        &self,
        org_id: i64,
        query_embedding: &[f32],
        confidence_threshold: f32,
        ttl_hours: i64,
        similarity_floor: f32,
    ) -> Result<RagDecision> {
        let rows: Vec<PageCacheRow> = sqlx::query_as(
            "SELECT url, title, summary, content_hash, embedding, fetch_timestamp, \
             response_time_ms, access_count FROM page_cache WHERE org_id = ?",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        let cutoff = Utc::now() - ChronoDuration::hours(ttl_hours);
        let best = rows
            .into_iter()
            .map(PageCacheRow::into_cached_page)
            .filter(|page| page.fetch_timestamp > cutoff)
            .map(|page| {
                let similarity = cosine_similarity(query_embedding, &page.embedding);
                (page, similarity)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((page, similarity)) = best {
            if similarity >= confidence_threshold {
                return Ok(RagDecision {
                    content_found: true,
                    best_match_url: page.url,
                    best_match_title: page.title,
                    best_match_summary: page.summary,
                    confidence_score: similarity,
                    recommended_urls: Vec::new(),
                });
            }
        }

        let recommendations = self
            .similarity_search(org_id, query_embedding, similarity_floor, RECOMMENDED_URL_LIMIT)
            .await?;

        Ok(RagDecision {
            content_found: false,
            confidence_score: 0.0,
            recommended_urls: recommendations.into_iter().map(|m| m.url).collect(),
            ..Default::default()
        })
    }

    // --- query log + analytics ---

    pub async fn log_query(&self, org_id: i64, record: &QueryLogRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO query_logs \
             (org_id, query, intent, decision_confidence, used_web_search, urls_fetched, \
              cache_hit, response_time_ms, final_confidence, error, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(org_id)
        .bind(&record.query)
        .bind(&record.intent)
        .bind(record.decision_confidence as f64)
        .bind(record.used_web_search)
        .bind(serde_json::to_string(&record.urls_fetched)?)
        .bind(record.cache_hit)
        .bind(record.response_time_ms)
        .bind(record.final_confidence as f64)
        .bind(&record.error)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Aggregates over the last `days_back` days of query logs
    pub async fn analytics(&self, org_id: i64, days_back: i64) -> Result<Analytics> {
        let cutoff = (Utc::now() - ChronoDuration::days(days_back)).to_rfc3339();
        let rows: Vec<QueryLogRow> = sqlx::query_as(
            "SELECT intent, used_web_search, cache_hit, response_time_ms, final_confidence \
             FROM query_logs WHERE org_id = ? AND created_at >= ?",
        )
        .bind(org_id)
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        let total = rows.len() as i64;
        if total == 0 {
            return Ok(Analytics::default());
        }

        let mut intent_counts: HashMap<String, i64> = HashMap::new();
        let mut confidence_sum = 0.0;
        let mut cache_hits = 0;
        let mut web_searches = 0;
        let mut time_sum = 0.0;

        for row in &rows {
            *intent_counts.entry(row.intent.clone()).or_default() += 1;
            confidence_sum += row.final_confidence;
            if row.cache_hit {
                cache_hits += 1;
            }
            if row.used_web_search {
                web_searches += 1;
            }
            time_sum += row.response_time_ms as f64;
        }

        let mut popular_intents: Vec<IntentCount> = intent_counts
            .into_iter()
            .map(|(intent, count)| IntentCount { intent, count })
            .collect();
        popular_intents.sort_by(|a, b| b.count.cmp(&a.count).then(a.intent.cmp(&b.intent)));

        Ok(Analytics {
            total_queries: total,
            avg_confidence: (confidence_sum / total as f64) as f32,
            cache_hit_rate: cache_hits as f32 / total as f32,
            web_search_rate: web_searches as f32 / total as f32,
            avg_response_time_ms: (time_sum / total as f64) as f32,
            popular_intents,
        })
    }

    // --- crawl status ---

    /// Record the outcome of a discovery run against the organization's
    /// domain
    pub async fn update_crawl_status(
        &self,
        org_id: i64,
        domain: &str,
        status: CrawlStatus,
        pages_discovered: usize,
        pages_accessible: usize,
        errors: &[String],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO crawl_status \
             (org_id, domain, last_crawled, status, pages_discovered, pages_accessible, errors) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(org_id, domain) DO UPDATE SET \
             last_crawled = excluded.last_crawled, \
             status = excluded.status, \
             pages_discovered = excluded.pages_discovered, \
             pages_accessible = excluded.pages_accessible, \
             errors = excluded.errors",
        )
        .bind(org_id)
        .bind(domain)
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(pages_discovered as i64)
        .bind(pages_accessible as i64)
        .bind(serde_json::to_string(errors)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
