//! SQLite schema
//!
//! All tables are scoped by organization id. Embeddings are stored as JSON
//! arrays; at most `max_pages` URL rows exist per organization, so vector
//! similarity is computed in process over the loaded rows.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id INTEGER PRIMARY KEY,
    website_url TEXT,
    confidence_threshold REAL NOT NULL DEFAULT 0.6,
    cache_expiry_hours INTEGER NOT NULL DEFAULT 24,
    enable_web_search INTEGER NOT NULL DEFAULT 1,
    max_web_pages_per_query INTEGER NOT NULL DEFAULT 3
);

CREATE TABLE IF NOT EXISTS url_index (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    keywords TEXT NOT NULL DEFAULT '[]',
    page_type TEXT NOT NULL DEFAULT 'other',
    title_embedding TEXT NOT NULL DEFAULT '[]',
    crawl_depth INTEGER NOT NULL DEFAULT 0,
    is_accessible INTEGER NOT NULL DEFAULT 1,
    http_status INTEGER NOT NULL DEFAULT 0,
    word_count INTEGER NOT NULL DEFAULT 0,
    has_forms INTEGER NOT NULL DEFAULT 0,
    has_contact_info INTEGER NOT NULL DEFAULT 0,
    has_scheduling INTEGER NOT NULL DEFAULT 0,
    UNIQUE(org_id, url)
);

CREATE INDEX IF NOT EXISTS idx_url_index_org ON url_index(org_id, is_accessible);

CREATE TABLE IF NOT EXISTS page_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    summary TEXT NOT NULL DEFAULT '',
    content_hash TEXT NOT NULL DEFAULT '',
    embedding TEXT NOT NULL DEFAULT '[]',
    fetch_timestamp TEXT NOT NULL,
    response_time_ms INTEGER NOT NULL DEFAULT 0,
    access_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE(org_id, url)
);

CREATE INDEX IF NOT EXISTS idx_page_cache_org ON page_cache(org_id);

CREATE TABLE IF NOT EXISTS query_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    query TEXT NOT NULL,
    intent TEXT NOT NULL DEFAULT 'general',
    decision_confidence REAL NOT NULL DEFAULT 0,
    used_web_search INTEGER NOT NULL DEFAULT 0,
    urls_fetched TEXT NOT NULL DEFAULT '[]',
    cache_hit INTEGER NOT NULL DEFAULT 0,
    response_time_ms INTEGER NOT NULL DEFAULT 0,
    final_confidence REAL NOT NULL DEFAULT 0,
    error TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_query_logs_org_time ON query_logs(org_id, created_at);

CREATE TABLE IF NOT EXISTS crawl_status (
    org_id INTEGER NOT NULL,
    domain TEXT NOT NULL,
    last_crawled TEXT NOT NULL,
    status TEXT NOT NULL,
    pages_discovered INTEGER NOT NULL DEFAULT 0,
    pages_accessible INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (org_id, domain)
);
"#;
