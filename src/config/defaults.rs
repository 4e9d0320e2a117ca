//! Default values for configuration

use std::path::PathBuf;

/// Default OpenAI-compatible API base URL
pub fn default_api_base_url() -> String {
    std::env::var("SITERAG_API_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}

/// Default environment variable name holding the API key
pub fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Default completion model
pub fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

/// Default embedding dimension (must match model)
pub fn default_embedding_dimension() -> usize {
    1536
}

/// Default database file location
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("siterag")
        .join("siterag.db")
}

/// Default user agent for outbound requests
pub fn default_user_agent() -> String {
    format!("siterag/{} (site assistant)", env!("CARGO_PKG_VERSION"))
}

/// Default maximum crawl depth from the site root
pub fn default_discovery_max_depth() -> u32 {
    3
}

/// Default maximum pages per discovery run
pub fn default_discovery_max_pages() -> usize {
    50
}

/// Default simultaneous requests during discovery
pub fn default_discovery_concurrency() -> usize {
    5
}

/// Default discovery request timeout in seconds
pub fn default_discovery_timeout_secs() -> u64 {
    10
}

/// Default delay between discovery batches in milliseconds
pub fn default_discovery_batch_delay_ms() -> u64 {
    1000
}

/// Default classification batch size (bounded by provider rate limits)
pub fn default_classify_batch_size() -> usize {
    10
}

/// Default simultaneous fetches during content retrieval
pub fn default_fetch_concurrency() -> usize {
    3
}

/// Default content fetch timeout in seconds
pub fn default_fetch_timeout_secs() -> u64 {
    15
}

/// Default delay between fetch batches in milliseconds
pub fn default_fetch_batch_delay_ms() -> u64 {
    1000
}

/// Default cap on cleaned text sent for summarization
pub fn default_max_content_chars() -> usize {
    8000
}

/// Default minimum vector similarity for URL candidates
pub fn default_similarity_floor() -> f32 {
    0.3
}

/// Per-organization default confidence threshold
pub fn default_confidence_threshold() -> f32 {
    0.6
}

/// Per-organization default cache TTL in hours
pub fn default_cache_expiry_hours() -> i64 {
    24
}

/// Per-organization default web search enablement
pub fn default_enable_web_search() -> bool {
    true
}

/// Per-organization default page cap per query
pub fn default_max_web_pages_per_query() -> usize {
    3
}
