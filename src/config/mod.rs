//! Configuration management for siterag
//!
//! Two layers of configuration:
//! - [`EngineConfig`]: process-wide tuning (crawl limits, fetch limits,
//!   model names, database path), loaded from a TOML file or defaults.
//! - [`OrgConfig`]: per-organization answering policy (confidence
//!   threshold, cache TTL, web-search enablement), stored alongside the
//!   organization record and fetched per query with fixed fallbacks.

mod defaults;

pub use defaults::*;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Process-wide engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Completion model identifier
    #[serde(default = "default_completion_model")]
    pub completion_model: String,

    /// Embedding model identifier
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embedding dimension (must match the model)
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User agent for all outbound page requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Site discovery tuning
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Content fetch tuning
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// Site discovery (sitemap + crawl) tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Maximum crawl depth from the site root
    #[serde(default = "default_discovery_max_depth")]
    pub max_depth: u32,

    /// Maximum pages per discovery run
    #[serde(default = "default_discovery_max_pages")]
    pub max_pages: usize,

    /// Simultaneous outbound requests
    #[serde(default = "default_discovery_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_discovery_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between request batches in milliseconds
    #[serde(default = "default_discovery_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Pages per classification batch
    #[serde(default = "default_classify_batch_size")]
    pub classify_batch_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: default_discovery_max_depth(),
            max_pages: default_discovery_max_pages(),
            concurrency: default_discovery_concurrency(),
            timeout_secs: default_discovery_timeout_secs(),
            batch_delay_ms: default_discovery_batch_delay_ms(),
            classify_batch_size: default_classify_batch_size(),
        }
    }
}

/// Content fetch (query-time retrieval) tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Simultaneous outbound fetches
    #[serde(default = "default_fetch_concurrency")]
    pub concurrency: usize,

    /// Per-fetch timeout in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between fetch batches in milliseconds
    #[serde(default = "default_fetch_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Cap on cleaned text sent for summarization
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Minimum vector similarity for URL candidates
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_fetch_concurrency(),
            timeout_secs: default_fetch_timeout_secs(),
            batch_delay_ms: default_fetch_batch_delay_ms(),
            max_content_chars: default_max_content_chars(),
            similarity_floor: default_similarity_floor(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key_env: default_api_key_env(),
            completion_model: default_completion_model(),
            embedding_model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            discovery: DiscoveryConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Resolve the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

/// Per-organization answering policy
///
/// Read per query from the organization record; a missing or erroring row
/// degrades to these defaults rather than failing the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgConfig {
    /// Minimum similarity to treat cached content as sufficient
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Hours after which a cached summary is stale
    #[serde(default = "default_cache_expiry_hours")]
    pub cache_expiry_hours: i64,

    /// Whether fresh fetching is allowed at all
    #[serde(default = "default_enable_web_search")]
    pub enable_web_search: bool,

    /// Cap on pages fetched for a single query
    #[serde(default = "default_max_web_pages_per_query")]
    pub max_web_pages_per_query: usize,

    /// The organization's website root
    #[serde(default)]
    pub website_url: Option<String>,
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            cache_expiry_hours: default_cache_expiry_hours(),
            enable_web_search: default_enable_web_search(),
            max_web_pages_per_query: default_max_web_pages_per_query(),
            website_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.embedding_dimension, 1536);
        assert_eq!(config.discovery.max_depth, 3);
        assert_eq!(config.discovery.max_pages, 50);
        assert_eq!(config.fetch.concurrency, 3);
        assert!((config.fetch.similarity_floor - 0.3).abs() < f32::EPSILON);

        let org = OrgConfig::default();
        assert!((org.confidence_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(org.cache_expiry_hours, 24);
        assert!(org.enable_web_search);
        assert_eq!(org.max_web_pages_per_query, 3);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = EngineConfig::load(Path::new("/nonexistent/siterag.toml")).unwrap();
        assert_eq!(config.completion_model, "gpt-4o-mini");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: EngineConfig =
            toml::from_str("completion_model = \"gpt-4o\"\n[fetch]\nconcurrency = 2\n").unwrap();
        assert_eq!(parsed.completion_model, "gpt-4o");
        assert_eq!(parsed.fetch.concurrency, 2);
        assert_eq!(parsed.fetch.timeout_secs, 15);
        assert_eq!(parsed.discovery.max_pages, 50);
    }
}
