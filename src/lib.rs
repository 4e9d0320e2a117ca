//! siterag: hybrid retrieval-augmented answering over an organization's website
//!
//! The engine answers natural-language questions about a specific
//! organization's public website. It keeps a per-organization URL index
//! (built by sitemap parsing or bounded crawling), a TTL'd cache of page
//! summaries, and a confidence-gated decision policy that chooses between
//! serving cached knowledge and fetching fresh pages.

pub mod classify;
pub mod config;
pub mod crawl;
pub mod embed;
pub mod error;
pub mod events;
pub mod llm;
pub mod parse;
pub mod rag;
pub mod retrieve;
pub mod store;

pub use config::{EngineConfig, OrgConfig};
pub use error::{Error, Result};
pub use rag::{RagEngine, RagQuery, RagResult, RagSource};
