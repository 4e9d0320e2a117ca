//! Sitemap XML parsing
//!
//! Supports:
//! - Standard sitemap.xml urlsets
//! - Sitemap index files (sitemapindex)
//! - Recursive sitemap index resolution
//!
//! Discovery tries four conventional sitemap locations before falling back
//! to crawling.

use crate::error::{Error, Result};
use reqwest::Client;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

/// Conventional sitemap paths, tried in order
const SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap/sitemap.xml",
    "/sitemaps/sitemap.xml",
];

/// Recursion cap when resolving sitemap indexes
const MAX_SITEMAPS: usize = 50;

/// Sitemap-based URL discovery
pub struct SitemapScanner {
    client: Client,
}

/// Result of parsing one sitemap document
enum ParseResult {
    /// A urlset containing page URLs
    UrlSet(Vec<String>),
    /// A sitemap index containing links to other sitemaps
    SitemapIndex(Vec<String>),
}

impl SitemapScanner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Discover page URLs for a domain via its sitemaps
    ///
    /// Tries each conventional path; the first sitemap that yields URLs
    /// wins. Results are filtered to the target domain and deduplicated.
    /// Returns an empty list when no sitemap is reachable.
    pub async fn discover(&self, base_url: &str, domain: &str) -> Vec<String> {
        for path in SITEMAP_PATHS {
            let sitemap_url = format!("{}{}", base_url.trim_end_matches('/'), path);
            debug!("Checking sitemap: {}", sitemap_url);

            match self.resolve(&sitemap_url).await {
                Ok(urls) if !urls.is_empty() => {
                    info!("Found {} URLs via {}", urls.len(), sitemap_url);
                    return filter_to_domain(urls, domain);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Sitemap {} not usable: {}", sitemap_url, e);
                }
            }
        }

        Vec::new()
    }

    /// Fetch a sitemap, resolving nested indexes up to the cap
    async fn resolve(&self, sitemap_url: &str) -> Result<Vec<String>> {
        let mut all_urls = Vec::new();
        let mut queue = vec![sitemap_url.to_string()];
        let mut processed = 0;

        while let Some(url) = queue.pop() {
            if processed >= MAX_SITEMAPS {
                warn!("Reached sitemap recursion cap ({}), stopping", MAX_SITEMAPS);
                break;
            }
            processed += 1;

            match self.fetch_and_parse(&url).await {
                Ok(ParseResult::UrlSet(urls)) => {
                    debug!("Found {} URLs in sitemap {}", urls.len(), url);
                    all_urls.extend(urls);
                }
                Ok(ParseResult::SitemapIndex(children)) => {
                    debug!("Sitemap index {} lists {} child sitemaps", url, children.len());
                    queue.extend(children);
                }
                Err(e) => {
                    warn!("Failed to parse sitemap {}: {}", url, e);
                }
            }
        }

        Ok(all_urls)
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<ParseResult> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(Error::Fetch(format!("HTTP {}: {}", response.status(), url)));
        }

        let content = response.text().await?;

        if content.contains("<sitemapindex") {
            Ok(parse_sitemap_index(&content))
        } else if content.contains("<urlset") {
            Ok(parse_urlset(&content))
        } else {
            Err(Error::Parse(format!("Not a sitemap document: {}", url)))
        }
    }
}

fn parse_urlset(content: &str) -> ParseResult {
    let mut urls = Vec::new();

    for url_block in content.split("<url>").skip(1) {
        if let Some(end) = url_block.find("</url>") {
            if let Some(loc) = extract_tag(&url_block[..end], "loc") {
                if Url::parse(&loc).is_ok() {
                    urls.push(loc);
                }
            }
        }
    }

    ParseResult::UrlSet(urls)
}

fn parse_sitemap_index(content: &str) -> ParseResult {
    let mut sitemaps = Vec::new();

    for sitemap_block in content.split("<sitemap>").skip(1) {
        if let Some(end) = sitemap_block.find("</sitemap>") {
            if let Some(loc) = extract_tag(&sitemap_block[..end], "loc") {
                if Url::parse(&loc).is_ok() {
                    sitemaps.push(loc);
                }
            }
        }
    }

    ParseResult::SitemapIndex(sitemaps)
}

/// Extract text content from an XML tag
fn extract_tag(content: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    content.find(&start_tag).and_then(|start| {
        let value_start = start + start_tag.len();
        content[value_start..]
            .find(&end_tag)
            .map(|end| content[value_start..value_start + end].trim().to_string())
    })
}

/// Keep only URLs whose host belongs to the target domain, deduplicated
fn filter_to_domain(urls: Vec<String>, domain: &str) -> Vec<String> {
    let bare_domain = domain
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.");

    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| {
            Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_string()))
                .map(|host| {
                    let host = host.trim_start_matches("www.");
                    host == bare_domain || host.ends_with(&format!(".{}", bare_domain))
                })
                .unwrap_or(false)
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
