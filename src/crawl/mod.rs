//! Site discovery
//!
//! Builds the page inventory for an organization's website. Sitemaps are
//! the preferred source; when no sitemap is reachable the discoverer falls
//! back to a bounded breadth-first crawl of internal links. Either way every
//! page is fetched once to extract the metadata the URL index stores.

mod batch;
mod sitemap;

pub use batch::process_in_batches;
pub use sitemap::SitemapScanner;

use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::events::{ProgressEvent, SharedSink};
use crate::parse::{extract_internal_links, extract_page_meta};
use reqwest::Client;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// One fetched HTTP response, before parsing
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub is_html: bool,
    pub body: String,
    pub elapsed_ms: u64,
}

impl FetchedPage {
    pub fn is_usable(&self) -> bool {
        self.status >= 200 && self.status < 300 && self.is_html
    }
}

/// One page in the discovered inventory
#[derive(Debug, Clone)]
pub struct DiscoveredPage {
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub crawl_depth: u32,
    pub is_accessible: bool,
    pub http_status: u16,
    pub word_count: usize,
    pub has_forms: bool,
    pub has_contact_info: bool,
    pub has_scheduling: bool,
}

/// HTTP page fetcher shared by discovery and the query-time fetch stage
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    /// Build a fetcher with the given user agent and per-request timeout
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| Error::Fetch(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Fetch one URL
    ///
    /// Transport failures (DNS, timeout, connection refused) are errors;
    /// HTTP error statuses come back as a [`FetchedPage`] so callers can
    /// record the page as inaccessible instead of losing it.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("{}: {}", url, e)))?;

        let status = response.status().as_u16();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(true);

        let body = if is_html {
            response
                .text()
                .await
                .map_err(|e| Error::Fetch(format!("{}: {}", url, e)))?
        } else {
            String::new()
        };

        Ok(FetchedPage {
            url: url.to_string(),
            status,
            is_html,
            body,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Result of one discovery run
#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub pages: Vec<DiscoveredPage>,
    pub errors: Vec<String>,
    pub duration: Duration,
    pub via_sitemap: bool,
}

/// Discovers the page inventory for a website
pub struct SiteDiscoverer {
    fetcher: PageFetcher,
    config: DiscoveryConfig,
    events: SharedSink,
}

impl SiteDiscoverer {
    pub fn new(fetcher: PageFetcher, config: DiscoveryConfig, events: SharedSink) -> Self {
        Self {
            fetcher,
            config,
            events,
        }
    }

    /// Discover pages for an organization's website
    ///
    /// Sitemap-first: when any conventional sitemap yields URLs, those are
    /// fetched directly (depth 0). Otherwise a breadth-first crawl from the
    /// site root follows internal links up to the configured depth. Both
    /// paths honor the page cap and record per-URL failures without
    /// aborting the run.
    pub async fn discover(&self, org_id: i64, website_url: &str) -> Result<DiscoveryOutcome> {
        let started = Instant::now();
        let base = Url::parse(website_url)
            .map_err(|e| Error::Fetch(format!("Invalid website URL {}: {}", website_url, e)))?;
        let domain = base
            .host_str()
            .ok_or_else(|| Error::Fetch(format!("No host in URL: {}", website_url)))?
            .trim_start_matches("www.")
            .to_string();

        self.events.emit(ProgressEvent::DiscoveryStarted {
            org_id,
            domain: domain.clone(),
        });

        let scanner = SitemapScanner::new(self.fetcher.client());
        let base_root = format!("{}://{}", base.scheme(), base.authority());
        let mut sitemap_urls = scanner.discover(&base_root, &domain).await;
        sitemap_urls.truncate(self.config.max_pages);

        let (pages, errors, via_sitemap) = if sitemap_urls.is_empty() {
            info!("No sitemap found for {}, crawling from root", domain);
            let (pages, errors) = self.crawl(website_url).await;
            (pages, errors, false)
        } else {
            info!("Sitemap yielded {} URLs for {}", sitemap_urls.len(), domain);
            let (pages, errors) = self.process_urls(sitemap_urls).await;
            (pages, errors, true)
        };

        info!(
            "Discovery for {} finished: {} pages, {} errors",
            domain,
            pages.len(),
            errors.len()
        );

        Ok(DiscoveryOutcome {
            pages,
            errors,
            duration: started.elapsed(),
            via_sitemap,
        })
    }

    /// Fetch sitemap-provided URLs in bounded batches
    async fn process_urls(&self, urls: Vec<String>) -> (Vec<DiscoveredPage>, Vec<String>) {
        let total = urls.len();
        let results = process_in_batches(
            urls,
            self.config.concurrency,
            Duration::from_millis(self.config.batch_delay_ms),
            |url| async move { self.build_page(url, 0).await },
        )
        .await;

        self.events.emit(ProgressEvent::BatchCompleted {
            completed: total,
            total,
        });

        let mut pages = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(page) => pages.push(page),
                Err(e) => errors.push(e.to_string()),
            }
        }
        (pages, errors)
    }

    /// Breadth-first crawl from the site root
    async fn crawl(&self, root_url: &str) -> (Vec<DiscoveredPage>, Vec<String>) {
        let mut pages = Vec::new();
        let mut errors = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![root_url.to_string()];
        visited.insert(root_url.to_string());

        for depth in 0..=self.config.max_depth {
            if frontier.is_empty() || pages.len() >= self.config.max_pages {
                break;
            }

            let remaining = self.config.max_pages - pages.len();
            frontier.truncate(remaining);
            debug!("Crawling depth {}: {} URLs", depth, frontier.len());

            let batch_total = frontier.len();
            let results = process_in_batches(
                std::mem::take(&mut frontier),
                self.config.concurrency,
                Duration::from_millis(self.config.batch_delay_ms),
                |url| async move {
                    match self.fetcher.fetch(&url).await {
                        Ok(fetched) => {
                            let links = if fetched.is_usable() {
                                extract_internal_links(&fetched.body, &url)
                            } else {
                                Vec::new()
                            };
                            (Ok(page_from_fetched(url, depth, fetched)), links)
                        }
                        Err(e) => (Err(e), Vec::new()),
                    }
                },
            )
            .await;

            self.events.emit(ProgressEvent::BatchCompleted {
                completed: batch_total,
                total: batch_total,
            });

            for (page, links) in results {
                match page {
                    Ok(page) => {
                        pages.push(page);
                        if depth < self.config.max_depth {
                            for link in links {
                                if visited.insert(link.clone()) {
                                    frontier.push(link);
                                }
                            }
                        }
                    }
                    Err(e) => errors.push(e.to_string()),
                }
            }
        }

        pages.truncate(self.config.max_pages);
        (pages, errors)
    }

    /// Fetch one URL and extract its index metadata
    async fn build_page(&self, url: String, depth: u32) -> Result<DiscoveredPage> {
        let fetched = self.fetcher.fetch(&url).await?;
        Ok(page_from_fetched(url, depth, fetched))
    }
}

fn page_from_fetched(url: String, depth: u32, fetched: FetchedPage) -> DiscoveredPage {
    let meta = if fetched.is_usable() {
        extract_page_meta(&fetched.body)
    } else {
        warn!("Page {} returned HTTP {}", url, fetched.status);
        Default::default()
    };
    DiscoveredPage {
        url,
        title: meta.title,
        description: meta.description,
        keywords: meta.keywords,
        crawl_depth: depth,
        is_accessible: fetched.is_usable(),
        http_status: fetched.status,
        word_count: meta.word_count,
        has_forms: meta.has_forms,
        has_contact_info: meta.has_contact_info,
        has_scheduling: meta.has_scheduling,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::RecordingSink;
    use crate::events::TracingSink;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> DiscoveryConfig {
        DiscoveryConfig {
            max_depth: 2,
            max_pages: 10,
            concurrency: 3,
            timeout_secs: 5,
            batch_delay_ms: 0,
            classify_batch_size: 10,
        }
    }

    fn discoverer(config: DiscoveryConfig) -> SiteDiscoverer {
        let fetcher = PageFetcher::new("siterag-test/0.1", Duration::from_secs(5)).unwrap();
        SiteDiscoverer::new(fetcher, config, Arc::new(TracingSink))
    }

    fn html_page(title: &str, body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(
            format!("<html><head><title>{}</title></head><body>{}</body></html>", title, body),
            "text/html",
        )
    }

    #[tokio::test]
    async fn test_sitemap_preferred_over_crawl() {
        let server = MockServer::start().await;
        let host = server.address().to_string();

        let sitemap = format!(
            r#"<urlset>
                <url><loc>http://{0}/hours</loc></url>
                <url><loc>http://{0}/contact</loc></url>
            </urlset>"#,
            host
        );
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sitemap))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hours"))
            .respond_with(html_page("Hours", "<p>Open 8-5. Call 555-123-4567.</p>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/contact"))
            .respond_with(html_page("Contact", "<form></form>"))
            .mount(&server)
            .await;

        let outcome = discoverer(test_config())
            .discover(1, &server.uri())
            .await
            .unwrap();

        assert!(outcome.via_sitemap);
        assert_eq!(outcome.pages.len(), 2);
        assert!(outcome.errors.is_empty());

        let hours = outcome.pages.iter().find(|p| p.url.ends_with("/hours")).unwrap();
        assert_eq!(hours.title, "Hours");
        assert_eq!(hours.crawl_depth, 0);
        assert!(hours.has_contact_info);

        let contact = outcome.pages.iter().find(|p| p.url.ends_with("/contact")).unwrap();
        assert!(contact.has_forms);
    }

    #[tokio::test]
    async fn test_crawl_fallback_follows_internal_links() {
        let server = MockServer::start().await;

        // No sitemap anywhere; root links to /about which links nowhere
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_page("Home", r#"<a href="/about">About</a>"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(html_page("About Us", "<p>Our mission.</p>"))
            .mount(&server)
            .await;

        let outcome = discoverer(test_config())
            .discover(1, &server.uri())
            .await
            .unwrap();

        assert!(!outcome.via_sitemap);
        assert_eq!(outcome.pages.len(), 2);
        assert_eq!(outcome.pages[0].crawl_depth, 0);
        assert_eq!(outcome.pages[1].crawl_depth, 1);
        assert_eq!(outcome.pages[1].title, "About Us");
    }

    #[tokio::test]
    async fn test_http_errors_recorded_as_inaccessible() {
        let server = MockServer::start().await;
        let host = server.address().to_string();

        let sitemap = format!(
            r#"<urlset><url><loc>http://{0}/gone</loc></url></urlset>"#,
            host
        );
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sitemap))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = discoverer(test_config())
            .discover(1, &server.uri())
            .await
            .unwrap();

        assert_eq!(outcome.pages.len(), 1);
        assert!(!outcome.pages[0].is_accessible);
        assert_eq!(outcome.pages[0].http_status, 404);
    }

    #[tokio::test]
    async fn test_page_cap_respected() {
        let server = MockServer::start().await;
        let host = server.address().to_string();

        let entries: String = (0..20)
            .map(|i| format!("<url><loc>http://{}/p{}</loc></url>", host, i))
            .collect();
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("<urlset>{}</urlset>", entries)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(html_page("Page", "<p>content</p>"))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.max_pages = 5;
        let outcome = discoverer(config).discover(1, &server.uri()).await.unwrap();

        assert_eq!(outcome.pages.len(), 5);
    }

    #[tokio::test]
    async fn test_discovery_emits_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_page("Home", "<p>hello</p>"))
            .mount(&server)
            .await;

        let sink = Arc::new(RecordingSink::default());
        let fetcher = PageFetcher::new("siterag-test/0.1", Duration::from_secs(5)).unwrap();
        let discoverer = SiteDiscoverer::new(fetcher, test_config(), sink.clone());
        discoverer.discover(7, &server.uri()).await.unwrap();

        let events = sink.events.lock().unwrap();
        assert!(matches!(
            events[0],
            ProgressEvent::DiscoveryStarted { org_id: 7, .. }
        ));
    }
}
