//! Page-type and query-intent classification
//!
//! Discovered pages are classified in batches through the completion
//! client; a response that fails to parse as structured data routes the
//! whole batch through a deterministic heuristic classifier. Every input
//! page always receives exactly one page type and an embedding of the
//! configured dimensionality, regardless of upstream failures.

use crate::crawl::DiscoveredPage;
use crate::embed::{zero_vector, Embedder};
use crate::error::{Error, Result};
use crate::llm::{parse_structured, CompletionClient, CompletionRequest, Structured};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed page-type categories for the URL index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageType {
    Home,
    About,
    Services,
    Providers,
    Hours,
    Location,
    Contact,
    Forms,
    Insurance,
    Appointment,
    PatientInfo,
    News,
    Careers,
    Other,
}

impl std::fmt::Display for PageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PageType::Home => "home",
            PageType::About => "about",
            PageType::Services => "services",
            PageType::Providers => "providers",
            PageType::Hours => "hours",
            PageType::Location => "location",
            PageType::Contact => "contact",
            PageType::Forms => "forms",
            PageType::Insurance => "insurance",
            PageType::Appointment => "appointment",
            PageType::PatientInfo => "patient-info",
            PageType::News => "news",
            PageType::Careers => "careers",
            PageType::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "home" => Ok(PageType::Home),
            "about" => Ok(PageType::About),
            "services" => Ok(PageType::Services),
            "providers" => Ok(PageType::Providers),
            "hours" => Ok(PageType::Hours),
            "location" => Ok(PageType::Location),
            "contact" => Ok(PageType::Contact),
            "forms" => Ok(PageType::Forms),
            "insurance" => Ok(PageType::Insurance),
            "appointment" => Ok(PageType::Appointment),
            "patient-info" => Ok(PageType::PatientInfo),
            "news" => Ok(PageType::News),
            "careers" => Ok(PageType::Careers),
            "other" => Ok(PageType::Other),
            _ => Err(Error::Parse(format!("Unknown page type: {}", s))),
        }
    }
}

/// Coarse query-intent categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    Hours,
    Location,
    Contact,
    Services,
    Providers,
    Insurance,
    Forms,
    Preparation,
    General,
    Other,
    Unknown,
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryIntent::Hours => "hours",
            QueryIntent::Location => "location",
            QueryIntent::Contact => "contact",
            QueryIntent::Services => "services",
            QueryIntent::Providers => "providers",
            QueryIntent::Insurance => "insurance",
            QueryIntent::Forms => "forms",
            QueryIntent::Preparation => "preparation",
            QueryIntent::General => "general",
            QueryIntent::Other => "other",
            QueryIntent::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for QueryIntent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().trim() {
            "hours" => Ok(QueryIntent::Hours),
            "location" => Ok(QueryIntent::Location),
            "contact" => Ok(QueryIntent::Contact),
            "services" => Ok(QueryIntent::Services),
            "providers" => Ok(QueryIntent::Providers),
            "insurance" => Ok(QueryIntent::Insurance),
            "forms" => Ok(QueryIntent::Forms),
            "preparation" => Ok(QueryIntent::Preparation),
            "general" => Ok(QueryIntent::General),
            "other" => Ok(QueryIntent::Other),
            _ => Err(Error::Parse(format!("Unknown query intent: {}", s))),
        }
    }
}

/// A discovered page with its assigned type and embedding
#[derive(Debug, Clone)]
pub struct ClassifiedPage {
    pub page: DiscoveredPage,
    pub page_type: PageType,
    pub title_embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    classifications: Vec<Classification>,
}

#[derive(Debug, Deserialize)]
struct Classification {
    url: String,
    page_type: String,
    #[allow(dead_code)]
    confidence: Option<f32>,
    #[allow(dead_code)]
    reasoning: Option<String>,
}

const CLASSIFY_SYSTEM: &str = "You are an expert at analyzing organization websites. \
Classify pages accurately based on their content and purpose. \
Always respond with valid JSON only, no markdown formatting.";

/// Batch page classifier
pub struct PageClassifier {
    completions: Arc<dyn CompletionClient>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    batch_delay: Duration,
}

impl PageClassifier {
    pub fn new(
        completions: Arc<dyn CompletionClient>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            completions,
            embedder,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    /// Classify every page, batch by batch
    ///
    /// Guaranteed total: the output has exactly one record per input page.
    pub async fn classify_pages(&self, pages: Vec<DiscoveredPage>) -> Vec<ClassifiedPage> {
        let total = pages.len();
        let mut classified = Vec::with_capacity(total);
        let batches: Vec<Vec<DiscoveredPage>> = pages
            .chunks(self.batch_size)
            .map(|c| c.to_vec())
            .collect();
        let batch_count = batches.len();

        for (i, batch) in batches.into_iter().enumerate() {
            classified.extend(self.classify_batch(batch).await);
            if i + 1 < batch_count && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        debug_assert_eq!(classified.len(), total);
        classified
    }

    async fn classify_batch(&self, batch: Vec<DiscoveredPage>) -> Vec<ClassifiedPage> {
        let types = match self.request_classifications(&batch).await {
            Ok(types) => types,
            Err(e) => {
                warn!("Batch classification failed, using heuristics: {}", e);
                batch.iter().map(heuristic_page_type).collect()
            }
        };

        let embeddings = self.request_embeddings(&batch).await;

        batch
            .into_iter()
            .zip(types)
            .zip(embeddings)
            .map(|((page, page_type), title_embedding)| ClassifiedPage {
                page,
                page_type,
                title_embedding,
            })
            .collect()
    }

    /// One completion call covering the whole batch
    async fn request_classifications(&self, batch: &[DiscoveredPage]) -> Result<Vec<PageType>> {
        let descriptions: Vec<serde_json::Value> = batch
            .iter()
            .map(|page| {
                json!({
                    "url": page.url,
                    "title": page.title,
                    "description": page.description,
                    "keywords": page.keywords.join(", "),
                    "wordCount": page.word_count,
                    "hasForms": page.has_forms,
                    "hasContactInfo": page.has_contact_info,
                    "hasScheduling": page.has_scheduling,
                })
            })
            .collect();

        let prompt = format!(
            "Classify these organization website pages. For each page, pick the most \
appropriate page_type from: home, about, services, providers, hours, location, \
contact, forms, insurance, appointment, patient-info, news, careers, other.\n\n\
Pages to classify:\n{}\n\n\
Return a JSON object with a \"classifications\" array:\n\
{{\"classifications\": [{{\"url\": \"...\", \"page_type\": \"...\", \
\"confidence\": 0.95, \"reasoning\": \"brief explanation\"}}]}}",
            serde_json::to_string_pretty(&descriptions)?
        );

        let raw = self
            .completions
            .complete(
                CompletionRequest::new(CLASSIFY_SYSTEM, prompt)
                    .temperature(0.1)
                    .max_tokens(2000)
                    .json_response(),
            )
            .await?;

        let parsed = match parse_structured::<ClassificationResponse>(&raw) {
            Structured::Ok(response) => response.classifications,
            Structured::ParseFailure(_) => {
                return Err(Error::StructuredOutput(
                    "Classification response was not valid JSON".to_string(),
                ));
            }
        };

        // Each page gets the type the model assigned to its URL, or the
        // heuristic result when the model skipped it
        Ok(batch
            .iter()
            .map(|page| {
                parsed
                    .iter()
                    .find(|c| c.url == page.url)
                    .and_then(|c| PageType::from_str(&c.page_type).ok())
                    .unwrap_or_else(|| heuristic_page_type(page))
            })
            .collect())
    }

    /// One embedding per page over title+description+keywords
    ///
    /// A service failure yields zero vectors for the whole batch rather
    /// than aborting it.
    async fn request_embeddings(&self, batch: &[DiscoveredPage]) -> Vec<Vec<f32>> {
        let texts: Vec<String> = batch
            .iter()
            .map(|page| {
                format!(
                    "{} {} {}",
                    page.title,
                    page.description,
                    page.keywords.join(" ")
                )
            })
            .collect();

        match self.embedder.embed(texts).await {
            Ok(embeddings) if embeddings.len() == batch.len() => embeddings,
            Ok(embeddings) => {
                warn!(
                    "Embedding count mismatch ({} for {} pages), using zero vectors",
                    embeddings.len(),
                    batch.len()
                );
                batch
                    .iter()
                    .map(|_| zero_vector(self.embedder.dimension()))
                    .collect()
            }
            Err(e) => {
                warn!("Batch embedding failed, using zero vectors: {}", e);
                batch
                    .iter()
                    .map(|_| zero_vector(self.embedder.dimension()))
                    .collect()
            }
        }
    }
}

/// Deterministic heuristic classifier
///
/// Substring matching over URL, title, and description, plus the page's
/// structural signals. Applied whenever the completion service's response
/// cannot be used.
pub fn heuristic_page_type(page: &DiscoveredPage) -> PageType {
    let combined = format!(
        "{} {} {}",
        page.url.to_lowercase(),
        page.title.to_lowercase(),
        page.description.to_lowercase()
    );

    if combined.contains("contact") || page.has_contact_info {
        return PageType::Contact;
    }
    if combined.contains("hour") || combined.contains("schedule") {
        return PageType::Hours;
    }
    if combined.contains("service") || combined.contains("treatment") {
        return PageType::Services;
    }
    if combined.contains("doctor") || combined.contains("provider") || combined.contains("staff") {
        return PageType::Providers;
    }
    if combined.contains("location") || combined.contains("direction") || combined.contains("parking")
    {
        return PageType::Location;
    }
    if combined.contains("form") || page.has_forms {
        return PageType::Forms;
    }
    if combined.contains("insurance") || combined.contains("billing") {
        return PageType::Insurance;
    }
    if combined.contains("appointment") || page.has_scheduling {
        return PageType::Appointment;
    }
    if combined.contains("about") || combined.contains("mission") {
        return PageType::About;
    }
    if page.url.to_lowercase().contains("home") || page.crawl_depth == 0 {
        return PageType::Home;
    }

    PageType::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::DiscoveredPage;
    use async_trait::async_trait;

    fn page(url: &str, title: &str) -> DiscoveredPage {
        DiscoveredPage {
            url: url.to_string(),
            title: title.to_string(),
            description: String::new(),
            keywords: Vec::new(),
            crawl_depth: 1,
            is_accessible: true,
            http_status: 200,
            word_count: 100,
            has_forms: false,
            has_contact_info: false,
            has_scheduling: false,
        }
    }

    struct FixedCompletion(String);

    #[async_trait]
    impl CompletionClient for FixedCompletion {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingCompletion;

    #[async_trait]
    impl CompletionClient for FailingCompletion {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            Err(Error::Completion("unavailable".to_string()))
        }
    }

    struct FixedEmbedder {
        dimension: usize,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(Error::Embedding("down".to_string()));
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    fn classifier(
        completions: Arc<dyn CompletionClient>,
        embedder: Arc<dyn Embedder>,
    ) -> PageClassifier {
        PageClassifier::new(completions, embedder, 10, Duration::ZERO)
    }

    #[test]
    fn test_page_type_round_trip() {
        for s in ["home", "patient-info", "careers", "other"] {
            let page_type = PageType::from_str(s).unwrap();
            assert_eq!(page_type.to_string(), s);
        }
        assert!(PageType::from_str("bogus").is_err());
    }

    #[test]
    fn test_heuristic_classifier() {
        assert_eq!(
            heuristic_page_type(&page("https://x.com/contact-us", "")),
            PageType::Contact
        );
        assert_eq!(
            heuristic_page_type(&page("https://x.com/team", "Our Doctors")),
            PageType::Providers
        );
        assert_eq!(
            heuristic_page_type(&page("https://x.com/xyz", "Untitled")),
            PageType::Other
        );

        let mut root = page("https://x.com/", "Welcome");
        root.crawl_depth = 0;
        assert_eq!(heuristic_page_type(&root), PageType::Home);

        let mut with_forms = page("https://x.com/downloads", "Downloads");
        with_forms.has_forms = true;
        assert_eq!(heuristic_page_type(&with_forms), PageType::Forms);
    }

    #[tokio::test]
    async fn test_classify_uses_model_response() {
        let response = serde_json::json!({
            "classifications": [
                {"url": "https://x.com/a", "page_type": "hours", "confidence": 0.9, "reasoning": "hours page"},
                {"url": "https://x.com/b", "page_type": "services", "confidence": 0.8, "reasoning": "services page"},
            ]
        });
        let classifier = classifier(
            Arc::new(FixedCompletion(response.to_string())),
            Arc::new(FixedEmbedder {
                dimension: 4,
                fail: false,
            }),
        );

        let classified = classifier
            .classify_pages(vec![page("https://x.com/a", "A"), page("https://x.com/b", "B")])
            .await;

        assert_eq!(classified.len(), 2);
        assert_eq!(classified[0].page_type, PageType::Hours);
        assert_eq!(classified[1].page_type, PageType::Services);
        assert_eq!(classified[0].title_embedding, vec![0.5; 4]);
    }

    #[tokio::test]
    async fn test_unparseable_response_falls_back_to_heuristics() {
        let classifier = classifier(
            Arc::new(FixedCompletion("not json at all".to_string())),
            Arc::new(FixedEmbedder {
                dimension: 4,
                fail: false,
            }),
        );

        let classified = classifier
            .classify_pages(vec![page("https://x.com/contact", "Contact Us")])
            .await;

        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].page_type, PageType::Contact);
    }

    #[tokio::test]
    async fn test_every_page_gets_a_type_when_everything_fails() {
        let classifier = classifier(
            Arc::new(FailingCompletion),
            Arc::new(FixedEmbedder {
                dimension: 4,
                fail: true,
            }),
        );

        let pages = vec![
            page("https://x.com/hours", "Hours"),
            page("https://x.com/misc", "Misc"),
        ];
        let classified = classifier.classify_pages(pages).await;

        assert_eq!(classified.len(), 2);
        assert_eq!(classified[0].page_type, PageType::Hours);
        assert_eq!(classified[0].title_embedding, vec![0.0; 4]);
        assert_eq!(classified[1].title_embedding, vec![0.0; 4]);
    }

    #[tokio::test]
    async fn test_model_skipping_a_url_falls_back_for_that_url() {
        let response = serde_json::json!({
            "classifications": [
                {"url": "https://x.com/a", "page_type": "hours"},
            ]
        });
        let classifier = classifier(
            Arc::new(FixedCompletion(response.to_string())),
            Arc::new(FixedEmbedder {
                dimension: 4,
                fail: false,
            }),
        );

        let classified = classifier
            .classify_pages(vec![
                page("https://x.com/a", "A"),
                page("https://x.com/insurance", "Insurance"),
            ])
            .await;

        assert_eq!(classified[0].page_type, PageType::Hours);
        assert_eq!(classified[1].page_type, PageType::Insurance);
    }
}
