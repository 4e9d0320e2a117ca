//! HTML metadata and content extraction
//!
//! Pure functions over fetched markup: page metadata for the URL index
//! (title, description, keywords, structural signals), cleaned main-content
//! text for summarization, and content hashing for change detection.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use url::Url;

/// Metadata extracted from one page for the URL index
#[derive(Debug, Clone, Default)]
pub struct PageMeta {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub word_count: usize,
    pub has_forms: bool,
    pub has_contact_info: bool,
    pub has_scheduling: bool,
}

/// Cleaned content extracted from one page for summarization
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub title: String,
    pub clean_text: String,
}

/// Elements whose text never counts as page content
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript",
];

/// Class name fragments that mark navigation/advertising chrome
const SKIP_CLASSES: &[&str] = &["menu", "navigation", "sidebar", "ads", "advertisement"];

/// Content selectors tried in order; the largest matching region wins
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    ".main-content",
    ".content",
    "#content",
    ".page-content",
    "article",
    ".post-content",
];

fn should_skip(element: ElementRef) -> bool {
    let name = element.value().name();
    if SKIP_TAGS.contains(&name) {
        return true;
    }
    if let Some(class) = element.value().attr("class") {
        let class = class.to_lowercase();
        if SKIP_CLASSES.iter().any(|c| class.contains(c)) {
            return true;
        }
    }
    false
}

/// Collect readable text under an element, skipping scripts and chrome
fn collect_text(element: ElementRef, out: &mut String) {
    if should_skip(element) {
        return;
    }
    for node in element.children() {
        if let Some(text) = node.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child) = ElementRef::wrap(node) {
            collect_text(child, out);
        }
    }
}

/// Normalize whitespace runs down to single spaces
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    let mut text = String::new();
    collect_text(element, &mut text);
    Some(normalize_whitespace(&text))
}

/// Extract the page title: `<title>` first, then the first `<h1>`
pub fn extract_title(document: &Html) -> String {
    for selector in ["title", "h1"] {
        if let Some(text) = select_text(document, selector) {
            if !text.is_empty() {
                return text;
            }
        }
    }
    String::new()
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|e| e.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract URL-index metadata from fetched markup
pub fn extract_page_meta(html: &str) -> PageMeta {
    let document = Html::parse_document(html);

    let title = extract_title(&document);
    let description = meta_content(&document, r#"meta[name="description"]"#)
        .or_else(|| meta_content(&document, r#"meta[property="og:description"]"#))
        .unwrap_or_default();
    let keywords = meta_content(&document, r#"meta[name="keywords"]"#)
        .map(|content| {
            content
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let body_text = select_text(&document, "body").unwrap_or_default();
    let has_forms = Selector::parse("form")
        .map(|s| document.select(&s).next().is_some())
        .unwrap_or(false);

    PageMeta {
        title,
        description,
        keywords,
        word_count: body_text.split_whitespace().count(),
        has_forms,
        has_contact_info: has_contact_info(&body_text),
        has_scheduling: has_scheduling(&body_text),
    }
}

static CONTACT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static SCHEDULING_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Phone-number or email pattern anywhere in the text
pub fn has_contact_info(text: &str) -> bool {
    let pattern = CONTACT_RE.get_or_init(|| {
        Regex::new(r"(\d{3}[-.\s]?\d{3}[-.\s]?\d{4})|(@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})").ok()
    });
    pattern.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
}

/// Scheduling-related vocabulary anywhere in the text
pub fn has_scheduling(text: &str) -> bool {
    let pattern = SCHEDULING_RE
        .get_or_init(|| Regex::new(r"(?i)schedule|appointment|book|calendar|availability").ok());
    pattern.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
}

/// Extract cleaned main content from fetched markup
///
/// Tries the conventional content selectors and keeps the largest matching
/// region; falls back to the whole body. Scripts, navigation, footers, and
/// ad containers never contribute text.
pub fn extract_page_content(html: &str) -> PageContent {
    let document = Html::parse_document(html);
    let title = extract_title(&document);

    let mut main_content = String::new();
    for selector in CONTENT_SELECTORS {
        if let Some(text) = select_text(&document, selector) {
            if text.len() > main_content.len() {
                main_content = text;
            }
        }
    }

    if main_content.is_empty() {
        main_content = select_text(&document, "body").unwrap_or_default();
    }

    PageContent {
        title,
        clean_text: main_content,
    }
}

/// Content hash over cleaned text, for change detection
pub fn content_hash(clean_text: &str) -> String {
    blake3::hash(clean_text.as_bytes()).to_hex().to_string()
}

/// Extract absolute same-host links from markup
///
/// Fragment-only and query-string links are skipped; the index tracks
/// canonical pages, not views into them.
pub fn extract_internal_links(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if resolved.host_str() != base.host_str() {
            continue;
        }
        if resolved.fragment().is_some() || resolved.query().is_some() {
            continue;
        }
        let url = resolved.to_string();
        if !links.contains(&url) {
            links.push(url);
        }
    }
    links
}
