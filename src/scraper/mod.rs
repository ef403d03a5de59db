//! Web scraper - page fetching, text extraction and subpage discovery

use std::collections::HashSet;

use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Elements whose text never counts as page content
const SKIPPED_TAGS: [&str; 4] = ["script", "style", "noscript", "template"];

/// href prefixes that never lead to a subpage
const SKIPPED_HREF_PREFIXES: [&str; 4] = ["#", "javascript:", "mailto:", "tel:"];

// ============================================================================
// Page
// ============================================================================

/// A fetched HTML page
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects
    pub url: String,
    pub title: Option<String>,
    pub html: String,
}

impl Page {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        let html = html.into();
        let title = extract_title(&Html::parse_document(&html));
        Self {
            url: url.into(),
            title,
            html,
        }
    }

    /// All visible text of the document, whitespace-collapsed
    pub fn text(&self) -> String {
        let document = Html::parse_document(&self.html);
        element_text(&document.root_element())
    }

    /// Text of the main content region (article > main > body)
    pub fn main_content(&self) -> String {
        let document = Html::parse_document(&self.html);

        let selectors = [
            "article",
            "main",
            "[role=main]",
            ".content",
            "#content",
        ];

        for selector_str in selectors {
            if let Ok(selector) = Selector::parse(selector_str) {
                if let Some(element) = document.select(&selector).next() {
                    let text = element_text(&element);
                    if text.len() > 100 {
                        return text;
                    }
                }
            }
        }

        if let Ok(selector) = Selector::parse("body") {
            if let Some(element) = document.select(&selector).next() {
                return element_text(&element);
            }
        }

        element_text(&document.root_element())
    }

    /// Absolute http(s) links to other pages, in document order
    ///
    /// Fragment-only, `javascript:`, `mailto:` and `tel:` links are skipped,
    /// as is anything still carrying a fragment after resolution.
    pub fn subpage_links(&self) -> Vec<String> {
        let base = match Url::parse(&self.url) {
            Ok(base) => base,
            Err(e) => {
                tracing::warn!("Cannot resolve links against {}: {}", self.url, e);
                return vec![];
            }
        };

        let selector = match Selector::parse("a[href]") {
            Ok(s) => s,
            Err(_) => return vec![],
        };

        let document = Html::parse_document(&self.html);
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href").map(str::trim) else {
                continue;
            };

            if href.is_empty() || SKIPPED_HREF_PREFIXES.iter().any(|p| href.starts_with(p)) {
                continue;
            }

            let Ok(resolved) = base.join(href) else {
                tracing::debug!("Skipping unresolvable href: {}", href);
                continue;
            };

            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }

            let resolved = resolved.to_string();
            if resolved.contains('#') {
                continue;
            }

            if seen.insert(resolved.clone()) {
                links.push(resolved);
            }
        }

        links
    }
}

// ============================================================================
// WebScraper
// ============================================================================

pub struct WebScraper {
    client: reqwest::Client,
}

impl WebScraper {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("atlas-rag/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// GET a page; non-2xx responses are errors
    pub async fn fetch(&self, url: &str) -> Result<Page> {
        tracing::info!("Fetching: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request failed: {}", url))?
            .error_for_status()
            .with_context(|| format!("Bad response from {}", url))?;

        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;

        Ok(Page::new(final_url, html))
    }

    /// Fetch a page and up to `limit` of its subpages
    ///
    /// A failure to fetch `base` is returned as an error; subpage failures
    /// are reported per URL.
    pub async fn crawl_subpages(
        &self,
        base: &str,
        limit: usize,
    ) -> Result<Vec<(String, Result<Page>)>> {
        let page = self
            .fetch(base)
            .await
            .with_context(|| format!("Failed to fetch base page {}", base))?;

        let links = page.subpage_links();
        tracing::info!(
            "Found {} subpage links on {}, fetching {}",
            links.len(),
            base,
            links.len().min(limit)
        );

        let mut results = Vec::new();
        for link in links.into_iter().take(limit) {
            let result = self.fetch(&link).await;
            if let Err(e) = &result {
                tracing::warn!("Failed to fetch {}: {:#}", link, e);
            }
            results.push((link, result));
        }

        Ok(results)
    }
}

impl Default for WebScraper {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("Failed to build WebScraper: {}", e);
            Self {
                client: reqwest::Client::new(),
            }
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `<title>`, falling back to the first `<h1>`
fn extract_title(document: &Html) -> Option<String> {
    for selector_str in ["title", "h1"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let title = element_text(&element);
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }
    }

    None
}

/// Text below an element with scripts and styles skipped
fn element_text(element: &ElementRef) -> String {
    let mut parts = Vec::new();
    collect_text(element, &mut parts);
    parts.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(element: &ElementRef, parts: &mut Vec<String>) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            if !SKIPPED_TAGS.contains(&child_element.value().name()) {
                collect_text(&child_element, parts);
            }
        } else if let Some(text) = child.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve_pages;

    const FRONT_PAGE: &str = r##"
        <html>
            <head>
                <title>Georgetown University</title>
                <style>body { color: red; }</style>
            </head>
            <body>
                <nav>
                    <a href="#main">Skip to content</a>
                    <a href="/admissions/">Admissions</a>
                    <a href="javascript:void(0)">Menu</a>
                    <a href="mailto:info@example.edu">Email</a>
                    <a href="tel:+12025550100">Call</a>
                    <a href="research/">Research</a>
                    <a href="/admissions/">Admissions again</a>
                    <a href="/news/#latest">Latest news</a>
                    <a href="ftp://files.example.edu/">Files</a>
                    <a href="">Empty</a>
                    <a href="https://other.example.com/about">About</a>
                </nav>
                <script>var tracking = true;</script>
                <p>Welcome   to
                   the university.</p>
            </body>
        </html>
    "##;

    #[test]
    fn test_scraper_creation() {
        assert!(WebScraper::new().is_ok());
    }

    #[test]
    fn test_title() {
        let page = Page::new("https://example.edu/", FRONT_PAGE);
        assert_eq!(page.title.as_deref(), Some("Georgetown University"));

        let page = Page::new(
            "https://example.edu/",
            "<html><head><title></title></head><body><h1>H1 Heading</h1></body></html>",
        );
        assert_eq!(page.title.as_deref(), Some("H1 Heading"));
    }

    #[test]
    fn test_text_skips_script_and_style() {
        let page = Page::new("https://example.edu/", FRONT_PAGE);
        let text = page.text();

        assert!(text.contains("Welcome to the university."));
        assert!(text.contains("Georgetown University"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("  "));
    }

    #[test]
    fn test_subpage_links() {
        let page = Page::new("https://example.edu/home/", FRONT_PAGE);

        assert_eq!(
            page.subpage_links(),
            vec![
                "https://example.edu/admissions/",
                "https://example.edu/home/research/",
                "https://other.example.com/about",
            ]
        );
    }

    #[test]
    fn test_subpage_links_invalid_base() {
        let page = Page::new("not a url", FRONT_PAGE);
        assert!(page.subpage_links().is_empty());
    }

    #[test]
    fn test_main_content_prefers_article() {
        let html = r#"
            <html>
                <body>
                    <nav>Navigation menu</nav>
                    <article>
                        This is the main article content.
                        It should be extracted as the primary content.
                        More text to ensure it's over 100 characters.
                    </article>
                    <footer>Footer content</footer>
                </body>
            </html>
        "#;
        let content = Page::new("https://example.edu/", html).main_content();
        assert!(content.contains("main article content"));
        assert!(!content.contains("Footer"));
    }

    #[test]
    fn test_main_content_falls_back_to_body() {
        let html = "<html><body><article>short</article><p>Body text</p></body></html>";
        let content = Page::new("https://example.edu/", html).main_content();
        assert!(content.contains("Body text"));
    }

    #[tokio::test]
    async fn test_fetch_and_crawl() {
        let base = serve_pages(vec![
            (
                "/",
                200,
                r#"<a href="/one">One</a><a href="/missing">Missing</a><a href="/two">Two</a>"#,
            ),
            ("/one", 200, "<title>One</title><p>first page</p>"),
            ("/two", 200, "<p>second page</p>"),
        ])
        .await;

        let scraper = WebScraper::new().unwrap();
        let page = scraper.fetch(&base).await.unwrap();
        assert_eq!(page.subpage_links().len(), 3);

        let results = scraper.crawl_subpages(&base, 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].0.ends_with("/one"));
        assert_eq!(results[0].1.as_ref().unwrap().title.as_deref(), Some("One"));
        assert!(results[1].0.ends_with("/missing"));
        assert!(results[1].1.is_err());
    }

    #[tokio::test]
    async fn test_crawl_base_failure_is_fatal() {
        let base = serve_pages(vec![]).await;
        let scraper = WebScraper::new().unwrap();
        assert!(scraper.crawl_subpages(&base, 3).await.is_err());
    }
}
