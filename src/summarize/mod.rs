//! Site summarizer - fetch a site's subpages and summarize each with the LLM

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::llm::LanguageModel;
use crate::scraper::WebScraper;

/// Characters of page text sent to the model
pub const DEFAULT_MAX_CHARS: usize = 12_000;

/// Subpages summarized per site
pub const DEFAULT_PAGE_LIMIT: usize = 3;

/// Outcome for one subpage
#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl PageSummary {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(url: String, title: Option<String>, error: &anyhow::Error) -> Self {
        Self {
            url,
            title,
            summary: None,
            error: Some(format!("{:#}", error)),
        }
    }
}

pub struct SiteSummarizer {
    scraper: WebScraper,
    llm: Arc<dyn LanguageModel>,
    max_chars: usize,
}

impl SiteSummarizer {
    pub fn new(scraper: WebScraper, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            scraper,
            llm,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    /// Summarize up to `pages` subpages of `base`
    ///
    /// Only a failure to fetch `base` itself is an error; fetch or model
    /// failures of a subpage are recorded in its [`PageSummary`].
    pub async fn summarize_site(&self, base: &str, pages: usize) -> Result<Vec<PageSummary>> {
        let crawled = self.scraper.crawl_subpages(base, pages).await?;
        let mut summaries = Vec::with_capacity(crawled.len());

        for (url, page) in crawled {
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    summaries.push(PageSummary::failed(url, None, &e));
                    continue;
                }
            };

            match self.summarize_text(&page.main_content()).await {
                Ok(summary) => summaries.push(PageSummary {
                    url,
                    title: page.title,
                    summary: Some(summary),
                    error: None,
                }),
                Err(e) => {
                    tracing::warn!("Failed to summarize {}: {:#}", url, e);
                    summaries.push(PageSummary::failed(url, page.title, &e));
                }
            }
        }

        let ok = summaries.iter().filter(|s| s.is_ok()).count();
        tracing::info!("Summarized {}/{} pages of {}", ok, summaries.len(), base);

        Ok(summaries)
    }

    /// One summary request for a block of text
    pub async fn summarize_text(&self, content: &str) -> Result<String> {
        let content = content.trim();
        if content.is_empty() {
            anyhow::bail!("Page has no text content");
        }

        let prompt = summary_prompt(content, self.max_chars);
        let summary = self
            .llm
            .generate(&[prompt])
            .await
            .with_context(|| format!("{} failed to summarize", self.llm.name()))?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("{} returned no summary", self.llm.name()))?;

        Ok(summary.trim().to_string())
    }
}

fn summary_prompt(content: &str, max_chars: usize) -> String {
    let content = match content.char_indices().nth(max_chars) {
        Some((byte_index, _)) => {
            tracing::debug!("Truncating page text to {} chars", max_chars);
            &content[..byte_index]
        }
        None => content,
    };

    format!("Summarize the following text: {}", content)
}

// ============================================================================
// Tests
// ============================================================================
