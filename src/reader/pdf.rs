//! PDF text extraction (pdf-extract)

use std::path::Path;

use anyhow::{Context, Result};

/// Extract text per page as `(page number, text)`; pages start at 1.
///
/// Pages without text are left out but still count, so the numbers match
/// the page labels of the file. CPU-bound, call from `spawn_blocking`.
pub fn extract_pages(path: &Path) -> Result<Vec<(usize, String)>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;
    let total = pages.len();

    let pages = number_pages(pages);
    if pages.is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
    } else if pages.len() < total {
        tracing::debug!(
            "{:?}: {} of {} pages have no text",
            path,
            total - pages.len(),
            total
        );
    }

    Ok(pages)
}

fn number_pages(pages: Vec<String>) -> Vec<(usize, String)> {
    pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i + 1, text.trim().to_string()))
        .filter(|(_, text)| !text.is_empty())
        .collect()
}
