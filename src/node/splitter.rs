//! Sentence splitter
//!
//! Cuts documents into nodes that respect paragraph and sentence boundaries.
//! Sizes are counted in whitespace-separated words.

use anyhow::Result;
use regex::Regex;

use super::{Document, TextNode};

/// Default chunk size (words)
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default overlap between consecutive chunks (words)
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

/// One sentence (or a hard-split piece of an overlong one)
#[derive(Debug, Clone)]
struct Split {
    text: String,
    words: usize,
    /// First split of a paragraph
    paragraph_start: bool,
}

/// Paragraph- and sentence-aware splitter
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    paragraph_re: Regex,
    sentence_re: Regex,
}

impl SentenceSplitter {
    /// # Arguments
    /// * `chunk_size` - maximum words per chunk
    /// * `chunk_overlap` - words carried over from the previous chunk
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }
        if chunk_overlap >= chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            paragraph_re: Regex::new(r"\n[ \t]*\n\s*")?,
            sentence_re: Regex::new(r#"[.!?]+["')\]]*\s+"#)?,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split text into chunks
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let splits = self.splits(text);
        self.merge(&splits)
    }

    /// Split documents into nodes, carrying `ref_doc_id` and metadata
    pub fn get_nodes_from_documents(&self, documents: &[Document]) -> Vec<TextNode> {
        let mut nodes = Vec::new();

        for doc in documents {
            let chunks = self.split_text(&doc.text);
            if chunks.is_empty() {
                tracing::debug!("No chunks for document {} ({})", doc.doc_id, doc.source());
                continue;
            }

            nodes.extend(
                chunks
                    .into_iter()
                    .map(|chunk| TextNode::new(doc.doc_id.clone(), chunk, doc.metadata.clone())),
            );
        }

        nodes
    }

    /// Paragraphs -> sentences -> hard-split pieces
    fn splits(&self, text: &str) -> Vec<Split> {
        let mut splits = Vec::new();

        for paragraph in self.paragraph_re.split(text) {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            let mut first = true;
            for sentence in self.sentences(paragraph) {
                for piece in self.hard_split(&sentence) {
                    let words = piece.split_whitespace().count();
                    splits.push(Split {
                        text: piece,
                        words,
                        paragraph_start: first,
                    });
                    first = false;
                }
            }
        }

        splits
    }

    fn sentences(&self, paragraph: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for m in self.sentence_re.find_iter(paragraph) {
            let sentence = paragraph[start..m.end()].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = m.end();
        }

        let rest = paragraph[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest.to_string());
        }

        sentences
    }

    /// Break a sentence longer than `chunk_size` into word windows
    fn hard_split(&self, sentence: &str) -> Vec<String> {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        if words.len() <= self.chunk_size {
            return vec![words.join(" ")];
        }

        words
            .chunks(self.chunk_size)
            .map(|w| w.join(" "))
            .collect()
    }

    /// Pack splits into chunks with sentence-level overlap
    fn merge(&self, splits: &[Split]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&Split> = Vec::new();
        let mut current_words = 0;

        for split in splits {
            if !current.is_empty() && current_words + split.words > self.chunk_size {
                chunks.push(join_splits(&current));

                let mut overlap = self.overlap_tail(&current);
                let mut overlap_words: usize = overlap.iter().map(|s| s.words).sum();
                while !overlap.is_empty() && overlap_words + split.words > self.chunk_size {
                    overlap_words -= overlap.remove(0).words;
                }

                current = overlap;
                current_words = overlap_words;
            }

            current.push(split);
            current_words += split.words;
        }

        if !current.is_empty() {
            chunks.push(join_splits(&current));
        }

        chunks
    }

    /// Trailing splits of `current` that fit in `chunk_overlap` words
    fn overlap_tail<'a>(&self, current: &[&'a Split]) -> Vec<&'a Split> {
        let mut tail = Vec::new();
        let mut words = 0;

        for split in current.iter().rev() {
            if words + split.words > self.chunk_overlap {
                break;
            }
            words += split.words;
            tail.push(*split);
        }

        tail.reverse();
        tail
    }
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            paragraph_re: Regex::new(r"\n[ \t]*\n\s*").expect("valid paragraph regex"),
            sentence_re: Regex::new(r#"[.!?]+["')\]]*\s+"#).expect("valid sentence regex"),
        }
    }
}

/// Sentences joined by a space, paragraphs by a blank line
fn join_splits(splits: &[&Split]) -> String {
    let mut text = String::new();

    for (i, split) in splits.iter().enumerate() {
        if i > 0 {
            text.push_str(if split.paragraph_start { "\n\n" } else { " " });
        }
        text.push_str(&split.text);
    }

    text
}

// ============================================================================
// Tests
// ============================================================================
