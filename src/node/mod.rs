//! Documents and nodes
//!
//! A [`Document`] is one loaded source (a file, a PDF page, a web page).
//! A [`TextNode`] is one chunk of a document; nodes are what get embedded,
//! stored and retrieved.

mod splitter;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use splitter::{SentenceSplitter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

// ============================================================================
// Metadata
// ============================================================================

/// Source metadata carried from documents into their nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// PDF page (1-based, as a label)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Metadata {
    /// Stable description of where the content came from
    pub fn source(&self) -> String {
        let base = self
            .file_path
            .clone()
            .or_else(|| self.url.clone())
            .unwrap_or_else(|| "inline".to_string());

        match &self.page_label {
            Some(page) => format!("{}#page={}", base, page),
            None => base,
        }
    }
}

// ============================================================================
// Document
// ============================================================================

/// A loaded source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    /// New document with a random id
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            doc_id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            metadata,
        }
    }

    /// SHA-256 of the text (hex)
    pub fn hash(&self) -> String {
        format!("{:x}", Sha256::digest(self.text.as_bytes()))
    }

    pub fn source(&self) -> String {
        self.metadata.source()
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// One chunk of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub node_id: String,
    /// Id of the document this node was cut from
    pub ref_doc_id: String,
    pub text: String,
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl TextNode {
    pub fn new(ref_doc_id: impl Into<String>, text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            ref_doc_id: ref_doc_id.into(),
            text: text.into(),
            metadata,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A retrieved node and its similarity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWithScore {
    pub node: TextNode,
    pub score: f32,
}

// ============================================================================
// Tests
// ============================================================================
