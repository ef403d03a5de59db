//! Vector stores
//!
//! - [`SimpleVectorStore`]: in-memory, optionally persisted as JSON
//! - [`LanceVectorStore`]: local LanceDB table
//! - [`MongoAtlasVectorStore`]: MongoDB Atlas Vector Search

mod lance;
mod mongo;
mod simple;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::node::{NodeWithScore, TextNode};

pub use lance::{LanceVectorStore, DEFAULT_TABLE as DEFAULT_LANCE_TABLE};
pub use mongo::MongoAtlasVectorStore;
pub use simple::SimpleVectorStore;

// ============================================================================
// Types
// ============================================================================

/// Nearest-neighbour query
#[derive(Debug, Clone)]
pub struct VectorStoreQuery {
    pub embedding: Vec<f32>,
    pub top_k: usize,
}

/// Persistent store backends selectable from the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    /// Local LanceDB table under the data directory
    Lance,
    /// MongoDB Atlas Vector Search
    Mongo,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Lance => "lance",
            StoreKind::Mongo => "mongo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lance" => Some(StoreKind::Lance),
            "mongo" => Some(StoreKind::Mongo),
            _ => None,
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// Common interface of all vector stores
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store nodes; every node must carry an embedding
    async fn add(&self, nodes: &[TextNode]) -> Result<usize>;

    /// Most similar nodes, best first
    async fn query(&self, query: &VectorStoreQuery) -> Result<Vec<NodeWithScore>>;

    /// Remove every node of a document
    async fn delete(&self, ref_doc_id: &str) -> Result<usize>;

    /// Number of stored nodes
    async fn count(&self) -> Result<usize>;

    /// Backend name
    fn name(&self) -> &str;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Cosine similarity in -1.0 ~ 1.0 (0.0 for mismatched or zero vectors)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Embedding of a node that is about to be stored
pub(crate) fn require_embedding(node: &TextNode) -> Result<&[f32]> {
    match node.embedding.as_deref() {
        Some(e) if !e.is_empty() => Ok(e),
        _ => anyhow::bail!("Node {} has no embedding", node.node_id),
    }
}

/// Common width of a batch of embedded nodes
pub(crate) fn batch_dimension(nodes: &[TextNode]) -> Result<usize> {
    let mut dimension = None;

    for node in nodes {
        let len = require_embedding(node)?.len();
        match dimension {
            None => dimension = Some(len),
            Some(d) if d != len => anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {} (node {})",
                d,
                len,
                node.node_id
            ),
            Some(_) => {}
        }
    }

    dimension.ok_or_else(|| anyhow::anyhow!("Cannot determine dimension of an empty batch"))
}

// ============================================================================
// Tests
// ============================================================================
