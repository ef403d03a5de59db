//! In-memory vector store with JSON persistence

use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{batch_dimension, cosine_similarity, VectorStore, VectorStoreQuery};
use crate::node::{NodeWithScore, TextNode};

/// On-disk layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    nodes: Vec<TextNode>,
}

/// In-memory store, brute-force cosine ranking
#[derive(Debug, Default)]
pub struct SimpleVectorStore {
    nodes: RwLock<Vec<TextNode>>,
}

impl SimpleVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store written by [`persist`](Self::persist)
    pub fn from_persist_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vector store: {:?}", path))?;
        let persisted: Persisted = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse vector store: {:?}", path))?;

        tracing::info!(
            "Loaded {} nodes from {:?}",
            persisted.nodes.len(),
            path
        );

        Ok(Self {
            nodes: RwLock::new(persisted.nodes),
        })
    }

    /// Write all nodes (with embeddings) as JSON
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create persist directory")?;
            }
        }

        let nodes = self
            .nodes
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let data = serde_json::to_string(&Persisted {
            nodes: nodes.clone(),
        })
        .context("Failed to serialize vector store")?;

        std::fs::write(path, data)
            .with_context(|| format!("Failed to write vector store: {:?}", path))?;

        tracing::info!("Persisted {} nodes to {:?}", nodes.len(), path);
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SimpleVectorStore {
    async fn add(&self, nodes: &[TextNode]) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }

        let dimension = batch_dimension(nodes)?;
        let mut stored = self
            .nodes
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        if let Some(existing) = stored.first().and_then(|n| n.embedding.as_ref()) {
            if existing.len() != dimension {
                anyhow::bail!(
                    "Embedding dimension mismatch: store has {}, batch has {}",
                    existing.len(),
                    dimension
                );
            }
        }

        stored.extend_from_slice(nodes);
        Ok(nodes.len())
    }

    async fn query(&self, query: &VectorStoreQuery) -> Result<Vec<NodeWithScore>> {
        let stored = self
            .nodes
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut scored: Vec<NodeWithScore> = stored
            .iter()
            .filter_map(|node| {
                node.embedding.as_ref().map(|e| NodeWithScore {
                    score: cosine_similarity(&query.embedding, e),
                    node: node.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.top_k);

        Ok(scored)
    }

    async fn delete(&self, ref_doc_id: &str) -> Result<usize> {
        let mut stored = self
            .nodes
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let before = stored.len();
        stored.retain(|n| n.ref_doc_id != ref_doc_id);
        Ok(before - stored.len())
    }

    async fn count(&self) -> Result<usize> {
        let stored = self
            .nodes
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(stored.len())
    }

    fn name(&self) -> &str {
        "simple"
    }
}
