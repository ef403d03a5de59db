//! Retrieval and question answering
//!
//! [`VectorIndexRetriever`] embeds the question and asks the vector store for
//! the nearest nodes; [`RetrieverQueryEngine`] stuffs them into a QA prompt
//! and asks the language model once.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embedding::EmbeddingProvider;
use crate::llm::LanguageModel;
use crate::node::NodeWithScore;
use crate::store::{VectorStore, VectorStoreQuery};

/// Nodes retrieved per query unless configured otherwise
pub const DEFAULT_SIMILARITY_TOP_K: usize = 2;

/// Characters of each source shown by [`Response::get_formatted_sources`]
pub const DEFAULT_SOURCE_LENGTH: usize = 100;

/// Answer column width
pub const DEFAULT_WRAP_WIDTH: usize = 100;

/// Answer when nothing was retrieved
pub const EMPTY_RESPONSE: &str = "Empty Response";

const QA_PROMPT_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query_str}\n\
Answer: ";

// ============================================================================
// Retriever
// ============================================================================

pub struct VectorIndexRetriever {
    store: Arc<dyn VectorStore>,
    embed_model: Arc<dyn EmbeddingProvider>,
    top_k: usize,
}

impl VectorIndexRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embed_model: Arc<dyn EmbeddingProvider>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embed_model,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Nearest nodes to the query, best first
    pub async fn retrieve(&self, query: &str) -> Result<Vec<NodeWithScore>> {
        let embedding = self
            .embed_model
            .embed_query(query)
            .await
            .context("Failed to embed query")?;

        let results = self
            .store
            .query(&VectorStoreQuery {
                embedding,
                top_k: self.top_k,
            })
            .await?;

        tracing::debug!("Retrieved {} nodes from {}", results.len(), self.store.name());
        Ok(results)
    }
}

// ============================================================================
// Response
// ============================================================================

/// Answer plus the nodes it was generated from
#[derive(Debug, Clone)]
pub struct Response {
    pub response: String,
    pub source_nodes: Vec<NodeWithScore>,
}

impl Response {
    /// One `> Source (Doc id: ..): ..` block per source node
    pub fn get_formatted_sources(&self, length: usize) -> String {
        self.source_nodes
            .iter()
            .map(|source| {
                format!(
                    "> Source (Doc id: {}): {}",
                    source.node.ref_doc_id,
                    truncate_chars(&source.node.text, length)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.response)
    }
}

// ============================================================================
// Query Engine
// ============================================================================

pub struct RetrieverQueryEngine {
    retriever: VectorIndexRetriever,
    llm: Arc<dyn LanguageModel>,
}

impl RetrieverQueryEngine {
    pub fn new(retriever: VectorIndexRetriever, llm: Arc<dyn LanguageModel>) -> Self {
        Self { retriever, llm }
    }

    /// Retrieve, prompt, answer
    pub async fn query(&self, query: &str) -> Result<Response> {
        let source_nodes = self.retriever.retrieve(query).await?;

        if source_nodes.is_empty() {
            tracing::warn!("No nodes retrieved for query");
            return Ok(Response {
                response: EMPTY_RESPONSE.to_string(),
                source_nodes,
            });
        }

        let prompt = qa_prompt(&source_nodes, query);
        let answer = self
            .llm
            .complete(&prompt)
            .await
            .with_context(|| format!("{} failed to answer", self.llm.name()))?;

        Ok(Response {
            response: answer.trim().to_string(),
            source_nodes,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// QA prompt with node texts as context
pub fn qa_prompt(nodes: &[NodeWithScore], query: &str) -> String {
    let context_str = nodes
        .iter()
        .map(|n| n.node.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    QA_PROMPT_TEMPLATE
        .replace("{context_str}", &context_str)
        .replace("{query_str}", query)
}

/// Text longer than `length` chars is cut to `length` chars, `...` included
fn truncate_chars(text: &str, length: usize) -> String {
    if text.chars().count() <= length {
        return text.to_string();
    }
    let kept: String = text.chars().take(length.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Fill text to `width` columns (0 leaves it unchanged)
pub fn wrap(text: &str, width: usize) -> String {
    if width == 0 {
        return text.to_string();
    }
    textwrap::fill(text, width)
}

// ============================================================================
// Tests
// ============================================================================
