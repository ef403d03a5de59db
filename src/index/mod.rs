//! Vector store index
//!
//! Ties a splitter, an embedding model and a vector store together:
//! documents go in as nodes with embeddings, retrievers and query engines
//! come out.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embedding::{EmbeddingProvider, VoyageEmbedding};
use crate::llm::{AzureOpenAi, LanguageModel, DEFAULT_TEMPERATURE};
use crate::node::{Document, SentenceSplitter, TextNode};
use crate::query::{RetrieverQueryEngine, VectorIndexRetriever};
use crate::store::VectorStore;

// ============================================================================
// ServiceContext
// ============================================================================

/// Models and splitter shared by indexing and querying
#[derive(Clone)]
pub struct ServiceContext {
    pub llm: Arc<dyn LanguageModel>,
    pub embed_model: Arc<dyn EmbeddingProvider>,
    pub splitter: SentenceSplitter,
}

impl ServiceContext {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        embed_model: Arc<dyn EmbeddingProvider>,
        splitter: SentenceSplitter,
    ) -> Self {
        Self {
            llm,
            embed_model,
            splitter,
        }
    }

    /// Azure OpenAI + Voyage from environment, default splitter
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_temperature(DEFAULT_TEMPERATURE)
    }

    /// Same as [`ServiceContext::from_env`] with a given sampling temperature
    pub fn from_env_with_temperature(temperature: f32) -> Result<Self> {
        let llm = AzureOpenAi::from_env()?.with_temperature(temperature);
        let embed_model = VoyageEmbedding::from_env()?;

        tracing::info!(
            "Service context: llm={}, embed_model={}",
            llm.name(),
            embed_model.name()
        );

        Ok(Self::new(
            Arc::new(llm),
            Arc::new(embed_model),
            SentenceSplitter::default(),
        ))
    }

    pub fn with_splitter(mut self, splitter: SentenceSplitter) -> Self {
        self.splitter = splitter;
        self
    }
}

// ============================================================================
// VectorStoreIndex
// ============================================================================

/// Index over a vector store
pub struct VectorStoreIndex {
    store: Arc<dyn VectorStore>,
    embed_model: Arc<dyn EmbeddingProvider>,
    splitter: SentenceSplitter,
}

impl VectorStoreIndex {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embed_model: Arc<dyn EmbeddingProvider>,
        splitter: SentenceSplitter,
    ) -> Self {
        Self {
            store,
            embed_model,
            splitter,
        }
    }

    /// Index over an already populated store
    pub fn from_vector_store(store: Arc<dyn VectorStore>, ctx: &ServiceContext) -> Self {
        Self::new(store, ctx.embed_model.clone(), ctx.splitter.clone())
    }

    /// Split, embed and store documents
    ///
    /// # Arguments
    /// * `documents` - loaded documents
    /// * `ctx` - embedding model and splitter
    /// * `store` - destination vector store
    pub async fn from_documents(
        documents: &[Document],
        ctx: &ServiceContext,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let index = Self::from_vector_store(store, ctx);

        let nodes = index.splitter.get_nodes_from_documents(documents);
        tracing::info!(
            "Indexing {} documents as {} nodes",
            documents.len(),
            nodes.len()
        );

        index.insert_nodes(nodes).await?;
        Ok(index)
    }

    /// Add one document, returning its node count
    pub async fn insert(&self, document: &Document) -> Result<usize> {
        let nodes = self
            .splitter
            .get_nodes_from_documents(std::slice::from_ref(document));
        self.insert_nodes(nodes).await
    }

    /// Embed nodes that have no embedding yet and store all of them
    pub async fn insert_nodes(&self, mut nodes: Vec<TextNode>) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }

        let pending: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.embedding.is_none())
            .map(|(i, _)| i)
            .collect();

        if !pending.is_empty() {
            let texts: Vec<String> = pending.iter().map(|&i| nodes[i].text.clone()).collect();
            let embeddings = self
                .embed_model
                .embed_documents(&texts)
                .await
                .context("Failed to embed nodes")?;

            if embeddings.len() != pending.len() {
                anyhow::bail!(
                    "Embedding count mismatch: expected {}, got {}",
                    pending.len(),
                    embeddings.len()
                );
            }

            for (i, embedding) in pending.into_iter().zip(embeddings) {
                nodes[i].embedding = Some(embedding);
            }
        }

        let added = self.store.add(&nodes).await?;
        tracing::debug!("Stored {} nodes in {}", added, self.store.name());
        Ok(added)
    }

    /// Remove every node of a document from the store
    pub async fn delete_ref_doc(&self, ref_doc_id: &str) -> Result<usize> {
        let deleted = self.store.delete(ref_doc_id).await?;
        tracing::debug!("Deleted {} nodes of {}", deleted, ref_doc_id);
        Ok(deleted)
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn as_retriever(&self, top_k: usize) -> VectorIndexRetriever {
        VectorIndexRetriever::new(self.store.clone(), self.embed_model.clone(), top_k)
    }

    pub fn as_query_engine(
        &self,
        llm: Arc<dyn LanguageModel>,
        top_k: usize,
    ) -> RetrieverQueryEngine {
        RetrieverQueryEngine::new(self.as_retriever(top_k), llm)
    }
}

// ============================================================================
// Tests
// ============================================================================
