//! MongoDB Atlas Vector Search store
//!
//! Nodes are stored as `{id, text, embedding, metadata}` documents, with the
//! owning document id in `metadata.ref_doc_id`. Queries use the
//! `$vectorSearch` aggregation stage, which needs an Atlas Vector Search index
//! on the `embedding` path.
//!
//! ref: https://www.mongodb.com/docs/atlas/atlas-vector-search/vector-search-stage/

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document as BsonDocument};
use mongodb::{Client, Collection};

use super::{batch_dimension, require_embedding, VectorStore, VectorStoreQuery};
use crate::config::MongoConfig;
use crate::node::{Metadata, NodeWithScore, TextNode};

const ID_KEY: &str = "id";
const TEXT_KEY: &str = "text";
const EMBEDDING_KEY: &str = "embedding";
const METADATA_KEY: &str = "metadata";
const REF_DOC_KEY: &str = "ref_doc_id";

/// Candidates examined per requested result
const CANDIDATE_MULTIPLIER: usize = 10;

/// MongoDB Atlas vector store
pub struct MongoAtlasVectorStore {
    client: Client,
    db_name: String,
    collection: Collection<BsonDocument>,
    index_name: String,
}

impl MongoAtlasVectorStore {
    /// Connect with resolved settings
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.connection_string)
            .await
            .context("Failed to create MongoDB client")?;

        let collection = client
            .database(&config.db_name)
            .collection::<BsonDocument>(&config.collection);

        tracing::info!(
            "Using MongoDB collection {}.{} (index: {})",
            config.db_name,
            config.collection,
            config.index_name
        );

        Ok(Self {
            client,
            db_name: config.db_name.clone(),
            collection,
            index_name: config.index_name.clone(),
        })
    }

    /// Round-trip to the server
    pub async fn ping(&self) -> Result<()> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 }, None)
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }
}

/// Node -> stored document
fn node_to_document(node: &TextNode) -> Result<BsonDocument> {
    let embedding: Vec<f64> = require_embedding(node)?
        .iter()
        .map(|&v| f64::from(v))
        .collect();

    let mut metadata =
        bson::to_document(&node.metadata).context("Failed to serialize node metadata")?;
    metadata.insert(REF_DOC_KEY, node.ref_doc_id.clone());

    Ok(doc! {
        ID_KEY: node.node_id.clone(),
        TEXT_KEY: node.text.clone(),
        EMBEDDING_KEY: embedding,
        METADATA_KEY: metadata,
    })
}

/// `$vectorSearch` + projection with the similarity score
fn search_pipeline(index_name: &str, query: &VectorStoreQuery) -> Vec<BsonDocument> {
    let query_vector: Vec<f64> = query.embedding.iter().map(|&v| f64::from(v)).collect();
    let top_k = query.top_k as i64;

    vec![
        doc! {
            "$vectorSearch": {
                "index": index_name,
                "path": EMBEDDING_KEY,
                "queryVector": query_vector,
                "numCandidates": top_k * CANDIDATE_MULTIPLIER as i64,
                "limit": top_k,
            }
        },
        doc! {
            "$project": {
                "_id": 0,
                ID_KEY: 1,
                TEXT_KEY: 1,
                METADATA_KEY: 1,
                "score": { "$meta": "vectorSearchScore" },
            }
        },
    ]
}

/// Search result document -> node
fn document_to_result(document: &BsonDocument) -> Result<NodeWithScore> {
    let node_id = document
        .get_str(ID_KEY)
        .context("Search result has no id")?
        .to_string();
    let text = document
        .get_str(TEXT_KEY)
        .context("Search result has no text")?
        .to_string();
    let score = match document.get("score") {
        Some(Bson::Double(v)) => *v as f32,
        Some(Bson::Int32(v)) => *v as f32,
        Some(Bson::Int64(v)) => *v as f32,
        _ => anyhow::bail!("Search result has no score"),
    };

    let mut metadata_doc = document.get_document(METADATA_KEY).cloned().unwrap_or_default();
    let ref_doc_id = match metadata_doc.remove(REF_DOC_KEY) {
        Some(Bson::String(id)) => id,
        _ => String::new(),
    };
    let metadata: Metadata = bson::from_document(metadata_doc).unwrap_or_default();

    Ok(NodeWithScore {
        node: TextNode {
            node_id,
            ref_doc_id,
            text,
            metadata,
            embedding: None,
        },
        score,
    })
}

#[async_trait]
impl VectorStore for MongoAtlasVectorStore {
    async fn add(&self, nodes: &[TextNode]) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }

        batch_dimension(nodes)?;

        let documents = nodes
            .iter()
            .map(node_to_document)
            .collect::<Result<Vec<_>>>()?;

        let result = self
            .collection
            .insert_many(documents, None)
            .await
            .context("Failed to insert nodes into MongoDB")?;

        tracing::debug!("Inserted {} nodes into MongoDB", result.inserted_ids.len());
        Ok(result.inserted_ids.len())
    }

    async fn query(&self, query: &VectorStoreQuery) -> Result<Vec<NodeWithScore>> {
        let pipeline = search_pipeline(&self.index_name, query);

        let cursor = self
            .collection
            .aggregate(pipeline, None)
            .await
            .context("Failed to run $vectorSearch")?;

        let documents: Vec<BsonDocument> = cursor
            .try_collect()
            .await
            .context("Failed to read $vectorSearch results")?;

        documents.iter().map(document_to_result).collect()
    }

    async fn delete(&self, ref_doc_id: &str) -> Result<usize> {
        let filter = doc! { format!("{}.{}", METADATA_KEY, REF_DOC_KEY): ref_doc_id };

        let result = self
            .collection
            .delete_many(filter, None)
            .await
            .context("Failed to delete nodes from MongoDB")?;

        Ok(result.deleted_count as usize)
    }

    async fn count(&self) -> Result<usize> {
        let count = self
            .collection
            .count_documents(doc! {}, None)
            .await
            .context("Failed to count MongoDB documents")?;
        Ok(count as usize)
    }

    fn name(&self) -> &str {
        "mongo"
    }
}

// ============================================================================
// Tests
// ============================================================================
