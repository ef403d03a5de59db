//! LanceDB Vector Store - local persistent vector search
//!
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::{batch_dimension, require_embedding, VectorStore, VectorStoreQuery};
use crate::node::{Metadata, NodeWithScore, TextNode};

/// Default table name
pub const DEFAULT_TABLE: &str = "nodes";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB vector store
///
/// Columnar Arrow storage on local disk; the embedding column width is fixed
/// by the first batch written to a table.
pub struct LanceVectorStore {
    db: Connection,
    table: String,
}

impl LanceVectorStore {
    /// Open (or create) a LanceDB directory
    ///
    /// # Arguments
    /// * `path` - `.lance` directory
    /// * `table` - table name inside it
    pub async fn open(path: &Path, table: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("node_id", DataType::Utf8, false),
            Field::new("ref_doc_id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// Nodes -> Arrow RecordBatch
    fn nodes_to_batch(nodes: &[TextNode]) -> Result<RecordBatch> {
        let dimension = i32::try_from(batch_dimension(nodes)?)
            .context("Embedding dimension too large")?;

        let node_ids: Vec<&str> = nodes.iter().map(|n| n.node_id.as_str()).collect();
        let ref_doc_ids: Vec<&str> = nodes.iter().map(|n| n.ref_doc_id.as_str()).collect();
        let texts: Vec<&str> = nodes.iter().map(|n| n.text.as_str()).collect();
        let metadata: Vec<String> = nodes
            .iter()
            .map(|n| serde_json::to_string(&n.metadata))
            .collect::<std::result::Result<_, _>>()
            .context("Failed to serialize node metadata")?;

        let mut flat = Vec::with_capacity(nodes.len() * dimension as usize);
        for node in nodes {
            flat.extend_from_slice(require_embedding(node)?);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![
                Arc::new(StringArray::from(node_ids)),
                Arc::new(StringArray::from(ref_doc_ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// Rows of a search result batch
    fn batch_to_results(batch: &RecordBatch) -> Result<Vec<NodeWithScore>> {
        let node_ids = string_column(batch, "node_id")?;
        let ref_doc_ids = string_column(batch, "ref_doc_id")?;
        let texts = string_column(batch, "text")?;
        let metadata = string_column(batch, "metadata")?;

        // _distance is added by LanceDB
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

        let mut results = Vec::with_capacity(batch.num_rows());

        for i in 0..batch.num_rows() {
            let metadata: Metadata = serde_json::from_str(metadata.value(i)).unwrap_or_default();

            results.push(NodeWithScore {
                node: TextNode {
                    node_id: node_ids.value(i).to_string(),
                    ref_doc_id: ref_doc_ids.value(i).to_string(),
                    text: texts.value(i).to_string(),
                    metadata,
                    embedding: None,
                },
                // cosine distance -> similarity
                score: 1.0 - distances.value(i),
            });
        }

        Ok(results)
    }

    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.iter().any(|n| n == &self.table))
            .unwrap_or(false)
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(&self.table)
            .execute()
            .await
            .with_context(|| format!("Failed to open table {}", self.table))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// Quote a string literal for a Lance SQL filter
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn add(&self, nodes: &[TextNode]) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }

        let batch = Self::nodes_to_batch(nodes)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            self.open_table()
                .await?
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            self.db
                .create_table(&self.table, batches)
                .execute()
                .await
                .context("Failed to create table")?;
            tracing::info!("Created LanceDB table {}", self.table);
        }

        Ok(nodes.len())
    }

    async fn query(&self, query: &VectorStoreQuery) -> Result<Vec<NodeWithScore>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let stream = self
            .open_table()
            .await?
            .vector_search(query.embedding.clone())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(query.top_k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut results = Vec::new();
        for batch in &batches {
            results.extend(Self::batch_to_results(batch)?);
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(query.top_k);
        Ok(results)
    }

    async fn delete(&self, ref_doc_id: &str) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self.open_table().await?;
        let filter = format!("ref_doc_id = {}", sql_literal(ref_doc_id));

        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows for ref_doc_id")?;

        if before > 0 {
            table
                .delete(&filter)
                .await
                .context("Failed to delete vectors")?;
        }

        Ok(before)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        self.open_table()
            .await?
            .count_rows(None)
            .await
            .context("Failed to count rows")
    }

    fn name(&self) -> &str {
        "lance"
    }
}

// ============================================================================
// Tests
// ============================================================================
