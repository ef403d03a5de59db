//! atlas-rag - retrieval-augmented question answering
//!
//! Documents are split into nodes, embedded with Voyage AI and stored in
//! MongoDB Atlas Vector Search (or a local LanceDB table); questions are
//! answered by Azure OpenAI from the retrieved nodes. A site summarizer
//! fetches subpages and summarizes each one.

pub mod cli;
pub mod config;
pub mod docstore;
pub mod embedding;
pub mod http;
pub mod index;
pub mod llm;
pub mod node;
pub mod query;
pub mod reader;
pub mod scraper;
pub mod store;
pub mod summarize;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::{data_dir, load_env_file, AzureOpenAiConfig, ConfigError, MongoConfig, VoyageConfig};
pub use docstore::{DocRecord, DocStore, DocStoreStats};
pub use embedding::{EmbeddingProvider, VoyageEmbedding};
pub use index::{ServiceContext, VectorStoreIndex};
pub use llm::{AzureOpenAi, LanguageModel};
pub use node::{Document, Metadata, NodeWithScore, SentenceSplitter, TextNode};
pub use query::{wrap, Response, RetrieverQueryEngine, VectorIndexRetriever};
pub use reader::{load_file, DirectoryReader, ReaderConfig};
pub use scraper::{Page, WebScraper};
pub use store::{
    LanceVectorStore, MongoAtlasVectorStore, SimpleVectorStore, StoreKind, VectorStore,
    VectorStoreQuery,
};
pub use summarize::{PageSummary, SiteSummarizer};
