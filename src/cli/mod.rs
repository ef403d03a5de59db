//! CLI module
//!
//! atlas-rag command definitions and implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use crate::config::{self, AzureOpenAiConfig, MongoConfig, VoyageConfig};
use crate::docstore::{DocRecord, DocStore};
use crate::embedding::{EmbeddingProvider, VoyageEmbedding};
use crate::index::{ServiceContext, VectorStoreIndex};
use crate::llm::{AzureOpenAi, LanguageModel, DEFAULT_TEMPERATURE};
use crate::node::{Document, SentenceSplitter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::query::{
    wrap, Response, DEFAULT_SIMILARITY_TOP_K, DEFAULT_SOURCE_LENGTH, DEFAULT_WRAP_WIDTH,
};
use crate::reader::{load_file, DirectoryReader, ReaderConfig};
use crate::scraper::WebScraper;
use crate::store::{
    LanceVectorStore, MongoAtlasVectorStore, SimpleVectorStore, StoreKind, VectorStore,
    DEFAULT_LANCE_TABLE,
};
use crate::summarize::{SiteSummarizer, DEFAULT_MAX_CHARS, DEFAULT_PAGE_LIMIT};

/// LanceDB directory inside the data directory
const LANCE_DIR: &str = "lancedb";

const DEFAULT_QUESTION: &str = "What did the author love working on?";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "atlas-rag")]
#[command(
    version,
    about = "Question answering over your documents with Azure OpenAI, Voyage AI and MongoDB Atlas Vector Search",
    long_about = None
)]
pub struct Cli {
    /// .env file to load (default: search upwards from the current directory)
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Local data directory (ledger, LanceDB tables)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Sampling temperature of the completion model (0.0 to 2.0)
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_TEMPERATURE,
        value_parser = parse_temperature
    )]
    pub temperature: f32,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where nodes are stored
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Vector store backend
    #[arg(long, value_enum, default_value_t = StoreKind::Mongo)]
    pub store: StoreKind,

    /// Collection (mongo) or table (lance); defaults to MONGODB_COLLECTION or `nodes`
    #[arg(long)]
    pub collection: Option<String>,
}

/// How documents are cut into nodes
#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    /// Maximum words per node
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Words shared by consecutive nodes
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load documents, embed them and write them to a vector store
    Ingest {
        /// Directory to read
        #[arg(short, long, conflicts_with = "file")]
        dir: Option<PathBuf>,

        /// Single file to read
        #[arg(long)]
        file: Option<PathBuf>,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Only these extensions (comma separated)
        #[arg(long, value_delimiter = ',')]
        exts: Vec<String>,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        split: SplitArgs,

        /// Re-ingest documents whose content has not changed
        #[arg(long)]
        force: bool,
    },

    /// Answer a question from an existing vector store
    Query {
        /// Question
        query: String,

        #[command(flatten)]
        store: StoreArgs,

        /// Nodes retrieved as context
        #[arg(short = 'k', long, default_value_t = DEFAULT_SIMILARITY_TOP_K)]
        top_k: usize,

        /// Answer width in columns (0: no wrapping)
        #[arg(long, default_value_t = DEFAULT_WRAP_WIDTH)]
        wrap: usize,
    },

    /// Load a directory into an in-memory index and answer one question
    Ask {
        /// Question
        #[arg(default_value = DEFAULT_QUESTION)]
        query: String,

        /// Directory to read
        #[arg(short, long, default_value = "data/paul_graham")]
        dir: PathBuf,

        /// Nodes retrieved as context
        #[arg(short = 'k', long, default_value_t = DEFAULT_SIMILARITY_TOP_K)]
        top_k: usize,

        /// Answer width in columns (0: no wrapping)
        #[arg(long, default_value_t = DEFAULT_WRAP_WIDTH)]
        wrap: usize,

        #[command(flatten)]
        split: SplitArgs,

        /// Reuse (or create) a JSON snapshot of the in-memory index
        #[arg(long)]
        persist: Option<PathBuf>,
    },

    /// Summarize the subpages linked from a site's front page
    Summarize {
        /// Front page URL
        #[arg(default_value = "https://www.georgetown.edu/")]
        url: String,

        /// Subpages to summarize
        #[arg(short, long, default_value_t = DEFAULT_PAGE_LIMIT)]
        pages: usize,

        /// Characters of page text sent to the model
        #[arg(long, default_value_t = DEFAULT_MAX_CHARS)]
        max_chars: usize,

        /// Summary width in columns (0: no wrapping)
        #[arg(long, default_value_t = DEFAULT_WRAP_WIDTH)]
        wrap: usize,
    },

    /// List ingested documents
    List {
        /// Maximum entries
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete an ingested document and its vectors
    Delete {
        /// Document id (see `list`)
        doc_id: String,
    },

    /// Show configuration and store status
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// Run a parsed command
pub async fn run(cli: Cli) -> Result<()> {
    config::load_env_file(cli.env_file.as_deref())?;

    let data_dir = cli.data_dir.unwrap_or_else(config::data_dir);
    tracing::debug!("Data directory: {:?}", data_dir);

    match cli.command {
        Commands::Ingest {
            dir,
            file,
            recursive,
            exts,
            store,
            split,
            force,
        } => cmd_ingest(&data_dir, dir, file, recursive, exts, &store, &split, force).await,
        Commands::Query {
            query,
            store,
            top_k,
            wrap,
        } => cmd_query(&data_dir, &query, &store, top_k, wrap, cli.temperature).await,
        Commands::Ask {
            query,
            dir,
            top_k,
            wrap,
            split,
            persist,
        } => cmd_ask(&query, &dir, top_k, wrap, &split, persist, cli.temperature).await,
        Commands::Summarize {
            url,
            pages,
            max_chars,
            wrap,
        } => cmd_summarize(&url, pages, max_chars, wrap, cli.temperature).await,
        Commands::List { limit } => cmd_list(&data_dir, limit),
        Commands::Delete { doc_id } => cmd_delete(&data_dir, &doc_id).await,
        Commands::Status => cmd_status(&data_dir).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Ingest command
///
/// Reads files, embeds their nodes with Voyage and writes them to the chosen
/// store; the ledger skips documents whose text is unchanged.
#[allow(clippy::too_many_arguments)]
async fn cmd_ingest(
    data_dir: &Path,
    dir: Option<PathBuf>,
    file: Option<PathBuf>,
    recursive: bool,
    exts: Vec<String>,
    store_args: &StoreArgs,
    split: &SplitArgs,
    force: bool,
) -> Result<()> {
    let splitter = split.splitter()?;
    let embed_model: Arc<dyn EmbeddingProvider> = Arc::new(VoyageEmbedding::from_env()?);

    let documents = if let Some(ref file_path) = file {
        println!("[*] Reading file: {}", file_path.display());
        load_file(file_path).await?
    } else if let Some(ref dir_path) = dir {
        println!("[*] Reading directory: {}", dir_path.display());
        let config = ReaderConfig {
            recursive,
            required_exts: exts,
            ..Default::default()
        };
        DirectoryReader::with_config(dir_path, config)
            .load_data()
            .await?
    } else {
        bail!("Specify --dir or --file");
    };

    if documents.is_empty() {
        println!("[!] No documents to ingest.");
        return Ok(());
    }

    let (store, collection) = open_store(data_dir, store_args).await?;
    let docstore = DocStore::open_in(data_dir).context("Failed to open docstore")?;
    let index = VectorStoreIndex::new(store, embed_model, splitter);

    let total_bytes: usize = documents.iter().map(|d| d.text.len()).sum();
    println!(
        "[*] Ingesting {} documents ({}) into {}/{}",
        documents.len(),
        format_bytes(total_bytes),
        store_args.store,
        collection
    );
    println!();

    let stats = ingest_documents(
        &documents,
        &index,
        &docstore,
        store_args.store,
        &collection,
        force,
    )
    .await?;

    println!();
    println!(
        "[OK] Done: ingested {} ({} nodes), unchanged {}, failed {}",
        stats.ingested, stats.nodes, stats.unchanged, stats.failed
    );

    Ok(())
}

/// Ingest outcome counts
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct IngestStats {
    ingested: usize,
    unchanged: usize,
    failed: usize,
    nodes: usize,
}

/// Insert documents, consulting and updating the ledger
///
/// A source already recorded with the same hash is skipped unless `force`;
/// otherwise the previous version's nodes are deleted before inserting.
async fn ingest_documents(
    documents: &[Document],
    index: &VectorStoreIndex,
    docstore: &DocStore,
    kind: StoreKind,
    collection: &str,
    force: bool,
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();

    for (i, doc) in documents.iter().enumerate() {
        let source = doc.source();
        let hash = doc.hash();
        print!("[{}/{}] {}... ", i + 1, documents.len(), source);

        let previous = docstore.get_by_source(&source, kind.as_str(), collection)?;

        if let Some(ref previous) = previous {
            if previous.hash == hash && !force {
                println!("unchanged");
                stats.unchanged += 1;
                continue;
            }

            match index.delete_ref_doc(&previous.doc_id).await {
                Ok(n) => tracing::debug!("Removed {} stale nodes of {}", n, source),
                Err(e) => {
                    println!("failed to remove previous version: {}", e);
                    stats.failed += 1;
                    continue;
                }
            }
        }

        let node_count = match index.insert(doc).await {
            Ok(n) => n,
            Err(e) => {
                println!("failed: {:#}", e);
                stats.failed += 1;
                continue;
            }
        };

        let record = DocRecord {
            doc_id: doc.doc_id.clone(),
            source,
            file_name: doc.metadata.file_name.clone(),
            hash,
            node_count,
            store: kind.as_str().to_string(),
            collection: collection.to_string(),
            ingested_at: Utc::now(),
        };

        // Nodes the ledger does not know about are removed again
        if let Err(e) = docstore.upsert(&record) {
            println!("failed to record in docstore: {:#}", e);
            stats.failed += 1;
            if let Err(e) = index.delete_ref_doc(&doc.doc_id).await {
                tracing::warn!("Failed to remove unrecorded nodes of {}: {:#}", record.source, e);
            }
            continue;
        }

        println!("done ({} nodes)", node_count);
        stats.ingested += 1;
        stats.nodes += node_count;
    }

    Ok(stats)
}

/// Query command
async fn cmd_query(
    data_dir: &Path,
    query: &str,
    store_args: &StoreArgs,
    top_k: usize,
    wrap_width: usize,
    temperature: f32,
) -> Result<()> {
    let ctx = ServiceContext::from_env_with_temperature(temperature)?;
    let (store, collection) = open_store(data_dir, store_args).await?;

    tracing::info!("Querying {}/{}", store_args.store, collection);

    let index = VectorStoreIndex::from_vector_store(store, &ctx);
    let response = index
        .as_query_engine(ctx.llm.clone(), top_k)
        .query(query)
        .await
        .context("Query failed")?;

    print_response(query, &response, wrap_width);
    Ok(())
}

/// Ask command: in-memory index over a directory, one question
async fn cmd_ask(
    query: &str,
    dir: &Path,
    top_k: usize,
    wrap_width: usize,
    split: &SplitArgs,
    persist: Option<PathBuf>,
    temperature: f32,
) -> Result<()> {
    let ctx =
        ServiceContext::from_env_with_temperature(temperature)?.with_splitter(split.splitter()?);

    let index = match persist.as_deref() {
        Some(path) if path.exists() => {
            println!("[*] Loading index from {}", path.display());
            let store = Arc::new(SimpleVectorStore::from_persist_path(path)?);
            VectorStoreIndex::from_vector_store(store, &ctx)
        }
        _ => {
            println!("[*] Reading directory: {}", dir.display());
            let documents = DirectoryReader::new(dir).load_data().await?;

            let store = Arc::new(SimpleVectorStore::new());
            let index = VectorStoreIndex::from_documents(&documents, &ctx, store.clone()).await?;

            if let Some(path) = persist.as_deref() {
                store.persist(path)?;
                println!("[OK] Index saved to {}", path.display());
            }
            index
        }
    };

    let response = index
        .as_query_engine(ctx.llm.clone(), top_k)
        .query(query)
        .await
        .context("Query failed")?;

    print_response(query, &response, wrap_width);
    Ok(())
}

/// Summarize command
async fn cmd_summarize(
    url: &str,
    pages: usize,
    max_chars: usize,
    wrap_width: usize,
    temperature: f32,
) -> Result<()> {
    let llm: Arc<dyn LanguageModel> =
        Arc::new(AzureOpenAi::from_env()?.with_temperature(temperature));
    let scraper = WebScraper::new()?;
    let summarizer = SiteSummarizer::new(scraper, llm).with_max_chars(max_chars);

    println!("[*] Summarizing up to {} subpages of {}", pages, url);
    println!();

    let summaries = summarizer.summarize_site(url, pages).await?;

    if summaries.is_empty() {
        println!("[!] No subpage links found.");
        return Ok(());
    }

    for summary in &summaries {
        match (&summary.summary, &summary.error) {
            (Some(text), _) => {
                println!("[OK] Summary for {}:", summary.url);
                if let Some(ref title) = summary.title {
                    println!("     Title: {}", title);
                }
                println!("{}", wrap(text, wrap_width));
            }
            (None, Some(error)) => println!("[!] Error processing {}: {}", summary.url, error),
            (None, None) => println!("[!] No summary for {}", summary.url),
        }
        println!();
    }

    let failed = summaries.iter().filter(|s| !s.is_ok()).count();
    println!(
        "[OK] Done: {} summarized, {} failed",
        summaries.len() - failed,
        failed
    );

    Ok(())
}

/// List command
fn cmd_list(data_dir: &Path, limit: usize) -> Result<()> {
    let docstore = DocStore::open_in(data_dir).context("Failed to open docstore")?;
    let records = docstore.list(limit).context("Failed to list documents")?;

    if records.is_empty() {
        println!("[!] No documents ingested yet.");
        return Ok(());
    }

    println!("[OK] Ingested documents ({}):\n", records.len());

    for record in records {
        let name = record
            .file_name
            .as_deref()
            .map(|n| truncate_text(n, 40))
            .unwrap_or_else(|| "-".to_string());

        println!("  {} [{}/{}] {}", record.doc_id, record.store, record.collection, name);
        println!("        Source: {}", record.source);
        println!(
            "        {} | {} nodes | sha256 {}",
            record.ingested_at.format("%Y-%m-%d %H:%M"),
            record.node_count,
            truncate_text(&record.hash, 12)
        );
        println!();
    }

    Ok(())
}

/// Delete command: vectors first, then the ledger entry
async fn cmd_delete(data_dir: &Path, doc_id: &str) -> Result<()> {
    let docstore = DocStore::open_in(data_dir).context("Failed to open docstore")?;

    let record = docstore
        .get(doc_id)
        .context("Failed to read docstore")?
        .ok_or_else(|| anyhow::anyhow!("No ingested document with id '{}'", doc_id))?;

    let kind = StoreKind::parse(&record.store)
        .ok_or_else(|| anyhow::anyhow!("Unknown store '{}' in docstore", record.store))?;

    let store_args = StoreArgs {
        store: kind,
        collection: Some(record.collection.clone()),
    };
    let (store, _) = open_store(data_dir, &store_args).await?;

    let nodes = store
        .delete(doc_id)
        .await
        .context("Failed to delete vectors")?;
    docstore.delete(doc_id)?;

    println!("[OK] Deleted {} ({} nodes)", record.source, nodes);
    Ok(())
}

/// Status command
async fn cmd_status(data_dir: &Path) -> Result<()> {
    println!("atlas-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] Data directory: {}", data_dir.display());

    match AzureOpenAiConfig::from_env() {
        Ok(config) => println!(
            "[OK] Azure OpenAI: deployment {} (api-version {})",
            config.deployment, config.api_version
        ),
        Err(e) => println!("[!] Azure OpenAI: {}", e),
    }

    match VoyageConfig::from_env() {
        Ok(config) => println!("[OK] Voyage AI: model {}", config.model),
        Err(e) => println!("[!] Voyage AI: {}", e),
    }

    match DocStore::open_in(data_dir).and_then(|store| store.stats()) {
        Ok(stats) => println!(
            "[OK] Docstore: {} documents, {} nodes",
            stats.document_count, stats.node_count
        ),
        Err(e) => println!("[!] Docstore: {}", e),
    }

    let lance_dir = data_dir.join(LANCE_DIR);
    if lance_dir.exists() {
        match LanceVectorStore::open(&lance_dir, DEFAULT_LANCE_TABLE).await {
            Ok(store) => match store.count().await {
                Ok(count) => println!("[OK] LanceDB: {} nodes in {}", count, store.table_name()),
                Err(e) => tracing::debug!("LanceDB count failed: {}", e),
            },
            Err(e) => println!("[!] LanceDB: {}", e),
        }
    }

    match MongoConfig::from_env() {
        Ok(config) => match MongoAtlasVectorStore::connect(&config).await {
            Ok(store) => match store.ping().await {
                Ok(()) => match store.count().await {
                    Ok(count) => println!(
                        "[OK] MongoDB: {} documents in {}.{}",
                        count, config.db_name, store.collection_name()
                    ),
                    Err(e) => println!("[!] MongoDB: {}", e),
                },
                Err(e) => println!("[!] MongoDB: {:#}", e),
            },
            Err(e) => println!("[!] MongoDB: {:#}", e),
        },
        Err(e) => println!("[!] MongoDB: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

impl SplitArgs {
    fn splitter(&self) -> Result<SentenceSplitter> {
        SentenceSplitter::new(self.chunk_size, self.chunk_overlap)
    }
}

/// Open the selected backend; returns it with its collection/table name
async fn open_store(data_dir: &Path, args: &StoreArgs) -> Result<(Arc<dyn VectorStore>, String)> {
    match args.store {
        StoreKind::Lance => {
            let table = args
                .collection
                .clone()
                .unwrap_or_else(|| DEFAULT_LANCE_TABLE.to_string());
            let store = LanceVectorStore::open(&data_dir.join(LANCE_DIR), &table).await?;
            Ok((Arc::new(store), table))
        }
        StoreKind::Mongo => {
            let mut config = MongoConfig::from_env()?;
            if let Some(ref collection) = args.collection {
                config = config.with_collection(collection.clone());
            }
            let store = MongoAtlasVectorStore::connect(&config).await?;
            Ok((Arc::new(store), config.collection))
        }
    }
}

/// Sources, question and answer
fn print_response(query: &str, response: &Response, wrap_width: usize) {
    let sources = response.get_formatted_sources(DEFAULT_SOURCE_LENGTH);
    if !sources.is_empty() {
        println!("{}", sources);
        println!();
    }
    println!("Query was: {}", query);
    println!("Answer was: {}", wrap(&response.response, wrap_width));
}

/// Truncate text (UTF-8 safe)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// `--temperature` values Azure OpenAI accepts
fn parse_temperature(value: &str) -> std::result::Result<f32, String> {
    let temperature: f32 = value
        .parse()
        .map_err(|_| format!("`{}` is not a number", value))?;
    if !(0.0..=2.0).contains(&temperature) {
        return Err(format!("{} is outside 0.0..=2.0", temperature));
    }
    Ok(temperature)
}

/// Byte size formatting
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Metadata;
    use crate::testing::FakeEmbedding;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_defaults() {
        let cli = Cli::try_parse_from(["atlas-rag", "query", "What did the author do?"]).unwrap();
        match cli.command {
            Commands::Query {
                query,
                store,
                top_k,
                wrap,
            } => {
                assert_eq!(query, "What did the author do?");
                assert_eq!(store.store, StoreKind::Mongo);
                assert_eq!(store.collection, None);
                assert_eq!(top_k, 2);
                assert_eq!(wrap, 100);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "atlas-rag",
            "ingest",
            "--dir",
            "data/paul_graham",
            "--store",
            "lance",
            "--exts",
            "txt,md",
            "--env-file",
            "../.env",
            "--data-dir",
            "/tmp/atlas",
        ])
        .unwrap();

        assert_eq!(cli.env_file, Some(PathBuf::from("../.env")));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/atlas")));
        match cli.command {
            Commands::Ingest {
                store, exts, split, ..
            } => {
                assert_eq!(store.store, StoreKind::Lance);
                assert_eq!(exts, vec!["txt", "md"]);
                assert_eq!(split.chunk_size, DEFAULT_CHUNK_SIZE);
            }
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn test_parse_temperature_flag() {
        let cli = Cli::try_parse_from(["atlas-rag", "query", "q"]).unwrap();
        assert_eq!(cli.temperature, DEFAULT_TEMPERATURE);

        let cli =
            Cli::try_parse_from(["atlas-rag", "summarize", "--temperature", "0.7"]).unwrap();
        assert_eq!(cli.temperature, 0.7);

        assert!(Cli::try_parse_from(["atlas-rag", "ask", "--temperature", "3"]).is_err());
        assert!(Cli::try_parse_from(["atlas-rag", "ask", "--temperature", "warm"]).is_err());
    }

    #[test]
    fn test_parse_summarize_defaults() {
        let cli = Cli::try_parse_from(["atlas-rag", "summarize"]).unwrap();
        match cli.command {
            Commands::Summarize { url, pages, .. } => {
                assert_eq!(url, "https://www.georgetown.edu/");
                assert_eq!(pages, 3);
            }
            _ => panic!("expected summarize"),
        }
    }

    #[test]
    fn test_ingest_rejects_dir_and_file() {
        let result = Cli::try_parse_from([
            "atlas-rag", "ingest", "--dir", "a", "--file", "b.txt",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ingest_documents_skips_unchanged() {
        let dir = TempDir::new().unwrap();
        let docstore = DocStore::open_in(dir.path()).unwrap();
        let store = Arc::new(SimpleVectorStore::new());
        let index = VectorStoreIndex::new(
            store.clone(),
            Arc::new(FakeEmbedding::new()),
            SentenceSplitter::new(16, 2).unwrap(),
        );

        let metadata = Metadata {
            file_path: Some("/data/essay.txt".to_string()),
            file_name: Some("essay.txt".to_string()),
            ..Default::default()
        };
        let first = Document::new("I wrote short stories. They were awful.", metadata.clone());

        let stats = ingest_documents(&[first.clone()], &index, &docstore, StoreKind::Lance, "nodes", false)
            .await
            .unwrap();
        assert_eq!(stats.ingested, 1);
        let stored = store.count().await.unwrap();
        assert!(stored > 0);

        // same text under a new document id
        let again = Document::new(first.text.clone(), metadata.clone());
        let stats = ingest_documents(&[again], &index, &docstore, StoreKind::Lance, "nodes", false)
            .await
            .unwrap();
        assert_eq!(stats.unchanged, 1);
        assert_eq!(store.count().await.unwrap(), stored);

        let record = docstore
            .get_by_source("/data/essay.txt", "lance", "nodes")
            .unwrap()
            .unwrap();
        assert_eq!(record.doc_id, first.doc_id);
    }

    #[tokio::test]
    async fn test_ingest_documents_ledger_failure_is_per_document() {
        let dir = TempDir::new().unwrap();
        let docstore = DocStore::open_in(dir.path()).unwrap();
        let store = Arc::new(SimpleVectorStore::new());
        let index = VectorStoreIndex::new(
            store.clone(),
            Arc::new(FakeEmbedding::new()),
            SentenceSplitter::new(16, 2).unwrap(),
        );

        let conn = rusqlite::Connection::open(docstore.db_path()).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_locked BEFORE INSERT ON documents
             WHEN NEW.source = '/data/locked.txt'
             BEGIN SELECT RAISE(ABORT, 'ledger rejected'); END;",
        )
        .unwrap();

        let locked = Document::new(
            "Lisp macros rewrite code.",
            Metadata {
                file_path: Some("/data/locked.txt".to_string()),
                ..Default::default()
            },
        );
        let open = Document::new(
            "Painting taught me to look.",
            Metadata {
                file_path: Some("/data/open.txt".to_string()),
                ..Default::default()
            },
        );

        let stats = ingest_documents(
            &[locked.clone(), open.clone()],
            &index,
            &docstore,
            StoreKind::Lance,
            "nodes",
            false,
        )
        .await
        .unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.ingested, 1);
        assert_eq!(store.delete(&locked.doc_id).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), stats.nodes);
        assert!(docstore
            .get_by_source("/data/locked.txt", "lance", "nodes")
            .unwrap()
            .is_none());
        assert!(docstore.get(&open.doc_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ingest_documents_replaces_changed() {
        let dir = TempDir::new().unwrap();
        let docstore = DocStore::open_in(dir.path()).unwrap();
        let store = Arc::new(SimpleVectorStore::new());
        let index = VectorStoreIndex::new(
            store.clone(),
            Arc::new(FakeEmbedding::new()),
            SentenceSplitter::new(16, 2).unwrap(),
        );

        let metadata = Metadata {
            file_path: Some("/data/essay.txt".to_string()),
            ..Default::default()
        };
        let first = Document::new("Old text about painting.", metadata.clone());
        let second = Document::new("New text about programming in Lisp.", metadata);

        ingest_documents(&[first.clone()], &index, &docstore, StoreKind::Lance, "nodes", false)
            .await
            .unwrap();
        let stats = ingest_documents(&[second.clone()], &index, &docstore, StoreKind::Lance, "nodes", false)
            .await
            .unwrap();
        assert_eq!(stats.ingested, 1);

        assert_eq!(store.delete(&first.doc_id).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), stats.nodes);

        let record = docstore
            .get_by_source("/data/essay.txt", "lance", "nodes")
            .unwrap()
            .unwrap();
        assert_eq!(record.doc_id, second.doc_id);
        assert_eq!(record.hash, second.hash());
        assert_eq!(docstore.stats().unwrap().document_count, 1);
    }

    #[tokio::test]
    async fn test_ingest_documents_force() {
        let dir = TempDir::new().unwrap();
        let docstore = DocStore::open_in(dir.path()).unwrap();
        let store = Arc::new(SimpleVectorStore::new());
        let index = VectorStoreIndex::new(
            store.clone(),
            Arc::new(FakeEmbedding::new()),
            SentenceSplitter::new(16, 2).unwrap(),
        );

        let doc = Document::new("Same text.", Metadata::default());
        ingest_documents(&[doc.clone()], &index, &docstore, StoreKind::Lance, "nodes", false)
            .await
            .unwrap();
        let stats = ingest_documents(&[doc], &index, &docstore, StoreKind::Lance, "nodes", true)
            .await
            .unwrap();

        assert_eq!(stats.ingested, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("héllo wörld", 5), "héllo...");
    }
}
