//! Configuration - `.env` loading and service settings
//!
//! Every setting comes from the environment (optionally seeded from a `.env`
//! file). Sections are resolved only when a command needs them, so the site
//! summarizer never asks for Voyage or MongoDB credentials.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

/// Default Azure OpenAI REST API version
pub const DEFAULT_API_VERSION: &str = "2024-02-01";

/// Default Voyage embedding model
pub const DEFAULT_VOYAGE_MODEL: &str = "voyage-2";

/// Default MongoDB collection
pub const DEFAULT_COLLECTION: &str = "paul_graham_essay";

/// Default Atlas Vector Search index name
pub const DEFAULT_INDEX_NAME: &str = "default";

// ============================================================================
// Errors
// ============================================================================

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {0} is set but empty")]
    Empty(&'static str),

    #[error("environment variable {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

// ============================================================================
// .env Loading
// ============================================================================

/// Load a `.env` file into the process environment.
///
/// With `None` the usual search (current directory and its parents) is used and
/// a missing file is fine. An explicit path must exist.
///
/// # Returns
/// The path that was loaded, if any
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>> {
    match path {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("Failed to load env file: {:?}", path))?;
            tracing::debug!("Loaded environment from {:?}", path);
            Ok(Some(path.to_path_buf()))
        }
        None => match dotenv::dotenv() {
            Ok(found) => {
                tracing::debug!("Loaded environment from {:?}", found);
                Ok(Some(found))
            }
            Err(dotenv::Error::Io(_)) => Ok(None),
            Err(e) => Err(e).context("Failed to parse .env file"),
        },
    }
}

/// Data directory (`ATLAS_RAG_DATA_DIR` or `<local data dir>/.atlas-rag`)
pub fn data_dir() -> PathBuf {
    if let Some(dir) = non_empty_env("ATLAS_RAG_DATA_DIR") {
        return PathBuf::from(dir);
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".atlas-rag")
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Process-environment lookup used by the `from_env` constructors
fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Err(ConfigError::Missing(name)),
        Some(v) if v.trim().is_empty() => Err(ConfigError::Empty(name)),
        Some(v) => Ok(v.trim().to_string()),
    }
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Azure OpenAI
// ============================================================================

/// Azure OpenAI chat completion settings
#[derive(Clone, PartialEq, Eq)]
pub struct AzureOpenAiConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`
    pub endpoint: String,
    pub api_key: String,
    /// Deployment name used in the request path
    pub deployment: String,
    /// Underlying model name (informational)
    pub model: Option<String>,
    pub api_version: String,
}

impl AzureOpenAiConfig {
    /// Read from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Read through an arbitrary variable lookup
    ///
    /// `OPENAI_DEPLOYMENT_COMPLETION` falls back to `OPENAI_MODEL_COMPLETION`,
    /// since deployments are commonly named after the model.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = required(&lookup, "AZURE_ENDPOINT")?;
        let endpoint = normalize_endpoint("AZURE_ENDPOINT", &endpoint)?;
        let api_key = required(&lookup, "OPENAI_API_KEY")?;
        let model = optional(&lookup, "OPENAI_MODEL_COMPLETION");

        let deployment = optional(&lookup, "OPENAI_DEPLOYMENT_COMPLETION")
            .or_else(|| model.clone())
            .ok_or(ConfigError::Missing("OPENAI_DEPLOYMENT_COMPLETION"))?;

        let api_version = optional(&lookup, "OPENAI_API_VERSION")
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        Ok(Self {
            endpoint,
            api_key,
            deployment,
            model,
            api_version,
        })
    }

    /// Chat completions URL for this deployment
    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

impl fmt::Debug for AzureOpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureOpenAiConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("deployment", &self.deployment)
            .field("model", &self.model)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Trim the trailing slash and make sure the endpoint is an http(s) URL
fn normalize_endpoint(name: &'static str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    Ok(trimmed.to_string())
}

// ============================================================================
// Voyage AI
// ============================================================================

/// Voyage AI embedding settings
#[derive(Clone, PartialEq, Eq)]
pub struct VoyageConfig {
    pub api_key: String,
    pub model: String,
}

impl VoyageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api_key: required(&lookup, "VOYAGE_API_KEY")?,
            model: optional(&lookup, "VOYAGE_MODEL_NAME")
                .unwrap_or_else(|| DEFAULT_VOYAGE_MODEL.to_string()),
        })
    }
}

impl fmt::Debug for VoyageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoyageConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

// ============================================================================
// MongoDB
// ============================================================================

/// MongoDB Atlas vector store settings
#[derive(Clone, PartialEq, Eq)]
pub struct MongoConfig {
    pub connection_string: String,
    pub db_name: String,
    pub collection: String,
    /// Atlas Vector Search index name
    pub index_name: String,
}

impl MongoConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connection_string = required(&lookup, "CONNECTION_STRING")?;
        if !connection_string.starts_with("mongodb://")
            && !connection_string.starts_with("mongodb+srv://")
        {
            return Err(ConfigError::Invalid {
                name: "CONNECTION_STRING",
                reason: "expected a mongodb:// or mongodb+srv:// URI".to_string(),
            });
        }

        Ok(Self {
            connection_string,
            db_name: required(&lookup, "DB_NAME")?,
            collection: optional(&lookup, "MONGODB_COLLECTION")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            index_name: optional(&lookup, "MONGODB_INDEX_NAME")
                .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
        })
    }

    /// Same settings with a different collection
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }
}

impl fmt::Debug for MongoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoConfig")
            .field("connection_string", &"<redacted>")
            .field("db_name", &self.db_name)
            .field("collection", &self.collection)
            .field("index_name", &self.index_name)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
