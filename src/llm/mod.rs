//! LLM module - Azure OpenAI chat completions
//!
//! A single-turn completion interface: one user prompt in, one answer out.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AzureOpenAiConfig;
use crate::http::{send_with_retry, RetryPolicy};

// ============================================================================
// LanguageModel Trait
// ============================================================================

/// Language model trait
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a single prompt
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete several prompts (default: one at a time, in order)
    async fn generate(&self, prompts: &[String]) -> Result<Vec<String>> {
        let mut results = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            results.push(self.complete(prompt).await?);
        }
        Ok(results)
    }

    /// Model or deployment name
    fn name(&self) -> &str;
}

// ============================================================================
// Azure OpenAI
// ============================================================================

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Azure OpenAI chat completion client
pub struct AzureOpenAi {
    config: AzureOpenAiConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl AzureOpenAi {
    pub fn new(config: AzureOpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            client,
            retry: RetryPolicy::default(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        })
    }

    /// Create from the `AZURE_ENDPOINT` / `OPENAI_*` variables
    pub fn from_env() -> Result<Self> {
        let config = AzureOpenAiConfig::from_env()?;
        tracing::info!(
            "Using Azure OpenAI deployment {} (model: {})",
            config.deployment,
            config.model.as_deref().unwrap_or("-")
        );
        Self::new(config)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn request<'a>(&self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Chat completions request body
/// source: https://learn.microsoft.com/azure/ai-services/openai/reference
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Chat completions response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Error body: `{"error": {"code": "...", "message": "..."}}`
#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

fn openai_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<OpenAiError>(body)
        .ok()
        .map(|e| match e.error.code {
            Some(code) => format!("{} ({})", e.error.message, code),
            None => e.error.message,
        })
}

/// First choice's text
fn parse_completion(body: &str) -> Result<String> {
    let response: ChatResponse =
        serde_json::from_str(body).context("Failed to parse chat completion response")?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Azure OpenAI: no completion returned"))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        anyhow::bail!("Azure OpenAI: completion blocked by content filter");
    }

    choice
        .message
        .content
        .ok_or_else(|| anyhow::anyhow!("Azure OpenAI: completion has no content"))
}

#[async_trait]
impl LanguageModel for AzureOpenAi {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = self.config.chat_completions_url();
        let request = self.request(prompt);

        tracing::debug!("Completion request ({} chars)", prompt.len());

        let body = send_with_retry(
            "Azure OpenAI",
            &self.retry,
            None,
            || {
                self.client
                    .post(&url)
                    .header("api-key", &self.config.api_key)
                    .json(&request)
            },
            openai_error_message,
        )
        .await?;

        parse_completion(&body)
    }

    fn name(&self) -> &str {
        &self.config.deployment
    }
}

// ============================================================================
// Tests
// ============================================================================
