//! LLM Provider Abstraction
//!
//! Adapts concrete model backends (via Rig) to one blocking call and one
//! streaming call, so backend swaps never reach the plan workflow.

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use rig::completion::{CompletionError, Prompt, PromptError};
use rig::providers::{anthropic, openai};
use rig::streaming::{StreamingChoice, StreamingPrompt};

use super::{GenerationError, SamplingConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub endpoint: Option<String>,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            endpoint: None,
            model: "claude-3-7-sonnet".to_string(),
            api_key: None,
        }
    }
}

/// One prompt pair plus sampling, as handed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub sampling: SamplingConfig,
}

/// Text fragments in generation order. A backend error ends the stream.
pub type BackendStream = BoxStream<'static, Result<String, GenerationError>>;

/// Trait for model backends that can complete a grounded prompt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Wait for the whole response.
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Lazily stream the response. Nothing is sent until the stream is polled,
    /// and dropping the stream releases the underlying connection.
    fn stream(&self, request: GenerationRequest) -> BackendStream;
}

lazy_static! {
    // A 429 only counts next to a status marker, never as a bare number.
    static ref STATUS_429: Regex =
        Regex::new(r"(?i)(\bstatus(\s+code)?|\bhttp(/[\d.]+)?|\bcode)[\s:=]*\(?429\b|\b429\s+too many requests")
            .expect("429 pattern is valid");
}

fn looks_throttled(message: &str) -> bool {
    let lower = message.to_lowercase();
    STATUS_429.is_match(message)
        || lower.contains("too many requests")
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("throttl")
        || lower.contains("overloaded")
}

fn classify_completion_error(err: CompletionError) -> GenerationError {
    let message = err.to_string();
    let status_429 = matches!(
        &err,
        CompletionError::HttpError(e) if e.status().map(|s| s.as_u16()) == Some(429)
    );
    if status_429 || looks_throttled(&message) {
        return GenerationError::Throttled(message);
    }
    match err {
        CompletionError::HttpError(_) | CompletionError::RequestError(_) => {
            GenerationError::Transport(message)
        }
        _ => GenerationError::MalformedResponse(message),
    }
}

fn classify_prompt_error(err: PromptError) -> GenerationError {
    match err {
        PromptError::CompletionError(e) => classify_completion_error(e),
        other => GenerationError::MalformedResponse(other.to_string()),
    }
}

/// Build a single-turn agent carrying the system prompt and sampling profile.
macro_rules! grounded_agent {
    ($client:expr, $model:expr, $request:expr) => {
        $client
            .agent($model)
            .preamble(&$request.system)
            .temperature($request.sampling.temperature)
            .max_tokens($request.sampling.max_tokens as u64)
            .additional_params(json!({ "top_p": $request.sampling.top_p }))
            .build()
    };
}

/// Anthropic Claude backend using Rig
pub struct AnthropicBackend {
    client: anthropic::Client,
    model: String,
}

impl AnthropicBackend {
    pub fn new(api_key: Option<String>, endpoint: Option<String>, model: &str) -> Self {
        let client = match api_key {
            Some(key) => anthropic::Client::new(
                &key,
                endpoint.as_deref().unwrap_or("https://api.anthropic.com"),
                None,
                anthropic::ANTHROPIC_VERSION_LATEST,
            ),
            // Reads ANTHROPIC_API_KEY
            None => anthropic::Client::from_env(),
        };

        Self {
            client,
            model: model.to_string(),
        }
    }

    /// Map short model names to Rig's model ids; anything else passes through.
    fn model_id(&self) -> &str {
        match self.model.as_str() {
            "claude-3-7-sonnet" => anthropic::CLAUDE_3_7_SONNET,
            "claude-3-5-sonnet" => anthropic::CLAUDE_3_5_SONNET,
            "claude-3-haiku" => anthropic::CLAUDE_3_HAIKU,
            "claude-3-opus" => anthropic::CLAUDE_3_OPUS,
            other => other,
        }
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        debug!("Anthropic completion with model {}", self.model_id());
        grounded_agent!(self.client, self.model_id(), request)
            .prompt(request.user.as_str())
            .await
            .map_err(classify_prompt_error)
    }

    fn stream(&self, request: GenerationRequest) -> BackendStream {
        let agent = grounded_agent!(self.client, self.model_id(), &request);
        Box::pin(stream! {
            match agent.stream_prompt(request.user.as_str()).await {
                Ok(mut chunks) => {
                    while let Some(chunk) = chunks.next().await {
                        match chunk {
                            Ok(StreamingChoice::Message(text)) => yield Ok(text),
                            Ok(_) => continue,
                            Err(e) => {
                                yield Err(classify_completion_error(e));
                                break;
                            }
                        }
                    }
                }
                Err(e) => yield Err(classify_completion_error(e)),
            }
        })
    }
}

/// OpenAI-compatible backend using Rig
pub struct OpenAIBackend {
    client: openai::Client,
    model: String,
}

impl OpenAIBackend {
    pub fn new(api_key: Option<String>, endpoint: Option<String>, model: &str) -> Self {
        let client = match (api_key, endpoint) {
            (Some(key), Some(url)) => openai::Client::from_url(&key, &url),
            (Some(key), None) => openai::Client::new(&key),
            // Reads OPENAI_API_KEY
            (None, _) => openai::Client::from_env(),
        };

        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAIBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        debug!("OpenAI completion with model {}", self.model);
        grounded_agent!(self.client, &self.model, request)
            .prompt(request.user.as_str())
            .await
            .map_err(classify_prompt_error)
    }

    fn stream(&self, request: GenerationRequest) -> BackendStream {
        let agent = grounded_agent!(self.client, &self.model, &request);
        Box::pin(stream! {
            match agent.stream_prompt(request.user.as_str()).await {
                Ok(mut chunks) => {
                    while let Some(chunk) = chunks.next().await {
                        match chunk {
                            Ok(StreamingChoice::Message(text)) => yield Ok(text),
                            Ok(_) => continue,
                            Err(e) => {
                                yield Err(classify_completion_error(e));
                                break;
                            }
                        }
                    }
                }
                Err(e) => yield Err(classify_completion_error(e)),
            }
        })
    }
}

/// Replays canned chunks. Used for local runs without a model and in tests.
///
/// `complete` returns the concatenation of the chunks that `stream` yields,
/// so both delivery modes see the same backend response.
pub struct ScriptedBackend {
    chunks: Vec<String>,
    failure: Option<GenerationError>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Yield the scripted chunks, then fail with `error`.
    pub fn failing_with(mut self, error: GenerationError) -> Self {
        self.failure = Some(error);
        self
    }

    /// A generic remediation plan for `LLM_PROVIDER=mock`.
    pub fn canned() -> Self {
        Self::new([
            "Analysis: the supplied knowledge base is the only source used.\n\n",
            "To-do list:\n",
            "1. Check recent query performance in STL_QUERY and SVL_QUERY_SUMMARY.\n",
            "2. Review table maintenance (VACUUM and ANALYZE) per the knowledge base.\n",
            "3. Re-run the affected workload and compare elapsed times.\n",
        ])
    }

    /// Number of `complete` plus `stream` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(self.chunks.concat()),
        }
    }

    fn stream(&self, _request: GenerationRequest) -> BackendStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self.chunks.clone();
        let failure = self.failure.clone();
        Box::pin(stream! {
            for chunk in chunks {
                tokio::task::yield_now().await;
                yield Ok(chunk);
            }
            if let Some(error) = failure {
                yield Err(error);
            }
        })
    }
}

/// Create a backend from configuration
pub fn create_backend(config: &LLMConfig) -> crate::Result<Arc<dyn GenerationBackend>> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Ok(Arc::new(AnthropicBackend::new(
            config.api_key.clone(),
            config.endpoint.clone(),
            &config.model,
        ))),
        "openai" => Ok(Arc::new(OpenAIBackend::new(
            config.api_key.clone(),
            config.endpoint.clone(),
            &config.model,
        ))),
        "mock" => Ok(Arc::new(ScriptedBackend::canned())),
        other => Err(crate::Error::Config(format!("Unsupported LLM_PROVIDER: {}", other))),
    }
}
