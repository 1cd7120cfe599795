
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::types::{
    AssistantReply, ChatMessage, Generation, GenerationOptions, Role, ToolCallRequest,
};
use super::{EmbeddingProvider, GenerationProvider};
use crate::config::OllamaConfig;
use crate::rag::similarity::ensure_finite;
use crate::tools::ToolDefinition;
use crate::{RagError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 1;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking HTTP client for the Ollama REST API.
///
/// The async trait impls move each call onto the blocking pool.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    embedding_dimension: usize,
    system_prompt: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SamplingOptions {
    temperature: f32,
    top_p: f32,
}

impl From<&GenerationOptions> for SamplingOptions {
    fn from(options: &GenerationOptions) -> Self {
        Self {
            temperature: options.temperature,
            top_p: options.top_p,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: SamplingOptions,
}

/// `/api/generate` with attached images and no system prompt
#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub format: Option<String>,
    pub family: Option<String>,
    pub families: Option<Vec<String>>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Serialize)]
struct ShowRequest<'a> {
    model: &'a str,
}

/// Details reported by `/api/show`
#[derive(Debug, Deserialize)]
pub struct ModelShow {
    pub license: Option<String>,
    pub parameters: Option<String>,
    pub template: Option<String>,
    pub details: Option<ModelDetails>,
    pub capabilities: Option<Vec<String>>,
    pub model_info: Option<Map<String, Value>>,
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self {
            role: message.role,
            content: &message.content,
            tool_name: message.tool_name.as_deref(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    function: WireFunctionCall {
                        name: call.tool_name.clone(),
                        arguments: Value::Object(call.arguments.clone()),
                    },
                })
                .collect(),
        }
    }
}

impl<'a> From<&'a ToolDefinition> for WireTool<'a> {
    fn from(definition: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: WireFunction {
                name: &definition.name,
                description: &definition.description,
                parameters: &definition.json_schema,
            },
        }
    }
}

/// Some models send arguments as a JSON-encoded string instead of an object.
fn parse_tool_arguments(name: &str, arguments: Value) -> Result<Map<String, Value>> {
    match arguments {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        Value::String(raw) if raw.trim().is_empty() => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(RagError::GenerationFailure(format!(
                "Tool call '{name}' has arguments that are not a JSON object: {raw}"
            ))),
        },
        other => Err(RagError::GenerationFailure(format!(
            "Tool call '{name}' has arguments that are not a JSON object: {other}"
        ))),
    }
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> anyhow::Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            embedding_dimension: config.embedding_dimension as usize,
            system_prompt: config.system_prompt.clone(),
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    /// Opt into retrying server and transport errors. The default is a single attempt.
    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self, models: &[&str]) -> anyhow::Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let available = self.list_models().context("Server ping failed")?;

        for model in models {
            if !available.iter().any(|m| m.name == *model) {
                let names: Vec<&str> = available.iter().map(|m| m.name.as_str()).collect();
                warn!(
                    "Model {} not found. Available models: {:?}",
                    model, names
                );
                return Err(anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    model,
                    names
                ));
            }
        }

        info!(
            "Health check passed for Ollama server at {} with models {:?}",
            self.base_url, models
        );
        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Details for one installed model
    #[inline]
    pub fn show_model(&self, name: &str) -> anyhow::Result<ModelShow> {
        debug!("Fetching details for model {}", name);

        let show: ModelShow = self
            .post_json("/api/show", &ShowRequest { model: name })
            .with_context(|| format!("Failed to fetch details for model '{name}'"))?;
        Ok(show)
    }

    #[inline]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Embed `text` with the configured embedding model
    #[inline]
    pub fn embed_blocking(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: &self.embedding_model,
            input: text,
        };

        let embed_response: EmbedResponse = self
            .post_json("/api/embed", &request)
            .map_err(|e| RagError::EmbeddingFailure(format!("{e:#}")))?;

        if let Some(message) = embed_response.error {
            return Err(RagError::EmbeddingFailure(format!(
                "Ollama returned an error: {message}"
            )));
        }

        let embedding = embed_response
            .embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                RagError::EmbeddingFailure("Response does not contain an embedding".to_string())
            })?;

        if embedding.len() != self.embedding_dimension {
            return Err(RagError::EmbeddingFailure(format!(
                "Expected {} dimensions from {}, got {}",
                self.embedding_dimension,
                self.embedding_model,
                embedding.len()
            )));
        }
        ensure_finite(&embedding)?;

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    /// Single-prompt completion through `/api/generate`
    #[inline]
    pub fn generate_blocking(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation> {
        debug!(
            "Generating with model {} (prompt length: {})",
            options.model,
            prompt.len()
        );

        let request = GenerateRequest {
            model: &options.model,
            prompt,
            system: &self.system_prompt,
            stream: false,
            options: options.into(),
        };

        let response: GenerateResponse = self
            .post_json("/api/generate", &request)
            .map_err(|e| RagError::GenerationFailure(format!("{e:#}")))?;

        Self::generation_from_response(response, options)
    }

    /// Describe an image with a vision-capable model.
    ///
    /// The image goes out base64-encoded in the `images` field of `/api/generate`.
    #[inline]
    pub fn analyze_image(
        &self,
        image: &[u8],
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation> {
        if image.is_empty() {
            return Err(RagError::InvalidOptions("image is empty".to_string()));
        }

        debug!(
            "Analyzing image ({} bytes) with model {}",
            image.len(),
            options.model
        );

        let request = ImageRequest {
            model: &options.model,
            prompt,
            images: vec![base64::engine::general_purpose::STANDARD.encode(image)],
            stream: false,
            options: options.into(),
        };

        let response: GenerateResponse = self
            .post_json("/api/generate", &request)
            .map_err(|e| RagError::GenerationFailure(format!("{e:#}")))?;

        Self::generation_from_response(response, options)
    }

    fn generation_from_response(
        response: GenerateResponse,
        options: &GenerationOptions,
    ) -> Result<Generation> {
        if let Some(message) = response.error {
            return Err(RagError::GenerationFailure(format!(
                "Ollama returned an error: {message}"
            )));
        }

        let text = response.response.ok_or_else(|| {
            RagError::GenerationFailure(
                "Invalid response from Ollama: does not contain the response field".to_string(),
            )
        })?;

        Ok(Generation {
            text,
            model: options.model.clone(),
            created_at: Utc::now(),
        })
    }

    /// One chat turn through `/api/chat`
    #[inline]
    pub fn converse_blocking(
        &self,
        transcript: &[ChatMessage],
        options: &GenerationOptions,
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply> {
        debug!(
            "Chat turn with model {} ({} messages, {} tools)",
            options.model,
            transcript.len(),
            tools.len()
        );

        let system = ChatMessage::system(self.system_prompt.clone());
        let needs_system = !self.system_prompt.is_empty()
            && transcript.first().is_none_or(|m| m.role != Role::System);

        let mut messages: Vec<WireMessage<'_>> = Vec::with_capacity(transcript.len() + 1);
        if needs_system {
            messages.push((&system).into());
        }
        messages.extend(transcript.iter().map(WireMessage::from));

        let request = ChatRequest {
            model: &options.model,
            messages,
            tools: tools.iter().map(WireTool::from).collect(),
            stream: false,
            options: options.into(),
        };

        let response: ChatResponse = self
            .post_json("/api/chat", &request)
            .map_err(|e| RagError::GenerationFailure(format!("{e:#}")))?;

        if let Some(message) = response.error {
            return Err(RagError::GenerationFailure(format!(
                "Ollama returned an error: {message}"
            )));
        }

        let message = response.message.ok_or_else(|| {
            RagError::GenerationFailure(
                "Invalid response from Ollama: does not contain the message field".to_string(),
            )
        })?;

        if !message.tool_calls.is_empty() {
            let calls = message
                .tool_calls
                .into_iter()
                .map(|call| {
                    let arguments =
                        parse_tool_arguments(&call.function.name, call.function.arguments)?;
                    Ok(ToolCallRequest::new(call.function.name, arguments))
                })
                .collect::<Result<Vec<_>>>()?;

            return Ok(AssistantReply::ToolCalls {
                content: message.content.unwrap_or_default(),
                calls,
            });
        }

        message.content.map(AssistantReply::Text).ok_or_else(|| {
            RagError::GenerationFailure(
                "Invalid response from Ollama: does not contain the message.content field"
                    .to_string(),
            )
        })
    }

    fn post_json<B, R>(&self, endpoint: &str, body: &B) -> anyhow::Result<R>
    where
        B: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let url = self
            .base_url
            .join(endpoint)
            .with_context(|| format!("Failed to build URL for {endpoint}"))?;

        let request_json = serde_json::to_string(body)
            .with_context(|| format!("Failed to serialize request for {endpoint}"))?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .with_context(|| format!("Request to {endpoint} failed"))?;

        serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse response from {endpoint}"))
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> anyhow::Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        let delay = Duration::from_millis(delay_ms);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("Request to {} failed", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow!("Request failed")))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let client = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || client.embed_blocking(&text))
            .await
            .map_err(|e| RagError::EmbeddingFailure(format!("Embedding task failed: {e}")))?
    }
}

#[async_trait]
impl GenerationProvider for OllamaClient {
    #[inline]
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
        let client = self.clone();
        let prompt = prompt.to_string();
        let options = options.clone();
        tokio::task::spawn_blocking(move || client.generate_blocking(&prompt, &options))
            .await
            .map_err(|e| RagError::GenerationFailure(format!("Generation task failed: {e}")))?
    }

    #[inline]
    async fn converse(
        &self,
        transcript: &[ChatMessage],
        options: &GenerationOptions,
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply> {
        let client = self.clone();
        let transcript = transcript.to_vec();
        let options = options.clone();
        let tools = tools.to_vec();
        tokio::task::spawn_blocking(move || client.converse_blocking(&transcript, &options, &tools))
            .await
            .map_err(|e| RagError::GenerationFailure(format!("Chat task failed: {e}")))?
    }
}
