//! Backend trait and the local/remote HTTP implementations.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

use super::types::{ChatMessage, FinishReason, GenerationParams, Response, TokenUsage, ToolDefinition};

/// An inference backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Generate a completion for `messages` with the given model.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        params: &GenerationParams,
    ) -> Result<Response>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool;
}

/// Position of a backend in the fixed fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

impl BackendKind {
    /// Fallback order.
    pub const ORDER: [BackendKind; 2] = [BackendKind::Local, BackendKind::Remote];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings shared by the HTTP backends.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    /// Bearer token (remote only)
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout_secs: 120,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))
}

fn unavailable(kind: BackendKind, message: impl Into<String>) -> Error {
    Error::backend_unavailable(kind.as_str(), message)
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: Some(message.content.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: &'a ToolDefinition,
}

fn wire_tools(tools: Option<&Vec<ToolDefinition>>) -> Option<Vec<WireTool<'_>>> {
    tools.map(|tools| {
        tools
            .iter()
            .map(|function| WireTool {
                tool_type: "function",
                function,
            })
            .collect()
    })
}

// =============================================================================
// Local backend (Ollama-compatible)
// =============================================================================

/// Backend for a local Ollama-compatible server.
pub struct LocalBackend {
    config: BackendConfig,
    http: Client,
}

impl LocalBackend {
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:11434";

    pub fn new(config: BackendConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }
}

#[derive(Debug, Serialize)]
struct LocalRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    options: LocalOptions,
}

#[derive(Debug, Serialize)]
struct LocalOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LocalResponse {
    model: String,
    message: WireMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[async_trait]
impl Backend for LocalBackend {
    #[instrument(skip(self, messages, params), fields(backend = "local"))]
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        params: &GenerationParams,
    ) -> Result<Response> {
        let started = Instant::now();
        let request = LocalRequest {
            model: model_id,
            messages: messages.iter().map(WireMessage::from).collect(),
            stream: false,
            format: params.json_mode.then_some("json"),
            tools: wire_tools(params.tools.as_ref()),
            options: LocalOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        };

        let response = self
            .http
            .post(self.config.url("/api/chat"))
            .json(&request)
            .send()
            .await
            .map_err(|e| unavailable(BackendKind::Local, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| unavailable(BackendKind::Local, format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(unavailable(
                BackendKind::Local,
                format!("server error ({}): {}", status, body),
            ));
        }

        let parsed: LocalResponse = serde_json::from_str(&body).map_err(|e| {
            unavailable(BackendKind::Local, format!("failed to parse response: {}", e))
        })?;

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(latency_ms, model = %parsed.model, "local generation complete");

        let finish = parsed
            .done_reason
            .as_deref()
            .map(FinishReason::from_provider)
            .unwrap_or(FinishReason::Stop);

        Ok(Response::success(
            parsed.message.content.unwrap_or_default(),
            parsed.model,
            BackendKind::Local.as_str(),
            TokenUsage::new(parsed.prompt_eval_count, parsed.eval_count),
            latency_ms,
        )
        .with_finish_reason(finish))
    }

    async fn health_check(&self) -> bool {
        match self.http.get(self.config.url("/api/tags")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Local health check failed: {}", e);
                false
            }
        }
    }
}

// =============================================================================
// Remote backend (OpenAI-compatible)
// =============================================================================

/// Backend for a remote OpenAI-compatible chat-completions API.
pub struct RemoteBackend {
    config: BackendConfig,
    http: Client,
}

impl RemoteBackend {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(config: BackendConfig) -> Result<Self> {
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(Error::config("remote backend requires an API key"));
        }
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.config.api_key.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
struct RemoteRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct RemoteResponse {
    model: String,
    choices: Vec<RemoteChoice>,
    #[serde(default)]
    usage: Option<RemoteUsage>,
}

#[derive(Debug, Deserialize)]
struct RemoteChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    error: RemoteErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RemoteErrorDetail {
    message: String,
}

#[async_trait]
impl Backend for RemoteBackend {
    #[instrument(skip(self, messages, params), fields(backend = "remote"))]
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        params: &GenerationParams,
    ) -> Result<Response> {
        let started = Instant::now();
        let request = RemoteRequest {
            model: model_id,
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            response_format: params.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
            tools: wire_tools(params.tools.as_ref()),
        };

        let response = self
            .http
            .post(self.config.url("/v1/chat/completions"))
            .header("Authorization", self.bearer())
            .json(&request)
            .send()
            .await
            .map_err(|e| unavailable(BackendKind::Remote, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            unavailable(BackendKind::Remote, format!("failed to read response: {}", e))
        })?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<RemoteError>(&body) {
                return Err(unavailable(
                    BackendKind::Remote,
                    format!("API error ({}): {}", status, error.error.message),
                ));
            }
            return Err(unavailable(
                BackendKind::Remote,
                format!("API error ({}): {}", status, body),
            ));
        }

        let parsed: RemoteResponse = serde_json::from_str(&body).map_err(|e| {
            unavailable(BackendKind::Remote, format!("failed to parse response: {}", e))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| unavailable(BackendKind::Remote, "no choices in response"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(latency_ms, model = %parsed.model, "remote generation complete");

        let finish = choice
            .finish_reason
            .as_deref()
            .map(FinishReason::from_provider)
            .unwrap_or(FinishReason::Stop);

        Ok(Response::success(
            choice.message.content.unwrap_or_default(),
            parsed.model,
            BackendKind::Remote.as_str(),
            usage,
            latency_ms,
        )
        .with_finish_reason(finish))
    }

    async fn health_check(&self) -> bool {
        let result = self
            .http
            .get(self.config.url("/v1/models"))
            .header("Authorization", self.bearer())
            .send()
            .await;
        match result {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Remote health check failed: {}", e);
                false
            }
        }
    }
}
