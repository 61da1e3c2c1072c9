//! OpenRouter chat completions adapter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::pricing::chat_cost;
use super::types::*;

/// A single-shot chat backend. Retries live in the gateway, not here.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Upper bound on a response body (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Upper bound on prompt characters (~125k tokens).
const MAX_INPUT_CHARS: usize = 500_000;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Used when a 429 arrives without a parsable `Retry-After` header.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, None, None)
    }

    /// Reads `OPENROUTER_API_KEY` (required) plus the optional
    /// `OPENROUTER_BASE_URL`, `OPENROUTER_TIMEOUT_SECONDS`,
    /// `OPENROUTER_REFERER` and `OPENROUTER_APP_TITLE`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;

        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let referer = std::env::var("OPENROUTER_REFERER").ok();
        let app_title = std::env::var("OPENROUTER_APP_TITLE").ok();

        Self::with_config(api_key, base_url, timeout, referer, app_title)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        for (name, value) in [("HTTP-Referer", referer), ("X-Title", app_title)] {
            if let Some(v) = value.and_then(|v| HeaderValue::from_str(&v).ok()) {
                headers.insert(name, v);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn error_context(status: u16, headers: &HeaderMap) -> ErrorContext {
        let ctx = ErrorContext::new().with_status(status);
        match headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        }
    }

    fn retry_after(headers: &HeaderMap) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
    }

    /// First line of the message reads like a model refusal.
    fn is_refusal(msg: &str) -> bool {
        let l = msg.trim_start().to_lowercase();
        let first_line = l.lines().next().unwrap_or("");

        const PREFIXES: &[&str] = &[
            "refus",
            "i cannot",
            "i can't",
            "i won't",
            "i will not",
            "i am unable to",
            "i'm unable to",
            "unable to comply",
            "unable to assist",
        ];

        PREFIXES.iter().any(|p| first_line.starts_with(p)) || l.contains("request was refused")
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: Option<ToolFunction>,
}

#[derive(Deserialize)]
struct ToolFunction {
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    #[serde(default)]
    cost_details: Option<CostDetails>,
}

#[derive(Deserialize)]
struct CostDetails {
    upstream_inference_cost: Option<f64>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

impl ChoiceMessage {
    /// Message text, falling back to tool-call arguments when a model answers
    /// JSON mode through a tool call instead of the content field.
    fn into_text(self) -> String {
        let content = self.content.unwrap_or_default();
        if !content.trim().is_empty() {
            return content;
        }
        self.tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| tc.function.and_then(|f| f.arguments))
            .find(|s| !s.trim().is_empty())
            .unwrap_or_default()
    }
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

/// Maps a non-2xx response to a provider error.
fn status_error(status: u16, body: &str, headers: &HeaderMap) -> ProviderError {
    let ctx = OpenRouterAdapter::error_context(status, headers);
    if status == 429 {
        return ProviderError::rate_limited(OpenRouterAdapter::retry_after(headers), ctx);
    }

    let retryable = status >= 500;
    match serde_json::from_str::<ChatApiResponse>(body)
        .ok()
        .and_then(|parsed| parsed.error)
    {
        Some(error) => {
            let ctx = match error.code {
                Some(code) => ctx.with_code(code),
                None => ctx,
            };
            ProviderError::provider_with_context(
                "openrouter",
                error.message.unwrap_or_default(),
                retryable,
                ctx,
            )
        }
        None => ProviderError::provider_with_context(
            "openrouter",
            format!("HTTP {status}"),
            retryable,
            ctx,
        ),
    }
}

/// Turns a 2xx body into a [`ChatResponse`].
fn parse_success_body(
    model_id: &str,
    body: &str,
    latency: Duration,
) -> Result<ChatResponse, ProviderError> {
    let parsed: ChatApiResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::provider("openrouter", format!("Invalid JSON: {e}"), false))?;

    if let Some(error) = parsed.error {
        let message = error.message.unwrap_or_default();
        if OpenRouterAdapter::is_refusal(&message) {
            return Err(ProviderError::refused(message));
        }
        return Err(ProviderError::provider("openrouter", message, false));
    }

    let choice = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| ProviderError::provider("openrouter", "No choices in response", false))?;

    let mut content = choice
        .message
        .map(ChoiceMessage::into_text)
        .unwrap_or_default();
    if content.len() > MAX_RESPONSE_LEN {
        let mut end = MAX_RESPONSE_LEN;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        content.truncate(end);
    }

    if OpenRouterAdapter::is_refusal(&content) {
        return Err(ProviderError::refused(content));
    }

    let usage = parsed
        .usage
        .ok_or_else(|| ProviderError::provider("openrouter", "Missing usage in response", false))?;
    let input_tokens = usage.prompt_tokens.unwrap_or(0);
    let output_tokens = usage.completion_tokens.unwrap_or(0);
    let upstream_cost_nanodollars = usage
        .cost_details
        .and_then(|d| d.upstream_inference_cost)
        .map(|usd| ((usd * 1_000_000_000.0).round() as i64).max(0));

    Ok(ChatResponse {
        content,
        input_tokens,
        output_tokens,
        cost_nanodollars: chat_cost(model_id, input_tokens, output_tokens),
        upstream_cost_nanodollars,
        latency,
        finish_reason: FinishReason::from(choice.finish_reason),
    })
}

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let total_chars = req.input_chars();
        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();

        let api_req = ChatApiRequest {
            model: req.model.model_id(),
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let mut response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    "openrouter",
                    format!("Response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes);

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body, &headers));
        }

        parse_success_body(req.model.model_id(), &body, start.elapsed())
    }
}
