//! Chat request/response types shared by the gateway and the LLM oracle.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Who asked for a provider call, carried into every usage record.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub user_id: Option<Uuid>,
    /// Groups all oracle calls of one sort run.
    pub job_id: Option<Uuid>,
    /// Static code-path label such as "polesort::sort".
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Attribution tagged with a fresh random job id.
    pub fn for_new_job(caller: &'static str) -> Self {
        Self::new(caller).with_job(Uuid::new_v4())
    }
}

// =============================================================================
// CHAT TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Model routed through a provider.
#[derive(Debug, Clone)]
pub enum ChatModel {
    /// OpenRouter model id, e.g. "openai/gpt-5-mini".
    OpenRouter(String),
}

impl ChatModel {
    pub fn openrouter(model_id: impl Into<String>) -> Self {
        ChatModel::OpenRouter(model_id.into())
    }

    pub fn model_id(&self) -> &str {
        match self {
            ChatModel::OpenRouter(id) => id,
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            ChatModel::OpenRouter(_) => "openrouter",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: ChatModel,
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0). Ranking calls default to 0.
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the provider for `response_format = json_object`.
    pub json_mode: bool,
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model,
            messages,
            temperature: 0.0,
            max_tokens: None,
            json_mode: false,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// Total characters across all message bodies.
    pub fn input_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Cost from the local pricing table, in nanodollars.
    pub cost_nanodollars: i64,
    /// Cost reported by the provider itself, in nanodollars.
    pub upstream_cost_nanodollars: Option<i64>,
    pub latency: Duration,
    pub finish_reason: FinishReason,
}

impl ChatResponse {
    /// Placeholder used when recording a failed attempt.
    pub(crate) fn empty() -> Self {
        Self {
            content: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            upstream_cost_nanodollars: None,
            latency: Duration::from_millis(0),
            finish_reason: FinishReason::Unknown("error".to_string()),
        }
    }

    /// True when the model ran out of output budget mid-answer.
    pub fn truncated(&self) -> bool {
        self.finish_reason == FinishReason::Length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_builder_defaults() {
        let req = ChatRequest::new(
            ChatModel::openrouter("openai/gpt-5-mini"),
            vec![Message::system("sys"), Message::user("hello")],
            Attribution::new("test"),
        );
        assert_eq!(req.temperature, 0.0);
        assert!(!req.json_mode);
        assert_eq!(req.max_tokens, None);
        assert_eq!(req.input_chars(), 8);

        let req = req.json().max_tokens(256).temperature(0.2);
        assert!(req.json_mode);
        assert_eq!(req.max_tokens, Some(256));
    }

    #[test]
    fn finish_reason_parsing() {
        assert_eq!(FinishReason::from(Some("length".into())), FinishReason::Length);
        assert_eq!(
            FinishReason::from(None),
            FinishReason::Unknown("none".to_string())
        );
    }

    #[test]
    fn attribution_for_new_job_has_job_id() {
        let a = Attribution::for_new_job("test");
        assert!(a.job_id.is_some());
        assert_eq!(a.caller, "test");
    }
}
