//! LLM-backed ranking oracle.
//!
//! Implements the contract between LLM JSON responses and validated
//! permutations. Malformed answers are re-asked here; transport retries
//! belong to the gateway.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, Message};
use crate::prompts::{prompt_by_slug, PromptTemplate, DEFAULT_PROMPT};

use super::{validate_permutation, OracleError, RankRequest, RankingOracle};

// =============================================================================
// Constants
// =============================================================================

pub const DEFAULT_MODEL: &str = "openai/gpt-5-mini";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_ITEMS_PER_CALL: usize = 40;

/// Candidate JSON fragments tried before giving up on a response.
const MAX_JSON_CANDIDATES: usize = 16;

/// Output budget for a ranking answer over `items`.
///
/// GPT-5 models spend a large share of the budget on hidden reasoning before
/// any visible output, so they get a fixed allowance on top.
pub fn ranking_max_output_tokens(model: &str, items: &[String]) -> u32 {
    let chars: usize = items.iter().map(|s| s.len()).sum();
    let visible = (chars / 3 + items.len() * 8 + 64) as u32;
    if model.starts_with("openai/gpt-5") {
        visible + 1_024
    } else {
        visible
    }
}

// =============================================================================
// JSON parsing
// =============================================================================

/// Shapes a model may answer with.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RankingJson {
    Bare(Vec<String>),
    Wrapped {
        #[serde(alias = "items")]
        ranked: Vec<String>,
    },
}

impl RankingJson {
    fn into_items(self) -> Vec<String> {
        match self {
            RankingJson::Bare(items) => items,
            RankingJson::Wrapped { ranked } => ranked,
        }
    }
}

/// Length of the balanced JSON value at the start of `s`, skipping brackets
/// inside string literals.
fn balanced_len(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull a ranked list out of a model response.
///
/// Accepts a bare JSON array or an object with a `ranked` (or `items`) array,
/// optionally wrapped in prose or a code fence.
pub fn parse_ranking_response(raw: &str) -> Result<Vec<String>, OracleError> {
    let trimmed = raw.trim();
    let mut last_err: Option<String> = None;
    let mut tried = 0usize;

    for (start, c) in trimmed.char_indices() {
        if c != '[' && c != '{' {
            continue;
        }
        if tried >= MAX_JSON_CANDIDATES {
            break;
        }
        // Unclosed starts count too.
        tried += 1;
        let candidate = &trimmed[start..];
        let Some(len) = balanced_len(candidate) else {
            continue;
        };
        match serde_json::from_str::<RankingJson>(&candidate[..len]) {
            Ok(parsed) => return Ok(parsed.into_items()),
            Err(e) => last_err = Some(e.to_string()),
        }
    }

    Err(OracleError::Parse(
        last_err.unwrap_or_else(|| "no JSON array or object in response".to_string()),
    ))
}

// =============================================================================
// Oracle
// =============================================================================

#[derive(Debug, Clone)]
pub struct LlmOracleConfig {
    pub model: String,
    /// `None` uses the default ranking prompt.
    pub prompt_template_slug: Option<String>,
    /// Total attempts per call, counting the first.
    pub max_attempts: u32,
    pub max_items_per_call: usize,
    /// `None` derives the budget from the batch.
    pub max_output_tokens: Option<u32>,
}

impl Default for LlmOracleConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            prompt_template_slug: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_items_per_call: DEFAULT_MAX_ITEMS_PER_CALL,
            max_output_tokens: None,
        }
    }
}

pub struct LlmOracle<G: ChatGateway + ?Sized> {
    gateway: Arc<G>,
    config: LlmOracleConfig,
    template: PromptTemplate,
    attribution: Attribution,
}

impl<G: ChatGateway + ?Sized> LlmOracle<G> {
    pub fn new(gateway: Arc<G>, config: LlmOracleConfig) -> Result<Self, OracleError> {
        let template = match config.prompt_template_slug.as_deref() {
            Some(slug) => prompt_by_slug(slug)
                .ok_or_else(|| OracleError::Message(format!("unknown prompt template: {slug}")))?,
            None => DEFAULT_PROMPT,
        };
        if config.max_attempts == 0 {
            return Err(OracleError::Message("max_attempts must be at least 1".into()));
        }
        Ok(Self {
            gateway,
            config,
            template,
            attribution: Attribution::for_new_job("pole_sort::oracle"),
        })
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }

    pub fn config(&self) -> &LlmOracleConfig {
        &self.config
    }

    fn build_request(&self, messages: Vec<Message>, items: &[String]) -> ChatRequest {
        let max_tokens = self
            .config
            .max_output_tokens
            .unwrap_or_else(|| ranking_max_output_tokens(&self.config.model, items));
        let req = ChatRequest::new(
            ChatModel::openrouter(&self.config.model),
            messages,
            self.attribution.clone(),
        )
        .max_tokens(max_tokens);
        if self.config.model.starts_with("openai/") {
            req.json()
        } else {
            req
        }
    }
}

#[async_trait]
impl<G: ChatGateway + ?Sized> RankingOracle for LlmOracle<G> {
    async fn rank(&self, req: &RankRequest) -> Result<Vec<String>, OracleError> {
        let n = req.items.len();
        if n > self.config.max_items_per_call {
            return Err(OracleError::OverCapacity {
                len: n,
                capacity: self.config.max_items_per_call,
            });
        }
        if n <= 1 {
            return Ok(req.items.clone());
        }

        let prompt = self.template.render(&req.criterion, req.order, &req.items);
        let mut messages = prompt.to_messages();
        let mut attempt = 1u32;

        loop {
            let chat_req = self.build_request(messages.clone(), &req.items);
            let resp = self.gateway.chat(chat_req).await?;

            let result = parse_ranking_response(&resp.content)
                .and_then(|ranked| validate_permutation(&req.items, ranked));

            match result {
                Ok(ranked) => return Ok(ranked),
                Err(err) if attempt < self.config.max_attempts => {
                    warn!(
                        model = %self.config.model,
                        attempt,
                        items = n,
                        truncated = resp.truncated(),
                        error = %err,
                        "invalid ranking response; re-asking"
                    );
                    messages.push(Message::assistant(resp.content));
                    messages.push(Message::user(format!(
                        "That answer was invalid: {err}. Return every one of the {n} items exactly once, \
                         copied verbatim, as {{\"ranked\": [...]}}."
                    )));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn max_items_per_call(&self) -> Option<usize> {
        Some(self.config.max_items_per_call)
    }
}

// =============================================================================
// TESTS
// =============================================================================
