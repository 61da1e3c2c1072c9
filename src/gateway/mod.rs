//! Chat provider gateway used by the LLM ranking oracle.
//!
//! The gateway owns transport-level retries and usage accounting so that the
//! oracle above it only deals with prompts and response validation.

pub mod error;
pub mod openrouter;
pub mod pricing;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use openrouter::{ChatProvider, OpenRouterAdapter};
use usage::{CallStatus, ProviderCallRecord};

pub use error::{ErrorContext, ProviderError};
pub use pricing::chat_cost;
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Ceiling for any single wait, including provider `Retry-After` hints.
    pub max_retry_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

pub struct ProviderGateway<U: UsageSink, P: ChatProvider = OpenRouterAdapter> {
    provider: P,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSink, P: ChatProvider> ChatGateway for ProviderGateway<U, P> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSink> ProviderGateway<U, OpenRouterAdapter> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        Ok(Self::with_config(
            OpenRouterAdapter::from_env()?,
            usage_sink,
            GatewayConfig::default(),
        ))
    }
}

impl<U: UsageSink, P: ChatProvider> ProviderGateway<U, P> {
    pub fn with_config(provider: P, usage_sink: Arc<U>, config: GatewayConfig) -> Self {
        Self {
            provider,
            usage_sink,
            config,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            match self.provider.chat(&req).await {
                Ok(resp) => {
                    self.record_usage(&req, &resp, CallStatus::Success, None)
                        .await;
                    return Ok(resp);
                }
                Err(err) => {
                    self.record_usage(&req, &ChatResponse::empty(), CallStatus::Error, Some(&err))
                        .await;

                    if !err.is_retryable() || attempt >= self.config.max_retries {
                        return Err(err);
                    }

                    let delay = self.retry_delay(&err, attempt);
                    warn!(
                        model = req.model.model_id(),
                        attempt = attempt + 1,
                        code = err.code(),
                        delay_ms = delay.as_millis() as u64,
                        "provider call failed; retrying"
                    );
                    attempt += 1;
                    sleep(delay).await;
                }
            }
        }
    }

    fn retry_delay(&self, err: &ProviderError, attempt: u32) -> Duration {
        let delay = err
            .retry_after()
            .unwrap_or_else(|| backoff_delay(self.config.retry_base_delay, attempt));
        delay.min(self.config.max_retry_delay)
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        resp: &ChatResponse,
        status: CallStatus,
        error: Option<&ProviderError>,
    ) {
        let record = ProviderCallRecord::new(
            req.model.provider(),
            "chat/completions",
            req.model.model_id(),
            req.attribution.caller,
        )
        .tokens(resp.input_tokens as i32, resp.output_tokens as i32)
        .cost(resp.cost_nanodollars)
        .upstream_cost(resp.upstream_cost_nanodollars)
        .user(req.attribution.user_id)
        .job(req.attribution.job_id)
        .latency(resp.latency.as_millis() as i32);

        let record = match (status, error) {
            (CallStatus::Error, Some(err)) => record
                .request_id(err.request_id().map(str::to_string))
                .error(err.code()),
            (CallStatus::Error, None) => record.error("provider_error"),
            _ => record,
        };

        self.usage_sink.record(record).await;
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base * multiplier
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FlakyProvider {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
        error: fn() -> ProviderError,
    }

    #[async_trait::async_trait]
    impl ChatProvider for FlakyProvider {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err((self.error)());
            }
            let mut resp = ChatResponse::empty();
            resp.content = "ok".into();
            resp.finish_reason = FinishReason::Stop;
            Ok(resp)
        }
    }

    #[derive(Default)]
    struct VecUsageSink {
        records: Mutex<Vec<ProviderCallRecord>>,
    }

    #[async_trait::async_trait]
    impl UsageSink for VecUsageSink {
        async fn record(&self, record: ProviderCallRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn fast_config(max_retries: u32) -> GatewayConfig {
        GatewayConfig {
            max_retries,
            retry_base_delay: Duration::from_millis(0),
            max_retry_delay: Duration::from_millis(1),
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new(
            ChatModel::openrouter("openai/gpt-5-mini"),
            vec![Message::user("rank")],
            Attribution::new("test"),
        )
    }

    #[tokio::test]
    async fn retries_retryable_errors_and_records_each_attempt() {
        let provider = FlakyProvider {
            failures_left: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
            error: || ProviderError::provider("openrouter", "502", true),
        };
        let sink = Arc::new(VecUsageSink::default());
        let gateway = ProviderGateway::with_config(provider, sink.clone(), fast_config(2));

        let resp = gateway.chat(request()).await.unwrap();
        assert_eq!(resp.content, "ok");

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].status, CallStatus::Error);
        assert_eq!(records[0].error_code.as_deref(), Some("provider_error"));
        assert_eq!(records[2].status, CallStatus::Success);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let provider = FlakyProvider {
            failures_left: AtomicUsize::new(5),
            calls: AtomicUsize::new(0),
            error: || ProviderError::invalid_request("nope"),
        };
        let gateway =
            ProviderGateway::with_config(provider, Arc::new(NoopUsageSink), fast_config(3));

        let err = gateway.chat(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));
        assert_eq!(gateway.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rate_limit_hint_is_capped() {
        let gateway = ProviderGateway::with_config(
            FlakyProvider {
                failures_left: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                error: || ProviderError::config("unused"),
            },
            Arc::new(NoopUsageSink),
            GatewayConfig {
                max_retries: 1,
                retry_base_delay: Duration::from_millis(10),
                max_retry_delay: Duration::from_secs(2),
            },
        );
        let err = ProviderError::rate_limited(Duration::from_secs(60), ErrorContext::new());
        assert_eq!(gateway.retry_delay(&err, 0), Duration::from_secs(2));

        let err = ProviderError::provider("openrouter", "503", true);
        assert_eq!(gateway.retry_delay(&err, 2), Duration::from_millis(40));
    }
}
