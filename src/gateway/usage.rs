//! Per-call usage accounting.
//!
//! Every provider attempt made by the gateway, successful or not, is handed
//! to a [`UsageSink`]. The sink decides where it goes:
//! - `NoopUsageSink` for tests and throwaway runs
//! - `TracingUsageSink` to emit one `info` event per call
//! - a caller-provided sink to persist records elsewhere

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// One provider call.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    pub provider: &'static str,
    pub endpoint: &'static str,
    pub model: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cost_nanodollars: i64,
    pub upstream_cost_nanodollars: Option<i64>,
    pub user_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub latency_ms: i32,
    pub status: CallStatus,
    pub error_code: Option<String>,
    pub caller: &'static str,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    pub fn new(
        provider: &'static str,
        endpoint: &'static str,
        model: impl Into<String>,
        caller: &'static str,
    ) -> Self {
        Self {
            provider,
            endpoint,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            upstream_cost_nanodollars: None,
            user_id: None,
            job_id: None,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, input: i32, output: i32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn cost(mut self, nanodollars: i64) -> Self {
        self.cost_nanodollars = nanodollars;
        self
    }

    pub fn upstream_cost(mut self, nanodollars: Option<i64>) -> Self {
        self.upstream_cost_nanodollars = nanodollars;
        self
    }

    pub fn user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn job(mut self, job_id: Option<Uuid>) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn latency(mut self, ms: i32) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }

    pub fn request_id(mut self, id: Option<String>) -> Self {
        self.request_id = id;
        self
    }
}

/// Destination for provider call records.
///
/// Recording is fire-and-forget: implementations log their own failures
/// instead of returning them.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: ProviderCallRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        info!(
            provider = record.provider,
            endpoint = record.endpoint,
            model = %record.model,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cost_nanodollars = record.cost_nanodollars,
            latency_ms = record.latency_ms,
            status = record.status.as_str(),
            error_code = record.error_code.as_deref().unwrap_or(""),
            caller = record.caller,
            job_id = ?record.job_id,
            "provider call"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_marks_status() {
        let record = ProviderCallRecord::new("openrouter", "chat/completions", "m", "test")
            .tokens(3, 4)
            .error("timeout");
        assert_eq!(record.status, CallStatus::Error);
        assert_eq!(record.error_code.as_deref(), Some("timeout"));
        assert_eq!(record.input_tokens, 3);
        assert_eq!(record.output_tokens, 4);
    }
}
