//! Iteration Controller and Result Assembler.
//!
//! Drives a fixed number of sweeps, promoting each sweep's poles into the
//! permanent top and bottom and recycling displaced items into the next
//! working list. The final list is `top ++ middle ++ bottom`.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

use crate::oracle::{OracleError, RankRequest, RankingOracle};

use super::options::SortRunOptions;
use super::sanitize::sanitize;
use super::sweep::Sweeper;
use super::trace::{TraceError, TraceSink};
use super::types::{validate_sort_config, SortConfig, SortMeta, SortResponse, SweepSummary};

/// How often an in-flight oracle call checks the cancel flag.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum SortError {
    #[error("invalid sort config: {0}")]
    InvalidConfig(String),
    #[error("oracle call failed at iteration {iteration}, window {window}: {source}")]
    Oracle {
        iteration: usize,
        window: usize,
        #[source]
        source: OracleError,
    },
    #[error("sort cancelled at iteration {iteration}, window {window}")]
    Cancelled { iteration: usize, window: usize },
    #[error("oracle call timed out at iteration {iteration}, window {window}")]
    TimedOut { iteration: usize, window: usize },
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),
}

impl SortError {
    /// Iteration and window of the failing oracle call, if any.
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            SortError::Oracle {
                iteration, window, ..
            }
            | SortError::Cancelled { iteration, window }
            | SortError::TimedOut { iteration, window } => Some((*iteration, *window)),
            SortError::InvalidConfig(_) | SortError::Trace(_) => None,
        }
    }

    /// True when the oracle answered with something other than a permutation.
    pub fn is_validation(&self) -> bool {
        matches!(self, SortError::Oracle { source, .. } if source.is_validation())
    }
}

// =============================================================================
// Call guard
// =============================================================================

/// Cancellation and deadlines applied to every oracle call.
pub(crate) struct CallGuard<'a> {
    cancel_flag: Option<&'a AtomicBool>,
    deadline: Option<Instant>,
    call_timeout: Option<Duration>,
}

impl<'a> CallGuard<'a> {
    pub(crate) fn unbounded() -> Self {
        Self {
            cancel_flag: None,
            deadline: None,
            call_timeout: None,
        }
    }

    fn new(
        run_options: Option<&SortRunOptions>,
        cancel_flag: Option<&'a AtomicBool>,
        start: Instant,
    ) -> Self {
        Self {
            cancel_flag,
            deadline: run_options
                .and_then(|o| o.latency_budget)
                .map(|budget| start + budget),
            call_timeout: run_options.and_then(|o| o.call_timeout),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .map(|flag| flag.load(AtomicOrdering::Relaxed))
            .unwrap_or(false)
    }

    fn call_deadline(&self, now: Instant) -> Option<Instant> {
        match (self.deadline, self.call_timeout) {
            (Some(deadline), Some(timeout)) => Some(deadline.min(now + timeout)),
            (Some(deadline), None) => Some(deadline),
            (None, Some(timeout)) => Some(now + timeout),
            (None, None) => None,
        }
    }

    /// Run one oracle call, aborting it on cancellation or deadline.
    pub(crate) async fn call(
        &self,
        oracle: &dyn RankingOracle,
        req: &RankRequest,
        iteration: usize,
        window: usize,
    ) -> Result<Vec<String>, SortError> {
        if self.is_cancelled() {
            return Err(SortError::Cancelled { iteration, window });
        }
        let now = Instant::now();
        let deadline = self.call_deadline(now);
        if matches!(deadline, Some(d) if d <= now) {
            return Err(SortError::TimedOut { iteration, window });
        }

        let bounded = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, oracle.rank(req))
                    .await
                    .ok(),
                None => Some(oracle.rank(req).await),
            }
        };

        tokio::select! {
            biased;
            _ = wait_for_cancel(self.cancel_flag) => Err(SortError::Cancelled { iteration, window }),
            result = bounded => match result {
                Some(Ok(ranked)) => Ok(ranked),
                Some(Err(source)) => Err(SortError::Oracle { iteration, window, source }),
                None => Err(SortError::TimedOut { iteration, window }),
            },
        }
    }
}

async fn wait_for_cancel(flag: Option<&AtomicBool>) {
    let Some(flag) = flag else {
        return std::future::pending().await;
    };
    while !flag.load(AtomicOrdering::Relaxed) {
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
    }
}

// =============================================================================
// Sort
// =============================================================================

/// Approximately sort `items` by `config.criterion`.
///
/// Returns the full sanitized permutation or an error, never a partial list.
pub async fn sort<S: AsRef<str>>(
    oracle: &dyn RankingOracle,
    items: &[S],
    config: &SortConfig,
    run_options: Option<&SortRunOptions>,
    cancel_flag: Option<&AtomicBool>,
) -> Result<SortResponse, SortError> {
    sort_with_trace(oracle, items, config, run_options, None, cancel_flag).await
}

/// [`sort`] with one trace record per oracle call.
pub async fn sort_with_trace<S: AsRef<str>>(
    oracle: &dyn RankingOracle,
    items: &[S],
    config: &SortConfig,
    run_options: Option<&SortRunOptions>,
    trace: Option<&dyn TraceSink>,
    cancel_flag: Option<&AtomicBool>,
) -> Result<SortResponse, SortError> {
    validate_sort_config(config)?;
    let mut working = sanitize(items);
    let sanitized_len = working.len();

    let will_call = config.iterations > 0 && sanitized_len > 0;
    if let (true, Some(capacity)) = (will_call, oracle.max_items_per_call()) {
        let worst = config.max_batch_len();
        if worst > capacity {
            return Err(SortError::InvalidConfig(format!(
                "chunk_size {} + 2 * extreme_k {} = {worst} exceeds oracle capacity {capacity}",
                config.chunk_size, config.extreme_k
            )));
        }
    }

    let start = Instant::now();
    let guard = CallGuard::new(run_options, cancel_flag, start);
    let sweeper = Sweeper::new(oracle, config, &guard, trace);
    let mut permanent_top: Vec<String> = Vec::new();
    let mut permanent_bottom: Vec<String> = Vec::new();
    let mut sweeps: Vec<SweepSummary> = Vec::with_capacity(config.iterations);
    let mut oracle_calls = 0usize;

    for iteration in 0..config.iterations {
        if guard.is_cancelled() {
            return Err(SortError::Cancelled {
                iteration,
                window: 0,
            });
        }

        let outcome = sweeper.run(&working, iteration).await?;
        let next_working = outcome.next_working();

        let summary = SweepSummary {
            iteration,
            working_len: working.len(),
            oracle_calls: outcome.oracle_calls,
            promoted_top: outcome.top.len(),
            promoted_bottom: outcome.bottom.len(),
            displaced_top: outcome.displaced_top.len(),
            displaced_bottom: outcome.displaced_bottom.len(),
            next_working_len: next_working.len(),
        };
        info!(
            iteration,
            working_len = summary.working_len,
            oracle_calls = summary.oracle_calls,
            promoted_top = summary.promoted_top,
            promoted_bottom = summary.promoted_bottom,
            displaced_top = summary.displaced_top,
            displaced_bottom = summary.displaced_bottom,
            "promoted sweep extremes"
        );

        oracle_calls += outcome.oracle_calls;
        permanent_top.extend(outcome.top);
        let mut bottom = outcome.bottom;
        bottom.append(&mut permanent_bottom);
        permanent_bottom = bottom;
        working = next_working;
        sweeps.push(summary);
    }

    let meta = SortMeta {
        input_len: items.len(),
        sanitized_len,
        iterations_run: sweeps.len(),
        oracle_calls,
        promoted_top: permanent_top.len(),
        promoted_bottom: permanent_bottom.len(),
        unresolved_middle: working.len(),
        latency_ms: start.elapsed().as_millis() as u64,
        sweeps,
    };

    let mut assembled = permanent_top;
    assembled.extend(working);
    assembled.extend(permanent_bottom);
    debug_assert_eq!(assembled.len(), sanitized_len);

    info!(
        items = assembled.len(),
        oracle_calls = meta.oracle_calls,
        promoted_top = meta.promoted_top,
        promoted_bottom = meta.promoted_bottom,
        latency_ms = meta.latency_ms,
        "sort complete"
    );

    Ok(SortResponse {
        items: assembled,
        meta,
    })
}

/// Run independent sorts with at most `concurrency` in flight.
///
/// Results are returned in job order.
pub async fn sort_many(
    oracle: &dyn RankingOracle,
    jobs: Vec<(Vec<String>, SortConfig)>,
    concurrency: usize,
    cancel_flag: Option<&AtomicBool>,
) -> Vec<Result<SortResponse, SortError>> {
    stream::iter(jobs)
        .map(|(items, config)| async move {
            sort(oracle, &items, &config, None, cancel_flag).await
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
