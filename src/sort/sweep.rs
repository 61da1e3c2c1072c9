//! Chunk Sweeper: one left-to-right pass over the working list.
//!
//! Each window is ranked together with the poles carried from the previous
//! window, so strong candidates migrate to the poles and weaker former
//! extremes are displaced. Carry-over is continuous within a sweep and starts
//! empty at every new sweep.

use std::collections::HashSet;
use std::time::Instant;

use tracing::debug;

use crate::oracle::{validate_permutation, RankRequest, RankingOracle};

use super::engine::{CallGuard, SortError};
use super::trace::{hash_items, hash_text, now_epoch_ms, OracleCallTrace, TraceSink};
use super::types::{validate_sort_config, SortConfig};

/// Result of one sweep. The five lists are pairwise disjoint and together
/// hold exactly the items of the swept working list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub top: Vec<String>,
    pub bottom: Vec<String>,
    /// Former top extremes, in displacement order.
    pub displaced_top: Vec<String>,
    /// Former bottom extremes, in displacement order.
    pub displaced_bottom: Vec<String>,
    /// Working items that never held a pole, in working-list order.
    pub remainder: Vec<String>,
    pub oracle_calls: usize,
}

impl SweepOutcome {
    /// Working list for the next sweep: displaced top items lead, displaced
    /// bottom items trail.
    pub fn next_working(&self) -> Vec<String> {
        let mut next = Vec::with_capacity(
            self.displaced_top.len() + self.remainder.len() + self.displaced_bottom.len(),
        );
        next.extend_from_slice(&self.displaced_top);
        next.extend_from_slice(&self.remainder);
        next.extend_from_slice(&self.displaced_bottom);
        next
    }

    /// Total items accounted for by this sweep.
    pub fn accounted_len(&self) -> usize {
        self.top.len()
            + self.bottom.len()
            + self.displaced_top.len()
            + self.displaced_bottom.len()
            + self.remainder.len()
    }
}

/// Split a ranked batch into its top and bottom poles of at most `k` items.
///
/// The poles never overlap: when the batch is shorter than `2 * k` the top
/// pole is filled first and the bottom gets what is left.
pub fn split_extremes(ranked: &[String], k: usize) -> (Vec<String>, Vec<String>) {
    let n = ranked.len();
    let top_len = k.min(n);
    let bottom_start = top_len.max(n.saturating_sub(k));
    (
        ranked[..top_len].to_vec(),
        ranked[bottom_start..].to_vec(),
    )
}

/// Run one sweep without cancellation, deadlines, or tracing.
pub async fn sweep(
    oracle: &dyn RankingOracle,
    working: &[String],
    config: &SortConfig,
) -> Result<SweepOutcome, SortError> {
    validate_sort_config(config)?;
    let guard = CallGuard::unbounded();
    Sweeper::new(oracle, config, &guard, None)
        .run(working, 0)
        .await
}

pub(crate) struct Sweeper<'a> {
    oracle: &'a dyn RankingOracle,
    config: &'a SortConfig,
    guard: &'a CallGuard<'a>,
    trace: Option<&'a dyn TraceSink>,
    criterion_hash: Option<String>,
}

impl<'a> Sweeper<'a> {
    pub(crate) fn new(
        oracle: &'a dyn RankingOracle,
        config: &'a SortConfig,
        guard: &'a CallGuard<'a>,
        trace: Option<&'a dyn TraceSink>,
    ) -> Self {
        let criterion_hash = trace.map(|_| hash_text(&config.criterion));
        Self {
            oracle,
            config,
            guard,
            trace,
            criterion_hash,
        }
    }

    pub(crate) async fn run(
        &self,
        working: &[String],
        iteration: usize,
    ) -> Result<SweepOutcome, SortError> {
        let k = self.config.extreme_k;
        let mut current_top: Vec<String> = Vec::new();
        let mut current_bottom: Vec<String> = Vec::new();
        let mut displaced_top: Vec<String> = Vec::new();
        let mut displaced_bottom: Vec<String> = Vec::new();
        let mut oracle_calls = 0usize;

        for (window_index, window) in working.chunks(self.config.chunk_size).enumerate() {
            let mut batch = Vec::with_capacity(window.len() + current_top.len() + current_bottom.len());
            batch.extend_from_slice(window);
            batch.extend_from_slice(&current_top);
            batch.extend_from_slice(&current_bottom);

            debug!(
                iteration,
                window = window_index,
                window_len = window.len(),
                carried_top = current_top.len(),
                carried_bottom = current_bottom.len(),
                batch_len = batch.len(),
                "ranking window"
            );

            let req = RankRequest {
                criterion: self.config.criterion.clone(),
                order: self.config.order,
                items: batch,
            };

            let started = Instant::now();
            oracle_calls += 1;
            let ranked = self
                .guard
                .call(self.oracle, &req, iteration, window_index)
                .await
                .and_then(|ranked| {
                    validate_permutation(&req.items, ranked).map_err(|source| SortError::Oracle {
                        iteration,
                        window: window_index,
                        source,
                    })
                });

            let ranked = match ranked {
                Ok(ranked) => ranked,
                Err(err) => {
                    self.record_trace(
                        iteration,
                        window_index,
                        window.len(),
                        &current_top,
                        &current_bottom,
                        &req.items,
                        started,
                        None,
                        Some(err.to_string()),
                    )?;
                    return Err(err);
                }
            };

            let (batch_top, batch_bottom) = split_extremes(&ranked, k);
            let (window_displaced_top, window_displaced_bottom) = {
                let new_poles: HashSet<&str> = batch_top
                    .iter()
                    .chain(batch_bottom.iter())
                    .map(String::as_str)
                    .collect();
                let lost = |pole: &[String]| -> Vec<String> {
                    pole.iter()
                        .filter(|item| !new_poles.contains(item.as_str()))
                        .cloned()
                        .collect()
                };
                (lost(&current_top), lost(&current_bottom))
            };

            self.record_trace(
                iteration,
                window_index,
                window.len(),
                &current_top,
                &current_bottom,
                &req.items,
                started,
                Some(WindowResult {
                    batch_top: &batch_top,
                    batch_bottom: &batch_bottom,
                    displaced_top: &window_displaced_top,
                    displaced_bottom: &window_displaced_bottom,
                }),
                None,
            )?;

            displaced_top.extend(window_displaced_top);
            displaced_bottom.extend(window_displaced_bottom);
            current_top = batch_top;
            current_bottom = batch_bottom;
        }

        let claimed: HashSet<&str> = current_top
            .iter()
            .chain(&current_bottom)
            .chain(&displaced_top)
            .chain(&displaced_bottom)
            .map(String::as_str)
            .collect();
        let remainder: Vec<String> = working
            .iter()
            .filter(|item| !claimed.contains(item.as_str()))
            .cloned()
            .collect();

        Ok(SweepOutcome {
            top: current_top,
            bottom: current_bottom,
            displaced_top,
            displaced_bottom,
            remainder,
            oracle_calls,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn record_trace(
        &self,
        iteration: usize,
        window: usize,
        window_len: usize,
        carried_top: &[String],
        carried_bottom: &[String],
        batch: &[String],
        started: Instant,
        result: Option<WindowResult<'_>>,
        error: Option<String>,
    ) -> Result<(), SortError> {
        let Some(trace) = self.trace else {
            return Ok(());
        };
        let owned = |xs: Option<&[String]>| xs.map(<[String]>::to_vec).unwrap_or_default();
        let event = OracleCallTrace {
            timestamp_ms: now_epoch_ms(),
            iteration,
            window,
            batch_len: batch.len(),
            window_len,
            carried_top: carried_top.len(),
            carried_bottom: carried_bottom.len(),
            criterion_hash: self.criterion_hash.clone().unwrap_or_default(),
            batch_hash: hash_items(batch),
            batch_top: owned(result.as_ref().map(|r| r.batch_top)),
            batch_bottom: owned(result.as_ref().map(|r| r.batch_bottom)),
            displaced_top: owned(result.as_ref().map(|r| r.displaced_top)),
            displaced_bottom: owned(result.as_ref().map(|r| r.displaced_bottom)),
            latency_ms: started.elapsed().as_millis() as u64,
            error,
        };
        trace.record(event)?;
        Ok(())
    }
}

struct WindowResult<'r> {
    batch_top: &'r [String],
    batch_bottom: &'r [String],
    displaced_top: &'r [String],
    displaced_bottom: &'r [String],
}
