//! Request/response types for the sort API.

use serde::{Deserialize, Serialize};

use crate::oracle::SortOrder;

use super::engine::SortError;

// =============================================================================
// Configuration
// =============================================================================

/// Knobs for one sort run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SortConfig {
    /// Natural language description of the ranking axis.
    pub criterion: String,

    #[serde(default)]
    pub order: SortOrder,

    /// Max new items per window, not counting carried extremes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Items kept at each pole per window.
    #[serde(default = "default_extreme_k")]
    pub extreme_k: usize,

    /// Number of full sweeps.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

fn default_chunk_size() -> usize {
    10
}

fn default_extreme_k() -> usize {
    10
}

fn default_iterations() -> usize {
    1
}

impl SortConfig {
    pub fn new(criterion: impl Into<String>) -> Self {
        Self {
            criterion: criterion.into(),
            order: SortOrder::default(),
            chunk_size: default_chunk_size(),
            extreme_k: default_extreme_k(),
            iterations: default_iterations(),
        }
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn extreme_k(mut self, extreme_k: usize) -> Self {
        self.extreme_k = extreme_k;
        self
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Largest batch any window can send: the window plus both carried poles.
    pub fn max_batch_len(&self) -> usize {
        self.chunk_size.saturating_add(self.extreme_k.saturating_mul(2))
    }
}

pub fn validate_sort_config(config: &SortConfig) -> Result<(), SortError> {
    if config.criterion.trim().is_empty() {
        return Err(SortError::InvalidConfig("criterion must not be empty".into()));
    }
    if config.chunk_size == 0 {
        return Err(SortError::InvalidConfig("chunk_size must be > 0".into()));
    }
    if config.extreme_k == 0 {
        return Err(SortError::InvalidConfig("extreme_k must be > 0".into()));
    }
    Ok(())
}

/// Chunk size that keeps every batch within `capacity` once both poles of
/// `extreme_k` items are carried. `None` when no window fits.
pub fn chunk_size_for_capacity(capacity: usize, extreme_k: usize) -> Option<usize> {
    capacity
        .checked_sub(extreme_k.saturating_mul(2))
        .filter(|chunk| *chunk > 0)
}

/// Upper bound on oracle calls for `n` sanitized items.
///
/// The working list never grows between sweeps, so each sweep takes at most
/// `ceil(n / chunk_size)` windows.
pub fn estimate_max_oracle_calls(n: usize, config: &SortConfig) -> usize {
    if config.chunk_size == 0 {
        return 0;
    }
    config.iterations.saturating_mul(n.div_ceil(config.chunk_size))
}

// =============================================================================
// Request / response
// =============================================================================

/// JSON request accepted by the CLI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SortRequest {
    /// Raw items; blanks and duplicates are dropped before sorting.
    pub items: Vec<String>,

    #[serde(flatten)]
    pub config: SortConfig,

    /// Model for the LLM oracle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// What one sweep did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub iteration: usize,
    /// Working list length at sweep start.
    pub working_len: usize,
    pub oracle_calls: usize,
    pub promoted_top: usize,
    pub promoted_bottom: usize,
    pub displaced_top: usize,
    pub displaced_bottom: usize,
    /// Working list length after recombination.
    pub next_working_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortMeta {
    /// Raw input length, before sanitizing.
    pub input_len: usize,
    pub sanitized_len: usize,
    pub iterations_run: usize,
    pub oracle_calls: usize,
    /// Length of the permanent top partition.
    pub promoted_top: usize,
    /// Length of the permanent bottom partition.
    pub promoted_bottom: usize,
    /// Items left in the unordered middle.
    pub unresolved_middle: usize,
    pub latency_ms: u64,
    pub sweeps: Vec<SweepSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortResponse {
    /// Permanent top, then the unordered middle, then permanent bottom.
    pub items: Vec<String>,
    pub meta: SortMeta,
}

impl SortResponse {
    /// Boundaries of the middle partition, clamped to `items` so a response
    /// read back with inconsistent counts never slices out of range.
    fn partition_bounds(&self) -> (usize, usize) {
        let len = self.items.len();
        let top_end = self.meta.promoted_top.min(len);
        let bottom_start = len.saturating_sub(self.meta.promoted_bottom).max(top_end);
        (top_end, bottom_start)
    }

    pub fn top(&self) -> &[String] {
        let (top_end, _) = self.partition_bounds();
        &self.items[..top_end]
    }

    pub fn middle(&self) -> &[String] {
        let (top_end, bottom_start) = self.partition_bounds();
        &self.items[top_end..bottom_start]
    }

    pub fn bottom(&self) -> &[String] {
        let (_, bottom_start) = self.partition_bounds();
        &self.items[bottom_start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_apply() {
        let req: SortRequest =
            serde_json::from_str(r#"{"items": ["a", "b"], "criterion": "size"}"#).unwrap();
        assert_eq!(req.config.chunk_size, 10);
        assert_eq!(req.config.extreme_k, 10);
        assert_eq!(req.config.iterations, 1);
        assert_eq!(req.config.order, SortOrder::Descending);
        assert!(req.model.is_none());
    }

    #[test]
    fn request_reads_flattened_overrides() {
        let req: SortRequest = serde_json::from_str(
            r#"{"items": [], "criterion": "size", "order": "ascending", "chunk_size": 4, "extreme_k": 2, "iterations": 3, "model": "m"}"#,
        )
        .unwrap();
        assert_eq!(
            req.config,
            SortConfig::new("size")
                .order(SortOrder::Ascending)
                .chunk_size(4)
                .extreme_k(2)
                .iterations(3)
        );
        assert_eq!(req.model.as_deref(), Some("m"));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let ok = SortConfig::new("x");
        assert!(validate_sort_config(&ok).is_ok());
        assert!(validate_sort_config(&ok.clone().chunk_size(0)).is_err());
        assert!(validate_sort_config(&ok.clone().extreme_k(0)).is_err());
        assert!(validate_sort_config(&SortConfig::new("  ")).is_err());
        assert!(validate_sort_config(&ok.iterations(0)).is_ok());
    }

    #[test]
    fn capacity_headroom() {
        assert_eq!(chunk_size_for_capacity(40, 10), Some(20));
        assert_eq!(chunk_size_for_capacity(20, 10), None);
        assert_eq!(chunk_size_for_capacity(5, 10), None);
    }

    #[test]
    fn call_estimate() {
        let config = SortConfig::new("x").chunk_size(10).iterations(3);
        assert_eq!(estimate_max_oracle_calls(25, &config), 9);
        assert_eq!(estimate_max_oracle_calls(0, &config), 0);
        assert_eq!(config.max_batch_len(), 30);
    }

    #[test]
    fn partitions_slice_items() {
        let resp = SortResponse {
            items: ["t1", "t2", "m", "b1"].iter().map(|s| s.to_string()).collect(),
            meta: SortMeta {
                input_len: 4,
                sanitized_len: 4,
                iterations_run: 1,
                oracle_calls: 1,
                promoted_top: 2,
                promoted_bottom: 1,
                unresolved_middle: 1,
                latency_ms: 0,
                sweeps: Vec::new(),
            },
        };
        assert_eq!(resp.top(), ["t1", "t2"]);
        assert_eq!(resp.middle(), ["m"]);
        assert_eq!(resp.bottom(), ["b1"]);
    }

    #[test]
    fn partitions_clamp_inconsistent_counts() {
        let resp: SortResponse = serde_json::from_str(
            r#"{"items": ["a", "b"], "meta": {"input_len": 2, "sanitized_len": 2,
                "iterations_run": 1, "oracle_calls": 1, "promoted_top": 5,
                "promoted_bottom": 7, "unresolved_middle": 0, "latency_ms": 0,
                "sweeps": []}}"#,
        )
        .unwrap();
        assert_eq!(resp.top(), ["a", "b"]);
        assert!(resp.middle().is_empty());
        assert!(resp.bottom().is_empty());

        let resp = SortResponse {
            meta: SortMeta {
                promoted_top: 0,
                ..resp.meta
            },
            ..resp
        };
        assert!(resp.top().is_empty());
        assert!(resp.middle().is_empty());
        assert_eq!(resp.bottom(), ["a", "b"]);
    }
}
