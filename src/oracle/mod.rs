//! Ranking oracle contract.
//!
//! An oracle reorders a bounded list of items by fit to a criterion. The sort
//! engine only ever talks to this trait; [`LlmOracle`] is the LLM-backed
//! implementation.

pub mod llm;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::ProviderError;

pub use llm::{parse_ranking_response, LlmOracle, LlmOracleConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Best fit first.
    #[default]
    Descending,
    Ascending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Descending => "descending",
            SortOrder::Ascending => "ascending",
        }
    }

    /// Natural-language ordering instruction used in prompts.
    pub fn instruction(&self) -> &'static str {
        match self {
            SortOrder::Descending => {
                "Put the item that best satisfies the criterion first and the worst last."
            }
            SortOrder::Ascending => {
                "Put the item that least satisfies the criterion first and the best last."
            }
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "descending" | "desc" => Ok(SortOrder::Descending),
            "ascending" | "asc" => Ok(SortOrder::Ascending),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// One oracle call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankRequest {
    pub criterion: String,
    #[serde(rename = "sortOrder")]
    pub order: SortOrder,
    pub items: Vec<String>,
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("unparsable ranking response: {0}")]
    Parse(String),
    #[error("ranking returned {got} items, expected {expected}")]
    CountMismatch { expected: usize, got: usize },
    #[error("ranking returned an item that was not requested: {0:?}")]
    UnknownItem(String),
    #[error("ranking returned an item more than once: {0:?}")]
    DuplicateItem(String),
    #[error("batch of {len} items exceeds oracle capacity of {capacity}")]
    OverCapacity { len: usize, capacity: usize },
    #[error("{0}")]
    Message(String),
}

impl OracleError {
    /// True for responses that arrived but were not a permutation of the request.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OracleError::Parse(_)
                | OracleError::CountMismatch { .. }
                | OracleError::UnknownItem(_)
                | OracleError::DuplicateItem(_)
        )
    }
}

#[async_trait]
pub trait RankingOracle: Send + Sync {
    /// Return `req.items` reordered by fit to `req.criterion`.
    async fn rank(&self, req: &RankRequest) -> Result<Vec<String>, OracleError>;

    /// Largest batch one call accepts. `None` means unbounded.
    fn max_items_per_call(&self) -> Option<usize> {
        None
    }
}

#[async_trait]
impl<T: RankingOracle + ?Sized> RankingOracle for std::sync::Arc<T> {
    async fn rank(&self, req: &RankRequest) -> Result<Vec<String>, OracleError> {
        (**self).rank(req).await
    }

    fn max_items_per_call(&self) -> Option<usize> {
        (**self).max_items_per_call()
    }
}

/// Check that `returned` holds exactly the items of `requested`.
pub fn validate_permutation(
    requested: &[String],
    returned: Vec<String>,
) -> Result<Vec<String>, OracleError> {
    if returned.len() != requested.len() {
        return Err(OracleError::CountMismatch {
            expected: requested.len(),
            got: returned.len(),
        });
    }

    let known: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(returned.len());
    for item in &returned {
        if !known.contains(item.as_str()) {
            return Err(OracleError::UnknownItem(item.clone()));
        }
        if !seen.insert(item.as_str()) {
            return Err(OracleError::DuplicateItem(item.clone()));
        }
    }

    Ok(returned)
}
