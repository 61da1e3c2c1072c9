#![forbid(unsafe_code)]

//! # pole-sort
//!
//! Approximate sorting of long lists by a free-form criterion, using an LLM
//! that can only rank a few dozen items at a time.
//!
//! The list is swept in fixed-size windows. Each window is ranked together
//! with the best and worst items found so far, so true extremes migrate to
//! the poles across windows. After every sweep the surviving poles are
//! promoted permanently and the displaced items are recycled into the next
//! sweep. More iterations buy longer confidently-ranked ends; the middle is
//! deliberately left unordered.

pub mod gateway;
pub mod oracle;
pub mod prompts;
pub mod sort;

pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use oracle::{
    validate_permutation, LlmOracle, LlmOracleConfig, OracleError, RankRequest, RankingOracle,
    SortOrder,
};
pub use sort::{
    sanitize, sort, sort_many, sort_with_trace, sweep, JsonlTraceSink, OracleCallTrace,
    SortConfig, SortError, SortRequest, SortResponse, SortRunOptions, SweepOutcome, TraceError,
    TraceSink, TraceWorker,
};
