//! Chunked extremes-extraction sort.
//!
//! Provides an approximate sort over lists longer than any single oracle call
//! can see:
//! - Sanitizer: blank removal and first-occurrence dedup
//! - Chunk Sweeper: windows ranked alongside carried top/bottom poles
//! - Iteration Controller: fixed-budget sweeps with displaced-item recycling
//!
//! The output is a full permutation whose ends are ranked with growing
//! confidence per iteration; the middle is left unordered.

pub mod engine;
pub mod options;
pub mod sanitize;
pub mod sweep;
pub mod trace;
pub mod types;

pub use engine::{sort, sort_many, sort_with_trace, SortError};
pub use options::SortRunOptions;
pub use sanitize::sanitize;
pub use sweep::{split_extremes, sweep, SweepOutcome};
pub use trace::{JsonlTraceSink, OracleCallTrace, TraceError, TraceSink, TraceWorker};
pub use types::*;
