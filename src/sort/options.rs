//! Optional execution limits for a sort run.

use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct SortRunOptions {
    /// Upper bound for each oracle call.
    pub call_timeout: Option<Duration>,
    /// Upper bound for the whole sort, checked against every oracle call.
    pub latency_budget: Option<Duration>,
}
