/// Counters from serving one query.  The pipeline builds this
/// structure rather than update the Prometheus metrics directly; the
/// binary flushes it into its exporters.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct QueryMetrics {
    /// Answered from authoritative data.
    pub authoritative: u64,
    /// Answered with a delegation.
    pub delegations: u64,
    /// Refused: not our zone.
    pub refused: u64,
    /// NXDOMAIN answers.
    pub name_errors: u64,
    /// Response cache hits.
    pub cache_hits: u64,
    /// Response cache misses.
    pub cache_misses: u64,
    /// Answers carrying a weighted-random selection.
    pub weighted: u64,
    /// CNAME chains followed to the end.
    pub chases: u64,
    /// Store or resolution failures surfaced as ServFail.
    pub failures: u64,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}
