use jobs::Termination;
use kgraph_core::stats::{BuilderStats, EnricherStats};
use kgraph_core::KgError;
use std::time::Duration;

/// Outcome of one run: stats are always present, even when some work failed.
#[derive(Debug)]
pub struct RunReport<S> {
    pub stats: S,
    pub termination: Termination,
    /// Number of units of work attempted (expansions or pairs).
    pub attempted: usize,
    pub failures: Vec<KgError>,
    pub elapsed: Duration,
    /// Names the run touched: the visited set of a traversal, the sampled names of a mining batch.
    pub names: Vec<String>,
}

pub type TraversalReport = RunReport<BuilderStats>;
pub type MinerReport = RunReport<EnricherStats>;

/// Rounds of a traversal re-seeded from weakly connected concepts.
#[derive(Debug)]
pub struct ReseedReport {
    pub rounds: Vec<TraversalReport>,
    /// Distinct concepts created across all rounds.
    pub nodes_created: u64,
}

impl ReseedReport {
    pub fn relationships_created(&self) -> u64 {
        self.rounds
            .iter()
            .map(|round| round.stats.relationships_created)
            .sum()
    }
}

impl<S> RunReport<S> {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.termination != Termination::TimedOut
    }

    /// Splits into stats and the run-level error, if any.
    ///
    /// A timed-out run reports `Timeout`; otherwise collected failures
    /// collapse into one `Aggregate` error.
    pub fn into_parts(self) -> (S, Option<KgError>) {
        let error = if self.termination == Termination::TimedOut {
            Some(KgError::Timeout {
                elapsed: self.elapsed,
            })
        } else {
            KgError::aggregate(self.attempted.max(self.failures.len()), self.failures)
        };
        (self.stats, error)
    }
}
