mod dag;
mod speculative;

pub use dag::DagExecutor;
pub use speculative::SpeculativeExecutor;

/// Shape of the dependency graph built by [`DagExecutor`].
#[must_use]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DagStats {
    /// Number of tasks (graph nodes).
    pub tasks: usize,
    /// Number of derived dependency edges after deduplication.
    pub edges: usize,
    /// Number of initial sources (tasks with no predecessors).
    pub sources: usize,
}

/// Per-run counters of the speculative executor.
///
/// Used only to report efficiency; correctness never depends on them.
#[must_use]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RunStats {
    /// Number of rounds executed.
    pub rounds: u64,
    /// Contexts created across all rounds, counting retries of aborted tasks.
    pub total_tasks: u64,
    /// Tasks committed; the operator ran to completion exactly once for each.
    pub total_commits: u64,
    /// Conflicting resource acquisitions observed by the registry.
    pub conflicts: u64,
}

impl RunStats {
    /// Fraction of attempted executions that committed; `1.0` for an empty
    /// run.
    pub fn efficiency(&self) -> f64 {
        if self.total_tasks == 0 {
            1.0
        } else {
            self.total_commits as f64 / self.total_tasks as f64
        }
    }

    /// Average commits per round; `0.0` for an empty run.
    pub fn avg_parallelism(&self) -> f64 {
        if self.rounds == 0 {
            0.0
        } else {
            self.total_commits as f64 / self.rounds as f64
        }
    }
}
