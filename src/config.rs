use thiserror::Error;

/// Error returned by the speculative run entry points.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ExecError {
    /// The provided [`WindowPolicy`] is out of range.
    #[error("invalid window policy: {0}")]
    InvalidPolicy(&'static str),
    /// The round limit was reached with tasks still pending or hidden.
    ///
    /// Nothing is lost silently: everything already committed stays
    /// committed, and the count of outstanding tasks is reported here.
    #[error("round limit {limit} reached with {outstanding} task(s) outstanding")]
    RoundLimit {
        /// The configured `max_rounds`.
        limit: u64,
        /// Tasks still awaiting commit when the limit fired.
        outstanding: usize,
    },
}

/// Which admission worklist backs the speculative window.
///
/// Mirrors the two window variants: a static, range-backed window for inputs
/// known upfront, and a priority-queue-backed window when the operator pushes
/// new tasks during execution.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum WindowKind {
    /// Per-shard sorted slices with advancing front cursors. Fastest, but
    /// direct insertion is unsupported: an operator push that must land in
    /// the hidden window fails loudly.
    #[default]
    SortedRange,
    /// Per-shard priority queues. Supports dynamic pushes; use this whenever
    /// the operator calls [`crate::ExecCtx::push`].
    PriorityQueue,
}

/// How the dependency-graph executor interprets neighborhood declarations.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum SharerKind {
    /// Read/write intent is honored: writer-writer and writer-reader overlaps
    /// produce edges, reader-reader overlaps do not.
    #[default]
    ReadWrite,
    /// Intent is ignored; every pair of sharers of a handle is ordered.
    Simple,
}

/// Tuning knobs for the speculative window.
///
/// The commit-ratio and retry policies are heuristics without an optimality
/// argument, so they are configuration rather than constants. The defaults
/// work well for workloads with moderate conflict density.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPolicy {
    /// Target fraction of each round's admitted tasks that should commit.
    /// Rounds that meet the target double the window; rounds that miss it
    /// shrink the window toward `commits / commit_ratio`.
    ///
    /// `0.0` disables windowing entirely: the whole input is admitted at
    /// once and speculation depth is unbounded.
    pub commit_ratio: f64,
    /// Lower bound on the window target. Must be at least 1.
    pub min_window: usize,
    /// Which worklist variant backs the window.
    pub kind: WindowKind,
    /// Optional bound on the number of rounds before the run fails with
    /// [`ExecError::RoundLimit`]. `None` retries until done.
    pub max_rounds: Option<u64>,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            commit_ratio: 0.9,
            min_window: 64,
            kind: WindowKind::default(),
            max_rounds: None,
        }
    }
}

impl WindowPolicy {
    pub(crate) fn validate(&self) -> Result<(), ExecError> {
        if !self.commit_ratio.is_finite() || !(0.0..=1.0).contains(&self.commit_ratio) {
            return Err(ExecError::InvalidPolicy(
                "commit_ratio must be a finite value in [0, 1]",
            ));
        }
        if self.min_window == 0 {
            return Err(ExecError::InvalidPolicy("min_window must be at least 1"));
        }
        Ok(())
    }
}
