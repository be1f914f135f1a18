//! Ordered, speculative, dependency-aware parallel task executor.
//!
//! This crate runs a large set of tasks that must *appear* to commit in a
//! caller-specified total order, while executing many of them in parallel
//! whenever they do not conflict over shared resources. Tasks declare the
//! resources they touch through a neighborhood callback; the executor turns
//! resource overlap into ordering constraints and keeps everything else
//! concurrent.
//!
//! Two execution strategies are provided:
//! - [`DagExecutor`]: builds an explicit dependency graph upfront from
//!   resource overlap, then drains it with a parallel in-degree-zero
//!   traversal. No speculation, no aborts; suitable for static workloads that
//!   are re-run to convergence (see [`DagExecutor::reset`]).
//! - [`SpeculativeExecutor`]: admits a bounded, order-respecting window of
//!   tasks per round, runs them optimistically in parallel, aborts and retries
//!   the losers of any resource conflict, and commits the winners. Supports
//!   operators that push new tasks dynamically.
//!
//! Key modules:
//! - `task`: resource handles, read/write intent, and the declare/exec
//!   handles passed to user callbacks.
//! - `window`: the priority-windowed admission worklist that bounds how far
//!   ahead of the commit frontier speculation may run.
//! - `registry`: per-handle conflict tracking shared by both strategies.
//! - `executor`: the two executors and their run statistics.
//! - `config`: the speculation window policy knobs.
//!
//! Quick start:
//! 1. Pick a task type `T: Clone + Send + Sync` and a strict-weak-order
//!    comparator `cmp(a, b) -> bool` ("a strictly precedes b").
//! 2. Write a neighborhood callback declaring the resources each task touches
//!    via [`DeclareCtx::declare`], and an operator performing its effect.
//! 3. Call [`run_dag_ordered`] or [`run_speculative_ordered`].
//!
//! The executors guarantee that for any two tasks with a write-write or
//! write-read overlap on a common handle, the comparator-smaller one commits
//! first, on every schedule and thread count. Commit order between
//! non-conflicting tasks is unspecified.

/// Speculation window policy and the public error type.
pub mod config;
/// The two executors: upfront dependency-graph mode and speculative mode.
pub mod executor;
mod registry;
/// Task-facing types: resource handles, intents, declare/exec handles.
pub mod task;
mod types;
/// Priority-windowed admission worklists.
///
/// A window worklist reveals only a bounded, globally-contiguous prefix of the
/// not-yet-scheduled tasks each round, so that wasted speculative work stays
/// proportional to available parallelism.
pub mod window;

pub use crate::{
    config::{ExecError, SharerKind, WindowKind, WindowPolicy},
    executor::{DagExecutor, DagStats, RunStats, SpeculativeExecutor},
    task::{DeclareCtx, ExecCtx, Intent, ResourceId},
};

/// Runs `tasks` with the upfront dependency-graph strategy and blocks until
/// every task has committed.
///
/// Equivalent to building a [`DagExecutor`] with [`SharerKind::ReadWrite`]
/// sharing and executing it once. Returns the graph shape statistics.
///
/// # Panics
/// Propagates operator panics; panics if the operator calls
/// [`ExecCtx::push`] (dynamic tasks are not supported in this mode).
pub fn run_dag_ordered<T, C, N, O>(tasks: Vec<T>, cmp: C, nhood_fn: N, op_fn: O) -> DagStats
where
    T: Clone + Send + Sync,
    C: Fn(&T, &T) -> bool + Sync,
    N: Fn(&T, &mut DeclareCtx) + Sync,
    O: Fn(&T, &mut ExecCtx<T>) + Sync,
{
    let exec = DagExecutor::new(tasks, cmp, nhood_fn, SharerKind::ReadWrite);
    exec.execute(op_fn);
    exec.stats()
}

/// Runs `tasks` with the optimistic speculate-and-abort strategy and blocks
/// until every task (and every dynamically pushed descendant) has committed.
///
/// # Errors
/// Returns [`ExecError::InvalidPolicy`] for an out-of-range `policy`, and
/// [`ExecError::RoundLimit`] if `policy.max_rounds` is exceeded with work
/// still outstanding.
///
/// # Panics
/// Propagates operator panics; panics if the operator pushes a task while the
/// window is range-backed ([`WindowKind::SortedRange`]).
pub fn run_speculative_ordered<T, C, N, O>(
    tasks: Vec<T>,
    cmp: C,
    nhood_fn: N,
    op_fn: O,
    policy: WindowPolicy,
) -> Result<RunStats, ExecError>
where
    T: Clone + Send + Sync,
    C: Fn(&T, &T) -> bool + Sync,
    N: Fn(&T, &mut DeclareCtx) + Sync,
    O: Fn(&T, &mut ExecCtx<T>) + Sync,
{
    let mut exec = SpeculativeExecutor::new(cmp, nhood_fn, op_fn, policy)?;
    exec.push_initial(tasks);
    exec.execute()
}
