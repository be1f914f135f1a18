use crate::{
    config::{ExecError, WindowPolicy},
    executor::RunStats,
    registry::{Acquire, HolderRegistry},
    task::{DeclareCtx, ExecCtx, ResourceId},
    types::CtxIdx,
    window::Window,
};
use core::sync::atomic::{AtomicU8, Ordering};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::debug;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
enum CtxState {
    Pending = 0,
    Running = 1,
    Aborted = 2,
    Committed = 3,
}

/// Per-round execution context. Created when its task is admitted from the
/// window; recycled at round end: committed contexts dissolve, aborted ones
/// return their task to the pending queue.
#[derive(Debug)]
struct SpecContext<T> {
    task: T,
    /// Conflict-visible: a higher-priority context stealing a resource flips
    /// this to `Aborted` from another thread. Everything else on the context
    /// is touched only by its owning worker within a phase.
    state: AtomicU8,
    /// Resources acquired so far, in order, for release on abort or commit.
    acquired: Mutex<Vec<ResourceId>>,
}

impl<T> SpecContext<T> {
    fn new(task: T) -> Self {
        Self {
            task,
            state: AtomicU8::new(CtxState::Pending as u8),
            acquired: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> CtxState {
        match self.state.load(Ordering::Relaxed) {
            0 => CtxState::Pending,
            1 => CtxState::Running,
            2 => CtxState::Aborted,
            _ => CtxState::Committed,
        }
    }

    fn set_state(&self, state: CtxState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

/// Optimistic speculate-and-abort executor.
///
/// Repeats rounds until the window worklist and the pending queue are both
/// drained. A round admits a window of tasks, expands their neighborhoods
/// against the holder registry (conflicts resolve immediately in favor of the
/// comparator-smaller context), runs the operator for the surviving
/// candidates in parallel, commits them, and requeues the aborted tasks for a
/// later round. Rounds are separated by soft synchronization points: each
/// phase is a parallel loop that fully settles before the next phase reads
/// its results.
#[must_use]
#[derive(Debug)]
pub struct SpeculativeExecutor<T, C, N, O> {
    cmp: C,
    nhood_fn: N,
    op_fn: O,
    policy: WindowPolicy,
    window: Window<T>,
    /// Tasks admitted for the next round: freshly revealed window tasks,
    /// retried aborts, and dynamically pushed tasks that ran ahead of the
    /// hidden minimum.
    pending: Vec<T>,
    window_target: usize,
    stats: RunStats,
}

impl<T, C, N, O> SpeculativeExecutor<T, C, N, O>
where
    T: Clone + Send + Sync,
    C: Fn(&T, &T) -> bool + Sync,
    N: Fn(&T, &mut DeclareCtx) + Sync,
    O: Fn(&T, &mut ExecCtx<T>) + Sync,
{
    /// # Errors
    /// [`ExecError::InvalidPolicy`] if `policy` is out of range.
    pub fn new(cmp: C, nhood_fn: N, op_fn: O, policy: WindowPolicy) -> Result<Self, ExecError> {
        policy.validate()?;
        let window = Window::new(policy.kind);
        let window_target = policy.min_window;
        Ok(Self {
            cmp,
            nhood_fn,
            op_fn,
            policy,
            window,
            pending: Vec::new(),
            window_target,
            stats: RunStats::default(),
        })
    }

    /// Supplies the initial task range.
    ///
    /// With a non-zero commit ratio the tasks fill the window worklist and
    /// are admitted incrementally; with `commit_ratio == 0` windowing is
    /// disabled and the whole range is admitted in the first round.
    pub fn push_initial(&mut self, tasks: Vec<T>) {
        if self.policy.commit_ratio == 0.0 {
            self.pending.extend(tasks);
        } else {
            self.window.init_fill(tasks, &self.cmp);
        }
    }

    /// Runs rounds until every task, including dynamically pushed
    /// descendants, has committed.
    ///
    /// # Errors
    /// [`ExecError::RoundLimit`] if `policy.max_rounds` rounds elapse with
    /// admitted tasks still outstanding. Committed work stays committed.
    ///
    /// # Panics
    /// Operator panics unwind out of this call; panics on a dynamic push
    /// that must land in a range-backed window (misuse).
    pub fn execute(&mut self) -> Result<RunStats, ExecError> {
        loop {
            self.refill();
            if self.pending.is_empty() {
                break;
            }
            if let Some(limit) = self.policy.max_rounds {
                if self.stats.rounds >= limit {
                    return Err(ExecError::RoundLimit {
                        limit,
                        outstanding: self.pending.len() + self.window.len(),
                    });
                }
            }

            // Registry lifecycle is one round: every context either commits
            // or aborts before the next refill, releasing its slots.
            let registry = HolderRegistry::new();
            let arena = self.expand_nhood(&registry);
            let attempted = arena.len();
            let scheduled: Vec<usize> = (0..arena.len())
                .filter(|&i| arena[i].state() == CtxState::Pending)
                .collect();

            let min_hidden = self.window.get_min(&self.cmp);
            let pushed = self.apply_operator(&arena, &scheduled, &registry);
            let committed = scheduled.len();
            self.route_pushed(pushed, min_hidden);
            self.retire(arena, &registry);
            self.end_round(&registry, attempted, committed);
        }
        Ok(self.stats)
    }

    /// Collected statistics so far.
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Phase 1: advance the window up to the current target, bounded by the
    /// commit-ratio policy.
    fn refill(&mut self) {
        if self.policy.commit_ratio == 0.0 {
            return;
        }
        let Self {
            cmp,
            window,
            pending,
            window_target,
            ..
        } = self;
        let orig = pending.len();
        window.poll(pending, *window_target, orig, cmp);
    }

    /// Phase 2: allocate a context per admitted task and run its neighborhood
    /// declaration against the registry. A context losing any acquisition to
    /// a comparator-smaller holder is marked `Aborted` and never runs.
    fn expand_nhood(&mut self, registry: &HolderRegistry) -> Vec<SpecContext<T>> {
        let tasks = core::mem::take(&mut self.pending);
        let arena: Vec<SpecContext<T>> = tasks.into_iter().map(SpecContext::new).collect();
        let (cmp, nhood_fn) = (&self.cmp, &self.nhood_fn);
        let arena_ref = &arena;
        let precedes =
            |a: CtxIdx, b: CtxIdx| cmp(&arena_ref[a as usize].task, &arena_ref[b as usize].task);

        (0..arena.len()).into_par_iter().for_each(|i| {
            let me = i as CtxIdx;
            let ctx = &arena_ref[i];
            let mut declare = DeclareCtx::new();
            nhood_fn(&ctx.task, &mut declare);
            for (resource, _intent) in declare.decls {
                match registry.acquire(resource, me, precedes) {
                    Acquire::Won { stole_from } => {
                        ctx.acquired.lock().push(resource);
                        if let Some(victim) = stole_from {
                            arena_ref[victim as usize].set_state(CtxState::Aborted);
                        }
                    }
                    Acquire::Lost => {
                        ctx.set_state(CtxState::Aborted);
                        break;
                    }
                }
            }
        });
        arena
    }

    /// Phase 3: run the operator for every scheduled candidate, release its
    /// holdings, and mark it committed. Returns the tasks pushed by the
    /// operators of committed contexts.
    fn apply_operator(
        &self,
        arena: &[SpecContext<T>],
        scheduled: &[usize],
        registry: &HolderRegistry,
    ) -> Vec<T> {
        let op_fn = &self.op_fn;
        let pushed: Vec<Vec<T>> = scheduled
            .par_iter()
            .map(|&i| {
                let ctx = &arena[i];
                ctx.set_state(CtxState::Running);
                let mut exec = ExecCtx::new(true);
                op_fn(&ctx.task, &mut exec);
                for &resource in ctx.acquired.lock().iter() {
                    registry.release(resource, i as CtxIdx);
                }
                ctx.set_state(CtxState::Committed);
                exec.pushes
            })
            .collect();
        pushed.into_iter().flatten().collect()
    }

    /// Routes dynamically pushed tasks against the minimum not-yet-revealed
    /// priority captured before the operators ran: a task at least as large
    /// as that bound goes into the window for a later reveal, anything
    /// smaller is safe to run in the next round directly.
    fn route_pushed(&mut self, pushed: Vec<T>, min_hidden: Option<T>) {
        for task in pushed {
            let behind_window = self.policy.commit_ratio != 0.0
                && min_hidden
                    .as_ref()
                    .is_some_and(|min| (self.cmp)(min, &task));
            if behind_window {
                self.window.push(task, &self.cmp);
            } else {
                self.pending.push(task);
            }
        }
    }

    /// Phase 4: release whatever the aborted contexts still hold and requeue
    /// their tasks; committed contexts dissolve with the arena.
    fn retire(&mut self, arena: Vec<SpecContext<T>>, registry: &HolderRegistry) {
        let aborted: Vec<usize> = (0..arena.len())
            .filter(|&i| arena[i].state() != CtxState::Committed)
            .collect();
        aborted.par_iter().for_each(|&i| {
            for &resource in arena[i].acquired.lock().iter() {
                // Stolen slots are skipped inside release.
                registry.release(resource, i as CtxIdx);
            }
        });
        for (i, ctx) in arena.into_iter().enumerate() {
            debug_assert_ne!(ctx.state(), CtxState::Running);
            if ctx.state() != CtxState::Committed {
                debug_assert!(aborted.contains(&i));
                self.pending.push(ctx.task);
            }
        }
    }

    /// Phase 5: fold round counters into the run statistics and adapt the
    /// window target. Rounds that meet the commit-ratio target double the
    /// window; rounds that miss it shrink toward `commits / commit_ratio`.
    fn end_round(&mut self, registry: &HolderRegistry, attempted: usize, committed: usize) {
        self.stats.rounds += 1;
        self.stats.total_tasks += attempted as u64;
        self.stats.total_commits += committed as u64;
        self.stats.conflicts += registry.conflicts();
        let ratio = self.policy.commit_ratio;
        if ratio > 0.0 {
            let target = if committed as f64 >= ratio * attempted as f64 {
                attempted.saturating_mul(2)
            } else {
                (committed as f64 / ratio) as usize
            };
            self.window_target = target.max(self.policy.min_window);
        }
        debug!(
            round = self.stats.rounds,
            attempted,
            committed,
            contested = registry.contested_handles(),
            window_target = self.window_target,
            "round complete"
        );
    }
}
