use crate::{
    config::SharerKind,
    executor::DagStats,
    registry::SharerRegistry,
    task::{DeclareCtx, ExecCtx},
    types::{CtxIdx, IndexSet},
};
use core::sync::atomic::{fence, AtomicU32, Ordering};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::debug;

#[derive(Debug)]
struct DagContext<T> {
    task: T,
    /// Predecessors left to finish. Mutated only by predecessors completing;
    /// the decrement that observes zero transfers ownership of this context
    /// to the observing worker.
    in_deg: AtomicU32,
    orig_in_deg: u32,
    /// Successor indices, built once during setup, immutable afterwards.
    out: Vec<CtxIdx>,
}

/// Upfront dependency-graph executor.
///
/// Setup allocates one context per task, runs the neighborhood callback to
/// collect resource declarations, and turns per-resource sharer overlap into
/// directed edges from the comparator-smaller context to the larger one.
/// Execution drains the graph with a parallel in-degree-zero traversal: no
/// speculation, no aborts, each task runs exactly once per execution.
///
/// The graph can be re-run without rebuilding edges via [`reset`] followed by
/// another [`execute`], for do/while convergence loops over the same task set.
///
/// [`reset`]: DagExecutor::reset
/// [`execute`]: DagExecutor::execute
#[must_use]
#[derive(Debug)]
pub struct DagExecutor<T> {
    contexts: Vec<DagContext<T>>,
    sources: Vec<CtxIdx>,
    edges: usize,
}

impl<T> DagExecutor<T>
where
    T: Send + Sync,
{
    /// Builds the dependency graph:
    /// 1. one context per task, neighborhood declarations collected into a
    ///    per-resource sharer registry in parallel;
    /// 2. for every resource entry, an edge per conflicting sharer pair
    ///    (writer-writer and writer-reader under [`SharerKind::ReadWrite`],
    ///    all pairs under [`SharerKind::Simple`]), deduplicated, oriented
    ///    from the comparator-smaller context to the larger with ties broken
    ///    by admission index — the orientation is a total order, so the
    ///    resulting graph is acyclic by construction;
    /// 3. contexts with no predecessors become the initial sources.
    pub fn new<C, N>(tasks: Vec<T>, cmp: C, nhood_fn: N, sharing: SharerKind) -> Self
    where
        C: Fn(&T, &T) -> bool + Sync,
        N: Fn(&T, &mut DeclareCtx) + Sync,
    {
        let registry = SharerRegistry::new(sharing);
        tasks.par_iter().enumerate().for_each(|(i, task)| {
            let mut declare = DeclareCtx::new();
            nhood_fn(task, &mut declare);
            for (resource, intent) in declare.decls {
                registry.declare(resource, i as CtxIdx, intent);
            }
        });

        let adj: Vec<Mutex<IndexSet<CtxIdx>>> =
            (0..tasks.len()).map(|_| Mutex::new(IndexSet::default())).collect();
        let in_deg: Vec<AtomicU32> = (0..tasks.len()).map(|_| AtomicU32::new(0)).collect();

        let precedes = |a: CtxIdx, b: CtxIdx| {
            let (ta, tb) = (&tasks[a as usize], &tasks[b as usize]);
            cmp(ta, tb) || (!cmp(tb, ta) && a < b)
        };
        registry.into_entries().par_iter().for_each(|entry| {
            entry.for_each_conflicting_pair(|a, b| {
                if a == b {
                    // A task declaring a handle twice does not conflict with
                    // itself.
                    return;
                }
                let (src, dst) = if precedes(a, b) { (a, b) } else { (b, a) };
                if adj[src as usize].lock().insert(dst) {
                    in_deg[dst as usize].fetch_add(1, Ordering::Relaxed);
                }
            });
        });

        let mut edges = 0;
        let contexts: Vec<DagContext<T>> = tasks
            .into_iter()
            .zip(adj)
            .zip(in_deg)
            .map(|((task, adj), in_deg)| {
                let mut out: Vec<CtxIdx> = adj.into_inner().into_iter().collect();
                // Sorted successor indices for better cache locality.
                out.sort_unstable();
                edges += out.len();
                let degree = in_deg.into_inner();
                DagContext {
                    task,
                    in_deg: AtomicU32::new(degree),
                    orig_in_deg: degree,
                    out,
                }
            })
            .collect();
        let sources: Vec<CtxIdx> = contexts
            .iter()
            .enumerate()
            .filter(|(_, ctx)| ctx.orig_in_deg == 0)
            .map(|(i, _)| i as CtxIdx)
            .collect();
        debug!(
            tasks = contexts.len(),
            edges,
            sources = sources.len(),
            "dependency graph built"
        );
        Self {
            contexts,
            sources,
            edges,
        }
    }

    /// Executes the graph in a parallel, dependency-respecting manner.
    ///
    /// Independent sources run joined in parallel. When a task finishes it
    /// performs a Release fence if it has successors, decrements each
    /// successor's in-degree (Relaxed), and runs — after an Acquire fence —
    /// every successor whose counter reached zero under this worker. The
    /// fence-and-counter protocol guarantees a task observes all of its
    /// predecessors' effects.
    ///
    /// Must start from a freshly built or [`reset`](Self::reset) graph; the
    /// traversal consumes the in-degree counters.
    ///
    /// # Panics
    /// An operator panic is fatal: it unwinds out of this call and leaves the
    /// counters partially consumed. Everything that already committed stays
    /// committed; call [`reset`](Self::reset) before reusing the executor.
    pub fn execute<O>(&self, op_fn: O)
    where
        O: Fn(&T, &mut ExecCtx<T>) + Sync,
    {
        self.join_ready(&self.sources, &op_fn);
    }

    fn join_ready<O>(&self, ready: &[CtxIdx], op_fn: &O)
    where
        O: Fn(&T, &mut ExecCtx<T>) + Sync,
    {
        match ready {
            [] => {}
            [idx] => self.run_one(*idx, op_fn),
            _ => {
                let (left, right) = ready.split_at(ready.len() / 2);
                rayon::join(
                    || self.join_ready(left, op_fn),
                    || self.join_ready(right, op_fn),
                );
            }
        }
    }

    fn run_one<O>(&self, idx: CtxIdx, op_fn: &O)
    where
        O: Fn(&T, &mut ExecCtx<T>) + Sync,
    {
        let ctx = &self.contexts[idx as usize];
        let mut exec = ExecCtx::new(false);
        op_fn(&ctx.task, &mut exec);

        if ctx.out.is_empty() {
            return;
        }
        // Publish this task's effects before successors may observe the
        // decremented counters.
        fence(Ordering::Release);
        let mut ready = Vec::new();
        for &next in &ctx.out {
            if self.contexts[next as usize].in_deg.fetch_sub(1, Ordering::Relaxed) == 1 {
                ready.push(next);
            }
        }
        if ready.is_empty() {
            return;
        }
        fence(Ordering::Acquire);
        self.join_ready(&ready, op_fn);
    }

    /// Restores every context's in-degree to its original value without
    /// rebuilding edges. A reset graph re-executes to the same commit set as
    /// the first run, given a deterministic operator.
    pub fn reset(&self) {
        self.contexts
            .par_iter()
            .for_each(|ctx| ctx.in_deg.store(ctx.orig_in_deg, Ordering::Relaxed));
    }

    /// Node, edge, and source counts of the derived graph.
    pub fn stats(&self) -> DagStats {
        DagStats {
            tasks: self.contexts.len(),
            edges: self.edges,
            sources: self.sources.len(),
        }
    }
}
