use crate::config::WindowKind;
use core::cmp::Ordering;
use rayon::prelude::*;
use tracing::trace;

fn shard_count() -> usize {
    rayon::current_num_threads().max(1)
}

fn sort_order<T>(cmp: &impl Fn(&T, &T) -> bool, a: &T, b: &T) -> Ordering {
    if cmp(a, b) {
        Ordering::Less
    } else if cmp(b, a) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Admission worklist over a static input range.
///
/// The input is partitioned into per-shard slices, each sorted once at fill
/// time; a front cursor per shard marks how far the window has been revealed.
/// Revealed tasks are never hidden again. Direct insertion is unsupported:
/// once a worklist is windowed over a static range, dynamically produced
/// tasks must go through the executor's pending queue instead, and [`push`]
/// fails loudly.
///
/// [`push`]: SortedRangeWindow::push
#[derive(Debug)]
pub struct SortedRangeWindow<T> {
    shards: Vec<RangeShard<T>>,
    init_size: usize,
}

#[derive(Debug)]
struct RangeShard<T> {
    items: Vec<T>,
    front: usize,
}

impl<T: Clone + Send + Sync> Default for SortedRangeWindow<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> SortedRangeWindow<T> {
    pub fn new() -> Self {
        Self {
            shards: (0..shard_count())
                .map(|_| RangeShard {
                    items: Vec::new(),
                    front: 0,
                })
                .collect(),
            init_size: 0,
        }
    }

    /// Partitions `tasks` across shards and sorts every shard in parallel.
    /// No cross-shard merge takes place.
    ///
    /// Refilling a partially revealed window is supported: each shard drops
    /// its revealed prefix before the new batch is merged in, so earlier
    /// reveals stay revealed and a new task ordered before them becomes
    /// visible to the next poll.
    pub fn init_fill<C>(&mut self, tasks: Vec<T>, cmp: &C)
    where
        C: Fn(&T, &T) -> bool + Sync,
    {
        self.init_size += tasks.len();
        let n = self.shards.len();
        for shard in &mut self.shards {
            shard.items.drain(..shard.front);
            shard.front = 0;
        }
        for (i, task) in tasks.into_iter().enumerate() {
            self.shards[i % n].items.push(task);
        }
        self.shards
            .par_iter_mut()
            .for_each(|shard| shard.items.sort_by(|a, b| sort_order(cmp, a, b)));
    }

    /// Returns the globally smallest not-yet-revealed task without removing
    /// it: a reduction over the per-shard fronts.
    pub fn get_min<C>(&self, cmp: &C) -> Option<T>
    where
        C: Fn(&T, &T) -> bool,
    {
        let mut min: Option<&T> = None;
        for shard in &self.shards {
            if let Some(front) = shard.items.get(shard.front) {
                if min.is_none_or(|m| cmp(front, m)) {
                    min = Some(front);
                }
            }
        }
        min.cloned()
    }

    /// Reveals additional tasks into `out` until the window grows from
    /// `orig_size` to roughly `new_size`.
    ///
    /// Part 1 reveals an even per-shard quota. The window limit is the
    /// maximum, across shards, of each shard's candidate cut point; part 2
    /// then extends every shard strictly below that limit, so that no hidden
    /// task can ever precede a revealed one. Ties under the comparator
    /// resolve by arbitrary shard order.
    pub fn poll<C>(&mut self, out: &mut Vec<T>, new_size: usize, orig_size: usize, cmp: &C)
    where
        C: Fn(&T, &T) -> bool + Sync,
    {
        if orig_size >= new_size {
            return;
        }
        let quota = ((new_size - orig_size) / self.shards.len()).max(1);

        let mut limit: Option<&T> = None;
        for shard in &self.shards {
            let rem = shard.items.len() - shard.front;
            if rem == 0 {
                continue;
            }
            let candidate = if rem <= quota {
                &shard.items[shard.items.len() - 1]
            } else {
                &shard.items[shard.front + quota]
            };
            if limit.is_none_or(|l| cmp(l, candidate)) {
                limit = Some(candidate);
            }
        }
        let Some(limit) = limit.cloned() else {
            return;
        };

        let revealed: Vec<Vec<T>> = self
            .shards
            .par_iter_mut()
            .map(|shard| {
                let mut local = Vec::new();
                let take = quota.min(shard.items.len() - shard.front);
                for _ in 0..take {
                    local.push(shard.items[shard.front].clone());
                    shard.front += 1;
                }
                while shard.front < shard.items.len() && cmp(&shard.items[shard.front], &limit) {
                    local.push(shard.items[shard.front].clone());
                    shard.front += 1;
                }
                // Prefix invariant: everything left hidden is >= the limit.
                debug_assert!(
                    shard.front == shard.items.len()
                        || !cmp(&shard.items[shard.front], &limit)
                );
                local
            })
            .collect();
        let before = out.len();
        for batch in revealed {
            out.extend(batch);
        }
        trace!(revealed = out.len() - before, quota, "window poll");
    }

    /// Unsupported for the range-backed variant.
    ///
    /// # Panics
    /// Always.
    pub fn push(&mut self, _task: T) -> ! {
        panic!("push is not supported by the range-backed window worklist");
    }

    pub fn is_empty(&self) -> bool {
        self.shards
            .iter()
            .all(|shard| shard.front == shard.items.len())
    }

    /// Number of tasks still hidden behind the window.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.items.len() - shard.front)
            .sum()
    }

    /// Number of tasks supplied via [`init_fill`](Self::init_fill).
    pub fn init_size(&self) -> usize {
        self.init_size
    }
}

/// Admission worklist backed by per-shard priority queues.
///
/// Supports [`push`](Self::push) for dynamically produced tasks; polling
/// removes tasks instead of advancing a cursor. Each shard is a sorted
/// sequence, so the smallest element of a shard is always at its head.
#[derive(Debug)]
pub struct PqWindow<T> {
    shards: Vec<Vec<T>>,
    next_shard: usize,
    init_size: usize,
}

impl<T: Clone + Send + Sync> Default for PqWindow<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> PqWindow<T> {
    pub fn new() -> Self {
        Self {
            shards: (0..shard_count()).map(|_| Vec::new()).collect(),
            next_shard: 0,
            init_size: 0,
        }
    }

    pub fn init_fill<C>(&mut self, tasks: Vec<T>, cmp: &C)
    where
        C: Fn(&T, &T) -> bool + Sync,
    {
        self.init_size += tasks.len();
        let n = self.shards.len();
        for (i, task) in tasks.into_iter().enumerate() {
            self.shards[i % n].push(task);
        }
        self.shards
            .par_iter_mut()
            .for_each(|shard| shard.sort_by(|a, b| sort_order(cmp, a, b)));
    }

    /// Inserts one task, keeping its shard sorted. Shards are fed round-robin
    /// to keep them balanced.
    pub fn push<C>(&mut self, task: T, cmp: &C)
    where
        C: Fn(&T, &T) -> bool,
    {
        let n = self.shards.len();
        let shard = &mut self.shards[self.next_shard];
        self.next_shard = (self.next_shard + 1) % n;
        let pos = shard.partition_point(|x| cmp(x, &task));
        shard.insert(pos, task);
    }

    pub fn get_min<C>(&self, cmp: &C) -> Option<T>
    where
        C: Fn(&T, &T) -> bool,
    {
        let mut min: Option<&T> = None;
        for shard in &self.shards {
            if let Some(front) = shard.first() {
                if min.is_none_or(|m| cmp(front, m)) {
                    min = Some(front);
                }
            }
        }
        min.cloned()
    }

    /// Same two-part reveal as [`SortedRangeWindow::poll`], except that the
    /// window limit is the maximum of the last task revealed per shard, and
    /// revealed tasks are removed from their shard.
    pub fn poll<C>(&mut self, out: &mut Vec<T>, new_size: usize, orig_size: usize, cmp: &C)
    where
        C: Fn(&T, &T) -> bool + Sync,
    {
        if orig_size >= new_size {
            return;
        }
        let quota = ((new_size - orig_size) / self.shards.len()).max(1);

        let batches: Vec<Vec<T>> = self
            .shards
            .par_iter_mut()
            .map(|shard| {
                let take = quota.min(shard.len());
                shard.drain(..take).collect()
            })
            .collect();

        let mut limit: Option<T> = None;
        for batch in &batches {
            if let Some(last) = batch.last() {
                if limit.as_ref().is_none_or(|l| cmp(l, last)) {
                    limit = Some(last.clone());
                }
            }
        }
        let before = out.len();
        for batch in batches {
            out.extend(batch);
        }

        if let Some(limit) = limit {
            let extra: Vec<Vec<T>> = self
                .shards
                .par_iter_mut()
                .map(|shard| {
                    let cut = shard.partition_point(|x| cmp(x, &limit));
                    shard.drain(..cut).collect()
                })
                .collect();
            for batch in extra {
                out.extend(batch);
            }
        }
        trace!(revealed = out.len() - before, quota, "window poll");
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(Vec::is_empty)
    }

    /// Number of tasks still hidden behind the window.
    pub fn len(&self) -> usize {
        self.shards.iter().map(Vec::len).sum()
    }

    /// Number of tasks supplied via [`init_fill`](Self::init_fill); pushed
    /// tasks are not counted.
    pub fn init_size(&self) -> usize {
        self.init_size
    }
}

/// Window worklist variant selected at executor construction.
#[derive(Debug)]
pub enum Window<T> {
    SortedRange(SortedRangeWindow<T>),
    Pq(PqWindow<T>),
}

impl<T: Clone + Send + Sync> Window<T> {
    pub fn new(kind: WindowKind) -> Self {
        match kind {
            WindowKind::SortedRange => Self::SortedRange(SortedRangeWindow::new()),
            WindowKind::PriorityQueue => Self::Pq(PqWindow::new()),
        }
    }

    pub fn init_fill<C>(&mut self, tasks: Vec<T>, cmp: &C)
    where
        C: Fn(&T, &T) -> bool + Sync,
    {
        match self {
            Self::SortedRange(w) => w.init_fill(tasks, cmp),
            Self::Pq(w) => w.init_fill(tasks, cmp),
        }
    }

    pub fn get_min<C>(&self, cmp: &C) -> Option<T>
    where
        C: Fn(&T, &T) -> bool,
    {
        match self {
            Self::SortedRange(w) => w.get_min(cmp),
            Self::Pq(w) => w.get_min(cmp),
        }
    }

    pub fn poll<C>(&mut self, out: &mut Vec<T>, new_size: usize, orig_size: usize, cmp: &C)
    where
        C: Fn(&T, &T) -> bool + Sync,
    {
        match self {
            Self::SortedRange(w) => w.poll(out, new_size, orig_size, cmp),
            Self::Pq(w) => w.poll(out, new_size, orig_size, cmp),
        }
    }

    /// # Panics
    /// If the window is range-backed (misuse: see [`SortedRangeWindow::push`]).
    pub fn push<C>(&mut self, task: T, cmp: &C)
    where
        C: Fn(&T, &T) -> bool,
    {
        match self {
            Self::SortedRange(w) => w.push(task),
            Self::Pq(w) => w.push(task, cmp),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::SortedRange(w) => w.is_empty(),
            Self::Pq(w) => w.is_empty(),
        }
    }

    /// Number of tasks still hidden behind the window.
    pub fn len(&self) -> usize {
        match self {
            Self::SortedRange(w) => w.len(),
            Self::Pq(w) => w.len(),
        }
    }

    pub fn init_size(&self) -> usize {
        match self {
            Self::SortedRange(w) => w.init_size(),
            Self::Pq(w) => w.init_size(),
        }
    }
}
