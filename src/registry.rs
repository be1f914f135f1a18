//! Per-resource conflict tracking.
//!
//! A registry maps a resource handle to the set of in-flight contexts
//! declaring interest in it. Both registries are scoped to a single run and
//! synchronize per handle only: declares on different handles never block
//! each other, declares on the same handle serialize through the map's entry
//! guard.

use crate::{
    config::SharerKind,
    task::{Intent, ResourceId},
    types::{CtxIdx, FxDashMap},
};
use core::sync::atomic::{AtomicU64, Ordering};

/// Sharer lists for one resource handle in dependency-graph mode.
///
/// Used only to derive edges; never retained after edge construction.
#[derive(Debug)]
pub(crate) enum SharerEntry {
    Simple(Vec<CtxIdx>),
    ReadWrite {
        readers: Vec<CtxIdx>,
        writers: Vec<CtxIdx>,
    },
}

impl SharerEntry {
    fn new(kind: SharerKind) -> Self {
        match kind {
            SharerKind::Simple => Self::Simple(Vec::new()),
            SharerKind::ReadWrite => Self::ReadWrite {
                readers: Vec::new(),
                writers: Vec::new(),
            },
        }
    }

    fn add(&mut self, ctx: CtxIdx, intent: Intent) {
        match self {
            Self::Simple(sharers) => sharers.push(ctx),
            Self::ReadWrite { readers, writers } => match intent {
                Intent::Read => readers.push(ctx),
                Intent::Write => writers.push(ctx),
            },
        }
    }

    /// Visits every pair of sharers that must be ordered relative to each
    /// other: all pairs in `Simple` mode, writer-writer and writer-reader
    /// pairs in `ReadWrite` mode. Readers never conflict with readers.
    pub(crate) fn for_each_conflicting_pair(&self, mut f: impl FnMut(CtxIdx, CtxIdx)) {
        match self {
            Self::Simple(sharers) => {
                for (i, &a) in sharers.iter().enumerate() {
                    for &b in &sharers[i + 1..] {
                        f(a, b);
                    }
                }
            }
            Self::ReadWrite { readers, writers } => {
                for (i, &w) in writers.iter().enumerate() {
                    for &v in &writers[i + 1..] {
                        f(w, v);
                    }
                    for &r in readers {
                        f(w, r);
                    }
                }
            }
        }
    }
}

/// Registry used by the dependency-graph executor.
///
/// `declare` only records interest; no conflict is signaled at declare time.
#[derive(Debug)]
pub(crate) struct SharerRegistry {
    kind: SharerKind,
    map: FxDashMap<ResourceId, SharerEntry>,
}

impl SharerRegistry {
    pub(crate) fn new(kind: SharerKind) -> Self {
        Self {
            kind,
            map: FxDashMap::default(),
        }
    }

    pub(crate) fn declare(&self, resource: ResourceId, ctx: CtxIdx, intent: Intent) {
        self.map
            .entry(resource)
            .or_insert_with(|| SharerEntry::new(self.kind))
            .add(ctx, intent);
    }

    /// Consumes the registry, yielding the per-handle sharer lists for edge
    /// construction.
    pub(crate) fn into_entries(self) -> Vec<SharerEntry> {
        self.map.into_iter().map(|(_, entry)| entry).collect()
    }
}

#[derive(Debug, Default)]
struct HolderSlot {
    holder: Option<CtxIdx>,
    contested: bool,
}

/// Outcome of a holder-slot acquisition attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Acquire {
    /// The slot was free, already ours, or stolen from a lower-priority
    /// holder; the caller now holds the resource.
    Won { stole_from: Option<CtxIdx> },
    /// A higher-or-equal-priority context holds the slot; the caller must
    /// abort.
    Lost,
}

/// Registry used by the speculative executor.
///
/// Invariant: a handle never has more than one holder at a time; acquiring a
/// held handle is the sole conflict signal. Conflicts resolve immediately in
/// favor of the comparator-smaller context (ties keep the current holder), so
/// workers never block waiting for a resource.
#[derive(Debug)]
pub(crate) struct HolderRegistry {
    map: FxDashMap<ResourceId, HolderSlot>,
    conflicts: AtomicU64,
}

impl HolderRegistry {
    pub(crate) fn new() -> Self {
        Self {
            map: FxDashMap::default(),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Check-and-set acquisition of `resource` for context `me`.
    ///
    /// `precedes(a, b)` must report whether context `a`'s task strictly
    /// precedes context `b`'s. The winner of a contested slot is decided
    /// under the per-handle entry guard, so concurrent acquires of the same
    /// handle serialize while unrelated handles proceed in parallel.
    pub(crate) fn acquire(
        &self,
        resource: ResourceId,
        me: CtxIdx,
        precedes: impl Fn(CtxIdx, CtxIdx) -> bool,
    ) -> Acquire {
        let mut slot = self.map.entry(resource).or_default();
        match slot.holder {
            None => {
                slot.holder = Some(me);
                Acquire::Won { stole_from: None }
            }
            Some(cur) if cur == me => Acquire::Won { stole_from: None },
            Some(cur) => {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
                slot.contested = true;
                if precedes(me, cur) {
                    // The holder should run after us: take the slot and let
                    // the caller mark the previous holder aborted.
                    slot.holder = Some(me);
                    Acquire::Won {
                        stole_from: Some(cur),
                    }
                } else {
                    Acquire::Lost
                }
            }
        }
    }

    /// Releases `resource` if `me` still holds it. Slots stolen by a
    /// higher-priority context are left untouched.
    pub(crate) fn release(&self, resource: ResourceId, me: CtxIdx) {
        if let Some(mut slot) = self.map.get_mut(&resource) {
            if slot.holder == Some(me) {
                slot.holder = None;
            }
        }
    }

    /// Total number of conflicting acquisitions observed so far.
    pub(crate) fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Number of handles that saw at least one contested acquisition.
    pub(crate) fn contested_handles(&self) -> usize {
        self.map.iter().filter(|slot| slot.contested).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Priority = context index: lower index strictly precedes.
    fn by_index(a: CtxIdx, b: CtxIdx) -> bool {
        a < b
    }

    #[test]
    fn free_slot_is_taken() {
        let reg = HolderRegistry::new();
        let r = ResourceId(7);
        assert_eq!(reg.acquire(r, 3, by_index), Acquire::Won { stole_from: None });
        assert_eq!(reg.conflicts(), 0);
    }

    #[test]
    fn reacquire_is_idempotent() {
        let reg = HolderRegistry::new();
        let r = ResourceId(7);
        reg.acquire(r, 3, by_index);
        assert_eq!(reg.acquire(r, 3, by_index), Acquire::Won { stole_from: None });
        assert_eq!(reg.conflicts(), 0);
    }

    #[test]
    fn smaller_steals_larger_loses() {
        let reg = HolderRegistry::new();
        let r = ResourceId(7);
        reg.acquire(r, 5, by_index);
        assert_eq!(reg.acquire(r, 2, by_index), Acquire::Won { stole_from: Some(5) });
        assert_eq!(reg.acquire(r, 9, by_index), Acquire::Lost);
        assert_eq!(reg.conflicts(), 2);
    }

    #[test]
    fn release_skips_stolen_slots() {
        let reg = HolderRegistry::new();
        let r = ResourceId(7);
        reg.acquire(r, 5, by_index);
        reg.acquire(r, 2, by_index);
        // Context 5 lost the slot; its release must not free it for others.
        reg.release(r, 5);
        assert_eq!(reg.acquire(r, 9, by_index), Acquire::Lost);
        // The current holder's release does free it.
        reg.release(r, 2);
        assert_eq!(reg.acquire(r, 9, by_index), Acquire::Won { stole_from: None });
    }

    #[test]
    fn ties_keep_the_current_holder() {
        let reg = HolderRegistry::new();
        let r = ResourceId(1);
        let tie = |_: CtxIdx, _: CtxIdx| false;
        reg.acquire(r, 4, tie);
        assert_eq!(reg.acquire(r, 8, tie), Acquire::Lost);
    }

    #[test]
    fn sharer_entry_pairs_readers_never_conflict() {
        let mut entry = SharerEntry::new(SharerKind::ReadWrite);
        entry.add(0, Intent::Write);
        entry.add(1, Intent::Read);
        entry.add(2, Intent::Read);
        entry.add(3, Intent::Write);
        let mut pairs = Vec::new();
        entry.for_each_conflicting_pair(|a, b| pairs.push((a, b)));
        // writer-writer: (0,3); writer-reader: (0,1), (0,2), (3,1), (3,2).
        assert_eq!(pairs.len(), 5);
        assert!(!pairs.contains(&(1, 2)) && !pairs.contains(&(2, 1)));
    }
}
