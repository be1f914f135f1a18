use indexmap::IndexSet as _IndexSet;
use rustc_hash::FxBuildHasher;

/// Index of an execution context inside its arena.
///
/// Compact `u32` bounds the number of in-flight contexts and keeps adjacency
/// lists small.
pub(crate) type CtxIdx = u32;

pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
/// Concurrent hash map with per-shard locking and a fast hasher; the only
/// cross-thread-mutable structure besides the executors' coordination
/// counters.
pub(crate) type FxDashMap<K, V> = dashmap::DashMap<K, V, FxBuildHasher>;
