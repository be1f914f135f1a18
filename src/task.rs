use derive_more::{Display, From};

/// Opaque identity of a piece of shared state a task may touch.
///
/// Callers map whatever addresses, keys, or node ids their application uses
/// onto this handle space; the executor only compares handles for equality.
#[derive(Debug, Display, From, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ResourceId(pub u64);

/// Declared access intent for a resource handle.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Intent {
    /// The task only observes the resource. Readers never conflict with each
    /// other in dependency-graph mode.
    Read,
    /// The task mutates the resource.
    Write,
}

/// Handle passed to the neighborhood callback while a task declares the
/// resources it will touch.
///
/// Declarations are buffered here and acted on by the executor after the
/// callback returns: the dependency-graph executor records sharers, the
/// speculative executor acquires holder slots in declaration order.
#[derive(Debug, Default)]
pub struct DeclareCtx {
    pub(crate) decls: Vec<(ResourceId, Intent)>,
}

impl DeclareCtx {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Declares interest in `resource` with the given `intent`.
    ///
    /// Declaring the same handle more than once is allowed and harmless:
    /// a task never conflicts with itself, and duplicate edges between the
    /// same pair of tasks are deduplicated in dependency-graph mode.
    pub fn declare(&mut self, resource: ResourceId, intent: Intent) {
        self.decls.push((resource, intent));
    }

    /// Shorthand for `declare(resource, Intent::Read)`.
    pub fn read(&mut self, resource: ResourceId) {
        self.declare(resource, Intent::Read);
    }

    /// Shorthand for `declare(resource, Intent::Write)`.
    pub fn write(&mut self, resource: ResourceId) {
        self.declare(resource, Intent::Write);
    }
}

/// Handle passed to the operator while a task executes.
///
/// In speculative mode the operator may [`push`](Self::push) new tasks; they
/// are routed against the not-yet-revealed window minimum once the context
/// commits. The dependency-graph executor forbids pushes.
#[derive(Debug)]
pub struct ExecCtx<T> {
    pub(crate) pushes: Vec<T>,
    pushable: bool,
}

impl<T> ExecCtx<T> {
    pub(crate) fn new(pushable: bool) -> Self {
        Self {
            pushes: Vec::new(),
            pushable,
        }
    }

    /// Submits a new task produced by this task's execution.
    ///
    /// The push takes effect only if the current context commits; an aborted
    /// context's pushes are discarded along with the rest of its run.
    ///
    /// # Panics
    /// If the active executor does not support dynamic tasks (the
    /// dependency-graph executor never does).
    pub fn push(&mut self, task: T) {
        assert!(
            self.pushable,
            "dynamic task push is not supported by this executor"
        );
        self.pushes.push(task);
    }
}
