//! Timer tree arena: node lifecycle, measurement, and meta annotation
//!
//! All nodes of a trace live in a [`TimerTree`] and are addressed by opaque
//! [`TimerId`] handles. The tree owns its nodes exclusively; the only
//! child-to-parent link is a non-owning parent index used to resolve the root
//! for [meta propagation](TimerTree::add_meta_main).
//!
//! A tree assumes a single logical execution context: operations are not
//! internally serialized against each other. The wrapping measurement
//! operations ([`measure_sync`](TimerTree::measure_sync) and friends) hold
//! the tree's exclusive borrow for the full measured interval, so
//! measurements made through them are one at a time. For sibling timers with
//! overlapping in-flight operations, claim each with
//! [`begin_measure`](TimerTree::begin_measure): the returned
//! [`PendingMeasure`] carries the one-shot claim and a clock handle, the
//! operation settles without touching the tree, and
//! [`record`](TimerTree::record) needs only a brief exclusive borrow after
//! the fact. Each node still completes independently with its own
//! settlement-time reading.

use core::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::clock::{Clock, MonotonicClock};
use crate::error::{MeasureError, TimerError};

/// Arbitrary contextual data attached to a timer
///
/// Keys are unique; merging is key-wise overwrite, so a later value for an
/// existing key replaces the earlier one.
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// Opaque handle to a node inside a [`TimerTree`]
///
/// Handles are only meaningful for the tree that issued them; using a handle
/// against a different tree is a caller error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) usize);

/// A single measured interval inside the tree
#[derive(Debug, Clone)]
pub(crate) struct TimerNode {
    pub(crate) name: String,
    pub(crate) start: u64,
    pub(crate) end: Option<u64>,
    pub(crate) error: Option<String>,
    pub(crate) meta: Option<Meta>,
    pub(crate) blocking: bool,
    pub(crate) children: Vec<TimerId>,
    pub(crate) parent: Option<TimerId>,
}

impl TimerNode {
    /// Elapsed milliseconds, absent until the node completes
    pub(crate) fn spent(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start))
    }
}

/// Arena owning one or more timer trees
///
/// Nodes are created detached via [`timer`](TimerTree::timer) and wired into
/// a tree with [`attach_child`](TimerTree::attach_child). A node that is
/// never attached is its own root. Children are append-only and nodes are
/// never removed; the whole arena is released when the tree is dropped.
///
/// # Example
///
/// ```rust
/// use trace_timer::TimerTree;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut tree = TimerTree::new();
/// let root = tree.timer("request")?;
/// let db = tree.timer("db-query")?;
/// tree.attach_child(root, db, true);
/// tree.finish(db)?;
/// tree.finish(root)?;
/// # Ok(())
/// # }
/// ```
pub struct TimerTree {
    nodes: Vec<TimerNode>,
    clock: Arc<dyn Clock>,
}

impl TimerTree {
    /// Create an empty tree using the platform monotonic clock
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }

    /// Create an empty tree with an injected clock
    ///
    /// Use this for deterministic tests or to share a clock between trees.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            nodes: Vec::new(),
            clock: Arc::new(clock),
        }
    }

    /// Create a detached timer named `name`, started now
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::InvalidName`] if `name` is empty.
    pub fn timer(&mut self, name: impl Into<String>) -> Result<TimerId, TimerError> {
        self.timer_with(name, None, false)
    }

    /// Create a detached timer with initial meta and a blocking annotation
    ///
    /// The blocking flag is purely descriptive and never affects timing or
    /// control flow.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::InvalidName`] if `name` is empty.
    pub fn timer_with(
        &mut self,
        name: impl Into<String>,
        meta: Option<Meta>,
        blocking: bool,
    ) -> Result<TimerId, TimerError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TimerError::InvalidName);
        }
        let start = self.clock.now_millis();
        let id = TimerId(self.nodes.len());
        tracing::trace!(name = %name, start, "timer created");
        self.nodes.push(TimerNode {
            name,
            start,
            end: None,
            error: None,
            meta,
            blocking,
            children: Vec::new(),
            parent: None,
        });
        Ok(id)
    }

    /// Attach `child` under `parent`
    ///
    /// Appends the child to the parent's children, overwrites the child's
    /// blocking annotation with `blocking`, and wires the child's parent link
    /// so meta propagation reaches the parent's root. Returns the child.
    ///
    /// A child belongs to one parent; attaching the same node twice is a
    /// caller error and is not guarded against.
    pub fn attach_child(&mut self, parent: TimerId, child: TimerId, blocking: bool) -> TimerId {
        {
            let node = &mut self.nodes[child.0];
            node.blocking = blocking;
            node.parent = Some(parent);
        }
        self.nodes[parent.0].children.push(child);
        tracing::trace!(
            parent_name = %self.nodes[parent.0].name,
            child_name = %self.nodes[child.0].name,
            blocking,
            "timer attached"
        );
        child
    }

    /// Measure a synchronous call
    ///
    /// Invokes `f`, captures the `Display` rendering of an `Err` into the
    /// node's error field, and sets `end` from the clock exactly once on
    /// every exit path. The operation's own error passes through unchanged as
    /// [`MeasureError::Operation`].
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::AlreadyCompleted`] (without running `f`) if the
    /// node has already completed. A timer is consumed exactly once.
    pub fn measure_sync<T, E, F>(&mut self, id: TimerId, f: F) -> Result<T, MeasureError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        self.check_open(id)?;
        let result = f();
        self.settle(id, result)
    }

    /// Measure an asynchronous call
    ///
    /// Same contract as [`measure_sync`](TimerTree::measure_sync), but the
    /// future produced by `f` is awaited. Awaiting suspends only the calling
    /// task, not unrelated work on the same runtime. The tree stays
    /// exclusively borrowed across the await, so measurements made this way
    /// are one at a time; for overlapping sibling measurements use
    /// [`begin_measure`](TimerTree::begin_measure). The one-shot guard runs
    /// before `f` is invoked.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::AlreadyCompleted`] if the node has already
    /// completed, or the operation's own error via
    /// [`MeasureError::Operation`].
    pub async fn measure_async<T, E, F, Fut>(
        &mut self,
        id: TimerId,
        f: F,
    ) -> Result<T, MeasureError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.check_open(id)?;
        let result = f().await;
        self.settle(id, result)
    }

    /// Measure an already-started pending operation
    ///
    /// Same contract as [`measure_async`](TimerTree::measure_async) but takes
    /// a future the caller constructed (and possibly polled) before the
    /// timer existed. Cancellation or rejection of the pending operation
    /// surfaces as the captured error; the node still completes.
    ///
    /// Awaiting several pre-started operations through this method runs them
    /// back to back, and each timer's `end` then includes the waits that came
    /// before it. To let them overlap, claim each with
    /// [`begin_measure`](TimerTree::begin_measure), join the settled
    /// outcomes, and [`record`](TimerTree::record) them.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::AlreadyCompleted`] if the node has already
    /// completed, or the operation's own error via
    /// [`MeasureError::Operation`].
    pub async fn measure_pending<T, E, Fut>(
        &mut self,
        id: TimerId,
        pending: Fut,
    ) -> Result<T, MeasureError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.check_open(id)?;
        let result = pending.await;
        self.settle(id, result)
    }

    /// Explicitly complete a timer without wrapping an operation
    ///
    /// Escape hatch for callers who cannot structure their work as a single
    /// wrapped call. Unlike the measure operations it cannot capture an error
    /// automatically, so prefer those where possible.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::AlreadyCompleted`] if the node has already
    /// completed.
    pub fn finish(&mut self, id: TimerId) -> Result<(), TimerError> {
        self.check_open(id)?;
        self.complete(id, None);
        Ok(())
    }

    /// Claim a timer for a measurement that overlaps others on this tree
    ///
    /// The returned [`PendingMeasure`] holds the one-shot claim and a handle
    /// to the tree's clock, and is independent of the tree borrow: several
    /// claims can be in flight at once, each settling its own operation
    /// concurrently. Settle the claim with
    /// [`PendingMeasure::settle`], then apply the outcome with
    /// [`record`](TimerTree::record).
    ///
    /// Claiming the same timer twice is a caller error; the first recorded
    /// outcome wins and the second fails the one-shot guard.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::AlreadyCompleted`] if the node has already
    /// completed.
    pub fn begin_measure(&self, id: TimerId) -> Result<PendingMeasure, TimerError> {
        self.check_open(id)?;
        Ok(PendingMeasure {
            id,
            clock: Arc::clone(&self.clock),
        })
    }

    /// Apply a settled outcome to its node
    ///
    /// Writes the settlement-time `end` reading and any captured error, then
    /// returns the operation's result with the same pass-through semantics as
    /// [`measure_sync`](TimerTree::measure_sync). The `end` was read when the
    /// operation settled, so recording late never inflates `spent`.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::AlreadyCompleted`] if the node completed after
    /// the claim was taken (the earlier completion is preserved), or the
    /// operation's own error via [`MeasureError::Operation`].
    pub fn record<T, E>(&mut self, outcome: MeasureOutcome<T, E>) -> Result<T, MeasureError<E>> {
        self.check_open(outcome.id)?;
        self.write_completion(outcome.id, outcome.end, outcome.error);
        outcome.result.map_err(MeasureError::Operation)
    }

    /// Merge `partial` into this node's meta, key-wise overwrite
    ///
    /// If the node has no meta yet, `partial` becomes its meta. Allowed after
    /// completion. Returns the resulting merged mapping.
    pub fn add_meta(&mut self, id: TimerId, partial: Meta) -> &Meta {
        let node = &mut self.nodes[id.0];
        let meta = node.meta.get_or_insert_with(Meta::new);
        for (key, value) in partial {
            meta.insert(key, value);
        }
        &*meta
    }

    /// Merge `partial` into the meta of this node's root
    ///
    /// Resolves the root by following parent links, then merges there. Lets a
    /// deeply nested sub-operation tag the overall trace without every
    /// intermediate layer forwarding the call. For a root node this is
    /// [`add_meta`](TimerTree::add_meta). Only the root's meta is mutated,
    /// regardless of depth.
    pub fn add_meta_main(&mut self, id: TimerId, partial: Meta) -> &Meta {
        let root = self.root_of(id);
        self.add_meta(root, partial)
    }

    /// The topmost ancestor of `id` (itself, if never attached)
    pub fn root_of(&self, id: TimerId) -> TimerId {
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            current = parent;
        }
        current
    }

    /// Timer name
    pub fn name(&self, id: TimerId) -> &str {
        &self.nodes[id.0].name
    }

    /// Start reading in milliseconds
    pub fn start(&self, id: TimerId) -> u64 {
        self.nodes[id.0].start
    }

    /// End reading in milliseconds, absent until completed
    pub fn end(&self, id: TimerId) -> Option<u64> {
        self.nodes[id.0].end
    }

    /// Elapsed milliseconds (`end - start`), absent until completed
    pub fn spent(&self, id: TimerId) -> Option<u64> {
        self.nodes[id.0].spent()
    }

    /// Captured failure message, if the measured operation failed
    pub fn error(&self, id: TimerId) -> Option<&str> {
        self.nodes[id.0].error.as_deref()
    }

    /// Blocking annotation
    pub fn blocking(&self, id: TimerId) -> bool {
        self.nodes[id.0].blocking
    }

    /// Meta mapping, if any has been attached
    pub fn meta(&self, id: TimerId) -> Option<&Meta> {
        self.nodes[id.0].meta.as_ref()
    }

    /// Attached children, in insertion order
    pub fn children(&self, id: TimerId) -> &[TimerId] {
        &self.nodes[id.0].children
    }

    /// Parent link, absent for a root
    pub fn parent(&self, id: TimerId) -> Option<TimerId> {
        self.nodes[id.0].parent
    }

    /// Whether the node's measured interval has finished
    pub fn is_completed(&self, id: TimerId) -> bool {
        self.nodes[id.0].end.is_some()
    }

    /// Number of nodes in the arena, across all trees it holds
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: TimerId) -> &TimerNode {
        &self.nodes[id.0]
    }

    /// One-shot completion guard shared by every completion operation
    fn check_open(&self, id: TimerId) -> Result<(), TimerError> {
        let node = &self.nodes[id.0];
        if node.end.is_some() {
            return Err(TimerError::already_completed(&node.name));
        }
        Ok(())
    }

    /// Record the outcome of a wrapped operation and complete the node
    fn settle<T, E>(&mut self, id: TimerId, result: Result<T, E>) -> Result<T, MeasureError<E>>
    where
        E: fmt::Display,
    {
        let error = result.as_ref().err().map(|e| e.to_string());
        self.complete(id, error);
        result.map_err(MeasureError::Operation)
    }

    /// Set `end` from the clock; callers must have checked the guard
    fn complete(&mut self, id: TimerId, error: Option<String>) {
        let end = self.clock.now_millis();
        self.write_completion(id, end, error);
    }

    /// Store a completion reading; callers must have checked the guard
    fn write_completion(&mut self, id: TimerId, end: u64, error: Option<String>) {
        let node = &mut self.nodes[id.0];
        node.end = Some(end);
        node.error = error;
        tracing::debug!(
            name = %node.name,
            spent_ms = end.saturating_sub(node.start),
            failed = node.error.is_some(),
            "timer completed"
        );
    }
}

/// One-shot claim on a timer, detached from the tree borrow
///
/// Created by [`TimerTree::begin_measure`]. Holds the claimed [`TimerId`] and
/// a handle to the tree's clock, so the wrapped operation can run and settle
/// while other claims on the same tree are in flight.
pub struct PendingMeasure {
    id: TimerId,
    clock: Arc<dyn Clock>,
}

impl PendingMeasure {
    /// The timer this claim will complete
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Await the operation and capture its outcome
    ///
    /// Reads the clock the moment the operation settles, so the `end`
    /// recorded later reflects when the work actually finished, not when the
    /// tree borrow became available. An `Err` is captured the same way as in
    /// [`TimerTree::measure_sync`].
    pub async fn settle<T, E, Fut>(self, pending: Fut) -> MeasureOutcome<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let result = pending.await;
        MeasureOutcome {
            id: self.id,
            end: self.clock.now_millis(),
            error: result.as_ref().err().map(|e| e.to_string()),
            result,
        }
    }
}

impl fmt::Debug for PendingMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingMeasure")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Settled outcome of a claimed measurement, ready to record
///
/// Produced by [`PendingMeasure::settle`]; apply it with
/// [`TimerTree::record`].
#[derive(Debug)]
pub struct MeasureOutcome<T, E> {
    id: TimerId,
    end: u64,
    error: Option<String>,
    result: Result<T, E>,
}

impl<T, E> MeasureOutcome<T, E> {
    /// The timer this outcome completes
    pub fn id(&self) -> TimerId {
        self.id
    }
}

impl Default for TimerTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerTree")
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn meta(json: serde_json::Value) -> Meta {
        json.as_object().cloned().unwrap_or_default()
    }

    fn tree_at(millis: u64) -> (TimerTree, ManualClock) {
        let clock = ManualClock::new(millis);
        (TimerTree::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_construction_defaults() {
        let (mut tree, _clock) = tree_at(100);
        let id = tree.timer("someName").unwrap();

        assert_eq!(tree.name(id), "someName");
        assert_eq!(tree.start(id), 100);
        assert_eq!(tree.end(id), None);
        assert_eq!(tree.error(id), None);
        assert!(!tree.blocking(id));
        assert!(tree.meta(id).is_none());
        assert!(tree.children(id).is_empty());
        assert_eq!(tree.parent(id), None);
    }

    #[test]
    fn test_construction_with_meta_and_blocking() {
        let (mut tree, _clock) = tree_at(100);
        let id = tree
            .timer_with("someName", Some(meta(serde_json::json!({"a": 1}))), true)
            .unwrap();

        assert!(tree.blocking(id));
        assert_eq!(tree.meta(id), Some(&meta(serde_json::json!({"a": 1}))));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut tree = TimerTree::new();
        assert_eq!(tree.timer(""), Err(TimerError::InvalidName));
        assert_eq!(
            tree.timer_with("", None, true),
            Err(TimerError::InvalidName)
        );
    }

    #[test]
    fn test_measure_sync_success() {
        let (mut tree, clock) = tree_at(100);
        let id = tree.timer("someName").unwrap();

        let res = tree.measure_sync(id, || {
            clock.advance(100);
            Ok::<_, std::convert::Infallible>(1)
        });

        assert_eq!(res.unwrap(), 1);
        assert_eq!(tree.start(id), 100);
        assert_eq!(tree.end(id), Some(200));
        assert_eq!(tree.spent(id), Some(100));
        assert_eq!(tree.error(id), None);
    }

    #[test]
    fn test_measure_sync_error_capture_and_passthrough() {
        let (mut tree, clock) = tree_at(100);
        let id = tree.timer("someName").unwrap();

        let res: Result<i32, _> = tree.measure_sync(id, || {
            clock.advance(100);
            Err("test".to_string())
        });

        // original error passes through unchanged, end is still set
        assert_eq!(res.unwrap_err().into_operation(), Some("test".to_string()));
        assert_eq!(tree.end(id), Some(200));
        assert_eq!(tree.error(id), Some("test"));
    }

    #[test]
    fn test_one_shot_completion() {
        let (mut tree, clock) = tree_at(100);
        let id = tree.timer("someName").unwrap();

        clock.advance(50);
        tree.finish(id).unwrap();
        assert_eq!(tree.end(id), Some(150));

        clock.advance(50);
        assert_eq!(
            tree.finish(id),
            Err(TimerError::already_completed("someName"))
        );
        // first end preserved
        assert_eq!(tree.end(id), Some(150));

        let res = tree.measure_sync(id, || Ok::<_, std::convert::Infallible>(()));
        assert!(matches!(
            res.unwrap_err(),
            MeasureError::Timer(TimerError::AlreadyCompleted(_))
        ));
    }

    #[test]
    fn test_guard_rejects_before_running_operation() {
        let (mut tree, _clock) = tree_at(0);
        let id = tree.timer("someName").unwrap();
        tree.finish(id).unwrap();

        let mut ran = false;
        let res = tree.measure_sync(id, || {
            ran = true;
            Ok::<_, std::convert::Infallible>(())
        });
        assert!(res.is_err());
        assert!(!ran);
    }

    #[test]
    fn test_add_meta_merge_and_overwrite() {
        let mut tree = TimerTree::new();
        let id = tree.timer("someName").unwrap();

        tree.add_meta(id, meta(serde_json::json!({"a": 1})));
        tree.add_meta(id, meta(serde_json::json!({"b": 2})));
        assert_eq!(
            tree.meta(id),
            Some(&meta(serde_json::json!({"a": 1, "b": 2})))
        );

        let merged = tree.add_meta(id, meta(serde_json::json!({"a": 2})));
        assert_eq!(merged, &meta(serde_json::json!({"a": 2, "b": 2})));
    }

    #[test]
    fn test_add_meta_after_completion() {
        let mut tree = TimerTree::new();
        let id = tree.timer("someName").unwrap();
        tree.finish(id).unwrap();

        tree.add_meta(id, meta(serde_json::json!({"late": true})));
        assert_eq!(tree.meta(id), Some(&meta(serde_json::json!({"late": true}))));
    }

    #[test]
    fn test_attach_child_wires_links() {
        let mut tree = TimerTree::new();
        let root = tree.timer("root").unwrap();
        let child = tree.timer("child").unwrap();

        let returned = tree.attach_child(root, child, true);
        assert_eq!(returned, child);
        assert_eq!(tree.children(root), &[child]);
        assert_eq!(tree.parent(child), Some(root));
        assert!(tree.blocking(child));
    }

    #[test]
    fn test_add_meta_main_mutates_only_root() {
        let mut tree = TimerTree::new();
        let root = tree.timer("root").unwrap();
        let mid = tree.timer("mid").unwrap();
        let leaf = tree.timer("leaf").unwrap();
        tree.attach_child(root, mid, false);
        tree.attach_child(mid, leaf, false);

        tree.add_meta_main(leaf, meta(serde_json::json!({"tag": "rare-path"})));

        assert_eq!(
            tree.meta(root),
            Some(&meta(serde_json::json!({"tag": "rare-path"})))
        );
        assert!(tree.meta(mid).is_none());
        assert!(tree.meta(leaf).is_none());
    }

    #[test]
    fn test_add_meta_main_on_root_is_add_meta() {
        let mut tree = TimerTree::new();
        let root = tree.timer("root").unwrap();

        tree.add_meta_main(root, meta(serde_json::json!({"a": 1})));
        assert_eq!(tree.meta(root), Some(&meta(serde_json::json!({"a": 1}))));
    }

    #[test]
    fn test_root_of_walks_to_top() {
        let mut tree = TimerTree::new();
        let a = tree.timer("a").unwrap();
        let b = tree.timer("b").unwrap();
        let c = tree.timer("c").unwrap();
        tree.attach_child(a, b, false);
        tree.attach_child(b, c, false);

        assert_eq!(tree.root_of(c), a);
        assert_eq!(tree.root_of(a), a);
    }

    #[test]
    fn test_begin_measure_guard_rejects_completed_timer() {
        let (mut tree, _clock) = tree_at(0);
        let id = tree.timer("someName").unwrap();
        tree.finish(id).unwrap();

        assert_eq!(
            tree.begin_measure(id).unwrap_err(),
            TimerError::already_completed("someName")
        );
    }

    #[test]
    fn test_spent_equals_end_minus_start() {
        let (mut tree, clock) = tree_at(1000);
        let id = tree.timer("x").unwrap();
        clock.advance(123);
        tree.finish(id).unwrap();

        assert_eq!(tree.spent(id), Some(tree.end(id).unwrap() - tree.start(id)));
    }
}
