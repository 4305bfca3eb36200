//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds
//! and effects. It owns the dependency graph, the tracking context and the
//! pending-work queue, and it schedules updates when signals change.
//!
//! # How It Works
//!
//! 1. A read of a signal-like node inside an evaluation records the node in
//!    the evaluating subscriber's frame. When the evaluation returns, the
//!    recorded set replaces the subscriber's previous sources; edges that
//!    disappeared are removed, which may idle a lazy computed.
//!
//! 2. An accepted write marks the signal's subscribers dirty and queues them
//!    by level, then asks the executor, if the runtime has one, for a
//!    deferred flush. A batch, flush or evaluation in progress requests it
//!    on exit instead.
//!
//! 3. A flush drains the queue lowest level first, terminal effects last.
//!    A computed whose value changed queues its own subscribers, which land
//!    in higher buckets of the same flush. Each subscriber runs at most once
//!    per round, so a diamond `A -> {B, C} -> D` runs `D` once, after both
//!    `B` and `C`.
//!
//! 4. A read while work is pending first brings dirty upstream computeds up
//!    to date, so reads never observe a half-propagated graph.
//!
//! # Deep graphs
//!
//! Activating a lazy computed evaluates its function, which may activate the
//! computeds it reads, recursively. Past `max_eval_depth` nested evaluations
//! the request is moved to an explicit worklist instead: the deep
//! evaluation unwinds to the activation driver, the requested node is
//! evaluated from a shallow stack, and the interrupted evaluation is retried
//! once its input has a value. Edges are only committed when an evaluation
//! returns, so an interrupted attempt leaves nothing behind.
//!
//! # Threading
//!
//! The runtime is single-threaded (`Rc`/`RefCell`). Independent runtimes on
//! one thread share nothing.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use super::computed::{Computed, ComputedOptions};
use super::context::{ReactiveContext, Tracker, Untracked};
use super::effect::Effect;
use super::event::Event;
use super::executor::{Executor, FlushTask};
use super::signal::{Signal, Trigger};
use super::subscriber::{Disposer, Observable};
use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::graph::{Graph, GraphStats, Node, NodeId, NodeKind};

/// Behavior the runtime invokes for a node without knowing its value type.
pub(crate) trait Reactive {
    /// Re-run the node. Returns whether its observable value changed.
    fn run(&self, rt: &RuntimeInner, id: NodeId) -> Result<bool>;

    /// Drop cached state after the node was torn down. Effects run their
    /// cleanup here.
    fn release(&self, id: NodeId);
}

/// Unwind payload moving a deep activation onto the worklist.
struct Suspend;

/// State of the activation driver while one is running.
struct Driver {
    base_depth: usize,
    suspended: Option<NodeId>,
    /// Nodes the driver evaluated itself. They have no subscriber until the
    /// interrupted evaluation is retried, so they are exempt from teardown.
    pinned: Vec<NodeId>,
}

/// How a computed read should obtain its value.
pub(crate) enum ReadMode {
    /// The node has a fresh cached value.
    Cached,
    /// The node was activated for this read only; release it afterwards.
    Transient,
    /// The node was disposed; evaluate without the graph.
    Detached,
}

pub(crate) struct RuntimeInner {
    this: Weak<RuntimeInner>,
    graph: RefCell<Graph>,
    tracker: Tracker,
    config: RuntimeConfig,
    /// Host deferral for writes made outside any batch. Without one,
    /// pending work waits for `sync` or the end of a batch.
    executor: Option<Box<dyn Executor>>,
    batch_depth: Cell<usize>,
    flushing: Cell<bool>,
    flush_requested: Cell<bool>,
    driver: RefCell<Option<Driver>>,
    /// Number of enclosing scopes that turn a raised error back into `Err`.
    catchers: Cell<usize>,
}

impl RuntimeInner {
    pub fn weak(&self) -> Weak<RuntimeInner> {
        self.this.clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Insert a node owned by whatever is evaluating right now.
    pub fn create_node(
        &self,
        kind: NodeKind,
        lazy: bool,
        behavior: Option<Rc<dyn Reactive>>,
    ) -> NodeId {
        self.create_child(self.tracker.owner(), kind, lazy, behavior)
    }

    pub fn create_child(
        &self,
        owner: Option<NodeId>,
        kind: NodeKind,
        lazy: bool,
        behavior: Option<Rc<dyn Reactive>>,
    ) -> NodeId {
        let mut node = Node::new(kind, behavior);
        node.lazy = lazy;
        node.owner = owner;
        let id = self.graph.borrow_mut().insert(node);
        tracing::trace!(node = %id, ?kind, "created node");
        id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.borrow().contains(id)
    }

    pub fn is_active(&self, id: NodeId) -> bool {
        self.graph.borrow().node(id).is_some_and(Node::is_active)
    }

    pub fn level(&self, id: NodeId) -> Option<u32> {
        self.graph.borrow().node(id).map(Node::level)
    }

    pub fn subscriber_count(&self, id: NodeId) -> usize {
        self.graph
            .borrow()
            .node(id)
            .map_or(0, |node| node.subscribers().len())
    }

    pub fn source_count(&self, id: NodeId) -> usize {
        self.graph
            .borrow()
            .node(id)
            .map_or(0, |node| node.sources().len())
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Record a read of `id` in the current tracking frame.
    pub fn observe(&self, id: NodeId) {
        self.tracker.observe(id);
    }

    /// Node that owns anything created right now.
    pub fn owner(&self) -> Option<NodeId> {
        self.tracker.owner()
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_tracking()
    }

    /// Run `f` with tracking disabled.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _untracked = Untracked::enter(&self.tracker);
        f()
    }

    /// Run `f` as the evaluation of `id`, then replace `id`'s sources with
    /// what `f` read.
    ///
    /// Children created by the previous evaluation are disposed first. If
    /// `f` unwinds, the previous edge set stays in place and everything the
    /// attempt created or activated is torn down again.
    pub fn track<R>(&self, id: NodeId, f: impl FnOnce() -> R) -> Result<R> {
        let prepared = {
            let mut graph = self.graph.borrow_mut();
            match graph.node_mut(id) {
                None => None,
                Some(node) if node.computing => return Err(ReactiveError::Cycle { node: id }),
                Some(node) => {
                    node.computing = true;
                    Some((
                        std::mem::take(&mut node.children),
                        node.kind == NodeKind::Computed,
                    ))
                }
            }
        };
        let Some((previous_children, counts_depth)) = prepared else {
            return Ok(self.untracked(f));
        };
        for child in previous_children {
            self.teardown(child, true);
        }

        let evaluation = Evaluation {
            rt: self,
            id,
            context: Some(ReactiveContext::enter(&self.tracker, id, counts_depth)),
        };
        let value = f();
        let observed = evaluation.commit();
        self.commit(id, observed);

        if self.tracker.is_idle() {
            self.request_flush();
        }
        Ok(value)
    }

    fn commit(&self, id: NodeId, observed: IndexSet<NodeId>) {
        let removed = {
            let mut graph = self.graph.borrow_mut();
            let removed = graph.replace_sources(id, observed);
            if let Some(node) = graph.node_mut(id) {
                node.computing = false;
                node.active = true;
            }
            graph.raise_level(id);
            removed
        };
        for source in removed {
            self.release_if_unobserved(source);
        }
    }

    fn rollback(&self, id: NodeId, observed: IndexSet<NodeId>) {
        let (children, previous) = {
            let Ok(mut graph) = self.graph.try_borrow_mut() else {
                return;
            };
            let Some(node) = graph.node_mut(id) else {
                return;
            };
            node.computing = false;
            (std::mem::take(&mut node.children), node.sources().clone())
        };
        for child in children {
            self.teardown(child, true);
        }
        for source in observed.into_iter().filter(|source| !previous.contains(source)) {
            self.release_if_unobserved(source);
        }
        tracing::trace!(node = %id, "rolled back evaluation");
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Make sure computed `id` has a current value before it is read.
    pub fn prepare_read(&self, id: NodeId) -> Result<ReadMode> {
        let state = self
            .graph
            .borrow()
            .node(id)
            .map(|node| (node.active, node.computing));
        match state {
            None => Ok(ReadMode::Detached),
            Some((_, true)) => Err(ReactiveError::Cycle { node: id }),
            Some((true, false)) => {
                self.ensure_fresh(id)?;
                Ok(ReadMode::Cached)
            }
            Some((false, false)) => {
                let tracked = self.tracker.is_tracking();
                self.activate(id)?;
                Ok(if tracked {
                    ReadMode::Cached
                } else {
                    ReadMode::Transient
                })
            }
        }
    }

    /// Re-run every dirty computed upstream of `target`, sources first.
    fn ensure_fresh(&self, target: NodeId) -> Result<()> {
        if !self.graph.borrow().may_be_stale(target) {
            return Ok(());
        }
        let mut visited = HashSet::new();
        let mut stack = vec![(target, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                let clock = self.flushing.get().then(|| self.graph.borrow().clock());
                self.refresh(id, None, clock)?;
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            let graph = self.graph.borrow();
            if let Some(node) = graph.node(id) {
                stack.extend(
                    node.sources()
                        .iter()
                        .filter(|source| !visited.contains(*source))
                        .filter(|source| graph.kind(**source) == Some(NodeKind::Computed))
                        .filter(|source| graph.may_be_stale(**source))
                        .map(|source| (*source, false)),
                );
            }
        }
        Ok(())
    }

    /// Give an inactive computed its first value.
    pub fn activate(&self, root: NodeId) -> Result<()> {
        let base = self.driver.borrow().as_ref().map(|driver| driver.base_depth);
        let Some(base) = base else {
            return self.drive(root);
        };

        let depth = self.tracker.depth().saturating_sub(base);
        if depth >= self.config.max_eval_depth.max(1) {
            if let Some(driver) = self.driver.borrow_mut().as_mut() {
                driver.suspended = Some(root);
            }
            tracing::debug!(node = %root, depth, "moving activation onto worklist");
            panic::resume_unwind(Box::new(Suspend));
        }
        self.evaluate_first(root)
    }

    /// Activation driver: evaluates `root`, retrying interrupted attempts
    /// until every node on the worklist has a value.
    fn drive(&self, root: NodeId) -> Result<()> {
        *self.driver.borrow_mut() = Some(Driver {
            base_depth: self.tracker.depth(),
            suspended: None,
            pinned: Vec::new(),
        });
        let _driver = DriverGuard { rt: self, root };
        let _catching = DepthGuard::enter(&self.catchers);

        let mut worklist = vec![root];
        let mut passes = 0;
        while let Some(&current) = worklist.last() {
            let needs_value = self
                .graph
                .borrow()
                .node(current)
                .is_some_and(|node| !node.active);
            if !needs_value {
                worklist.pop();
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| self.evaluate_first(current))) {
                Ok(result) => {
                    result?;
                    worklist.pop();
                }
                Err(payload) if payload.is::<ReactiveError>() => {
                    return Err(take_error(payload));
                }
                Err(payload) if payload.is::<Suspend>() => {
                    let target = self
                        .driver
                        .borrow_mut()
                        .as_mut()
                        .and_then(|driver| driver.suspended.take());
                    let Some(target) = target else {
                        panic::resume_unwind(payload);
                    };
                    passes += 1;
                    if worklist.contains(&target) {
                        return Err(ReactiveError::Cycle { node: target });
                    }
                    if passes > self.config.max_worklist_passes {
                        return Err(ReactiveError::Diverged { node: root, passes });
                    }
                    if let Some(driver) = self.driver.borrow_mut().as_mut() {
                        driver.pinned.push(target);
                    }
                    worklist.push(target);
                }
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        if passes > 0 {
            tracing::debug!(node = %root, passes, "worklist settled");
        }
        Ok(())
    }

    fn evaluate_first(&self, id: NodeId) -> Result<()> {
        let behavior = self.graph.borrow().behavior(id);
        if let Some(behavior) = behavior {
            behavior.run(self, id)?;
        }
        Ok(())
    }

    fn is_pinned(&self, id: NodeId) -> bool {
        self.driver
            .borrow()
            .as_ref()
            .is_some_and(|driver| driver.pinned.contains(&id))
    }

    /// Run `id`'s behavior now, outside the queue.
    pub fn run_node(&self, id: NodeId) -> Result<bool> {
        let behavior = self.graph.borrow().behavior(id);
        match behavior {
            Some(behavior) => self.guarded(None, || behavior.run(self, id)),
            None => Ok(false),
        }
    }

    /// Run `f`, turning an error raised by [`fail`](Self::fail) anywhere
    /// below it back into `Err`.
    ///
    /// If a worklist suspension unwinds through `f`, `reschedule` is marked
    /// dirty again so the interrupted run is not lost.
    pub fn guarded<R>(
        &self,
        reschedule: Option<NodeId>,
        f: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        let caught = {
            let _catching = DepthGuard::enter(&self.catchers);
            panic::catch_unwind(AssertUnwindSafe(f))
        };
        match caught {
            Ok(result) => result,
            Err(payload) if payload.is::<ReactiveError>() => Err(take_error(payload)),
            Err(payload) => {
                if let Some(id) = reschedule.filter(|_| payload.is::<Suspend>()) {
                    self.graph.borrow_mut().schedule(id, false);
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Abort the current evaluation with `err`.
    ///
    /// Inside a guarded scope the error unwinds to that scope and is
    /// returned from the entry point that started the work. Otherwise
    /// it panics with the error's message.
    pub fn fail(&self, err: ReactiveError) -> ! {
        if self.catchers.get() > 0 {
            panic::resume_unwind(Box::new(err));
        }
        panic!("{err}");
    }

    // ------------------------------------------------------------------
    // Writes and scheduling
    // ------------------------------------------------------------------

    /// A readable node accepted a new value: queue its subscribers.
    pub fn signal_changed(&self, id: NodeId) {
        let scheduled = self
            .graph
            .borrow_mut()
            .schedule_subscribers(id, self.flushing.get());
        if scheduled > 0 {
            tracing::trace!(node = %id, scheduled, "scheduled subscribers");
        }
        self.request_flush();
    }

    fn request_flush(&self) {
        if self.flushing.get() || self.batch_depth.get() > 0 || !self.tracker.is_idle() {
            return;
        }
        let Some(executor) = self.executor.as_ref() else {
            return;
        };
        if self.graph.borrow().pending() == 0 || self.flush_requested.replace(true) {
            return;
        }
        executor.schedule_flush(FlushTask::new(self.weak()));
    }

    pub(crate) fn run_deferred_flush(&self) -> Result<()> {
        self.flush_requested.set(false);
        self.flush()
    }

    /// Drain all pending work.
    pub fn flush(&self) -> Result<()> {
        if self.flushing.get() {
            return Ok(());
        }
        self.flush_requested.set(false);
        if self.graph.borrow().pending() == 0 {
            return Ok(());
        }

        let _flushing = FlagGuard::raise(&self.flushing);
        let mut clock = self.graph.borrow_mut().begin_flush();
        let mut runs = 0usize;
        let mut rounds = 1usize;
        loop {
            let next = self.graph.borrow_mut().pop_queued();
            match next {
                Some((level, id)) => {
                    if self.refresh(id, Some(level), Some(clock))? {
                        runs += 1;
                    }
                }
                None => {
                    let mut graph = self.graph.borrow_mut();
                    if !graph.start_next_round() {
                        break;
                    }
                    rounds += 1;
                    if rounds > self.config.max_flush_rounds {
                        graph.clear_pending();
                        tracing::warn!(rounds, "flush exceeded its round limit, pending work dropped");
                        return Err(ReactiveError::FlushLimit {
                            rounds: self.config.max_flush_rounds,
                        });
                    }
                    clock = graph.clock();
                }
            }
        }
        tracing::debug!(runs, rounds, "flush settled");
        Ok(())
    }

    /// Run `id` if it is dirty. Returns whether it ran.
    fn refresh(&self, id: NodeId, bucket: Option<u32>, clock: Option<u64>) -> Result<bool> {
        let behavior = {
            let mut graph = self.graph.borrow_mut();
            if graph.node(id).is_some_and(|node| node.computing) {
                return Ok(false);
            }
            if !graph.take_dirty(id, bucket, clock) {
                return Ok(false);
            }
            graph.behavior(id)
        };
        let Some(behavior) = behavior else {
            return Ok(true);
        };
        tracing::trace!(node = %id, "running subscriber");
        if self.guarded(Some(id), || behavior.run(self, id))? {
            self.graph
                .borrow_mut()
                .schedule_subscribers(id, self.flushing.get());
        }
        Ok(true)
    }

    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let value = {
            let _batch = DepthGuard::enter(&self.batch_depth);
            f()
        };
        if self.batch_depth.get() > 0 || self.tracker.is_evaluating() {
            return Ok(value);
        }
        self.flush()?;
        Ok(value)
    }

    pub fn sample<R>(&self, f: impl FnOnce() -> R) -> R {
        let value = self.untracked(f);
        if self.tracker.is_idle() {
            self.request_flush();
        }
        value
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Tear down a lazy computed nobody reads any more.
    pub fn release_if_unobserved(&self, id: NodeId) {
        let orphaned = self.graph.borrow().node(id).is_some_and(Node::is_orphaned);
        if orphaned && !self.is_pinned(id) {
            tracing::trace!(node = %id, "idling lazy computed");
            self.teardown(id, false);
        }
    }

    /// Dispose `id` and everything it owns. Disposing twice is a no-op.
    pub fn dispose(&self, id: NodeId) {
        self.teardown(id, true);
    }

    /// Unlink `root`, cascade into its children and any lazy sources it
    /// leaves without subscribers, and release their state. With
    /// `remove == false` the root stays in the arena as an idle computed.
    fn teardown(&self, root: NodeId, remove: bool) {
        let mut work = vec![(root, remove)];
        while let Some((id, remove)) = work.pop() {
            let detached = match self.graph.try_borrow_mut() {
                Ok(mut graph) => graph.detach(id, remove),
                Err(_) => None,
            };
            let Some(detached) = detached else {
                continue;
            };
            tracing::trace!(node = %id, remove, "tore down node");
            work.extend(detached.children.into_iter().map(|child| (child, true)));
            work.extend(
                detached
                    .orphans
                    .into_iter()
                    .filter(|orphan| !self.is_pinned(*orphan))
                    .map(|orphan| (orphan, false)),
            );
            if let Some(behavior) = detached.behavior {
                self.untracked(|| behavior.release(id));
            }
        }
    }
}

fn take_error(payload: Box<dyn std::any::Any + Send>) -> ReactiveError {
    match payload.downcast::<ReactiveError>() {
        Ok(err) => *err,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// One in-flight evaluation. Dropping it uncommitted rolls back.
struct Evaluation<'a> {
    rt: &'a RuntimeInner,
    id: NodeId,
    context: Option<ReactiveContext<'a>>,
}

impl Evaluation<'_> {
    fn commit(mut self) -> IndexSet<NodeId> {
        self.context
            .take()
            .map(ReactiveContext::finish)
            .unwrap_or_default()
    }
}

impl Drop for Evaluation<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            let observed = context.finish();
            self.rt.rollback(self.id, observed);
        }
    }
}

struct DriverGuard<'a> {
    rt: &'a RuntimeInner,
    root: NodeId,
}

impl Drop for DriverGuard<'_> {
    fn drop(&mut self) {
        let driver = match self.rt.driver.try_borrow_mut() {
            Ok(mut driver) => driver.take(),
            Err(_) => return,
        };
        for pinned in driver.into_iter().flat_map(|driver| driver.pinned) {
            if pinned != self.root {
                self.rt.release_if_unobserved(pinned);
            }
        }
    }
}

struct FlagGuard<'a>(&'a Cell<bool>);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Handle to one reactive graph.
///
/// Cloning is cheap and every clone refers to the same graph. Node handles
/// only hold weak references, so dropping the last `Runtime` frees the
/// graph; handles outliving it keep their values but stop propagating.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with default configuration and no executor.
    /// Pending work is flushed by [`sync`](Self::sync) or at the end of a
    /// [`batch`](Self::batch).
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a runtime whose deferred flushes go through `executor`.
    pub fn with_executor(config: RuntimeConfig, executor: impl Executor + 'static) -> Self {
        Self::build(config, Some(Box::new(executor)))
    }

    fn build(config: RuntimeConfig, executor: Option<Box<dyn Executor>>) -> Self {
        let inner = Rc::new_cyclic(|this| RuntimeInner {
            this: this.clone(),
            graph: RefCell::new(Graph::new()),
            tracker: Tracker::new(),
            config,
            executor,
            batch_depth: Cell::new(0),
            flushing: Cell::new(false),
            flush_requested: Cell::new(false),
            driver: RefCell::new(None),
            catchers: Cell::new(0),
        });
        Self { inner }
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.inner.config()
    }

    /// Create a signal holding `value`.
    pub fn signal<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + PartialEq + 'static,
    {
        Signal::new(&self.inner, value)
    }

    /// Create a signal whose initial value is produced by `init`.
    pub fn signal_with<T>(&self, init: impl FnOnce() -> T) -> Signal<T>
    where
        T: Clone + PartialEq + 'static,
    {
        Signal::new(&self.inner, init())
    }

    /// Create a valueless signal that notifies on every call.
    pub fn trigger(&self) -> Trigger {
        Trigger::new(&self.inner)
    }

    /// Create a lazy computed.
    pub fn computed<T>(&self, compute: impl Fn() -> T + 'static) -> Computed<T>
    where
        T: Clone + PartialEq + 'static,
    {
        Computed::new(&self.inner, compute, ComputedOptions::default())
    }

    pub fn computed_with<T>(
        &self,
        compute: impl Fn() -> T + 'static,
        options: ComputedOptions,
    ) -> Computed<T>
    where
        T: Clone + PartialEq + 'static,
    {
        Computed::new(&self.inner, compute, options)
    }

    /// Create an effect. It runs once immediately to discover its
    /// dependencies.
    pub fn effect(&self, mut body: impl FnMut() + 'static) -> Effect {
        Effect::new(&self.inner, move || {
            body();
            None
        })
    }

    /// Create an effect whose body returns a cleanup, run before the next
    /// execution and on disposal.
    pub fn effect_with_cleanup<C>(&self, mut body: impl FnMut() -> C + 'static) -> Effect
    where
        C: FnOnce() + 'static,
    {
        Effect::new(&self.inner, move || Some(Box::new(body()) as Box<dyn FnOnce()>))
    }

    pub fn event<T>(&self) -> Event<T>
    where
        T: Clone + 'static,
    {
        Event::new(&self.inner)
    }

    /// Push-based listener on any observable node.
    pub fn subscribe<O>(&self, source: &O, callback: impl FnMut(O::Value) + 'static) -> Disposer
    where
        O: Observable,
    {
        source.subscribe(Box::new(callback))
    }

    /// Run `f` with writes coalesced; the outermost batch flushes on exit.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.inner.batch(f)
    }

    /// Run `f` without recording dependencies.
    pub fn sample<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.sample(f)
    }

    /// Flush pending work now.
    pub fn sync(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Whether any subscriber is waiting for a flush.
    pub fn has_pending(&self) -> bool {
        self.inner.graph.borrow().pending() > 0
    }

    pub fn kind_of(&self, id: NodeId) -> Option<NodeKind> {
        self.inner.graph.borrow().kind(id)
    }

    /// Dispose any node by handle. Idempotent.
    pub fn dispose(&self, id: NodeId) {
        self.inner.dispose(id);
    }

    pub fn stats(&self) -> GraphStats {
        self.inner.graph.borrow().stats()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", self.config())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn write_is_deferred_until_sync() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let seen = Rc::new(Cell::new(0));
        let seen_in_effect = seen.clone();
        let a_in_effect = a.clone();
        rt.effect(move || seen_in_effect.set(a_in_effect.get()));
        assert_eq!(seen.get(), 1);

        a.set(5);
        assert_eq!(seen.get(), 1);
        assert!(rt.has_pending());

        rt.sync().unwrap();
        assert_eq!(seen.get(), 5);
        assert!(!rt.has_pending());
    }

    #[test]
    fn nested_batches_flush_once_at_the_outermost_exit() {
        let rt = Runtime::new();
        let a = rt.signal(0);
        let runs = Rc::new(Cell::new(0));
        let runs_in_effect = runs.clone();
        let a_in_effect = a.clone();
        rt.effect(move || {
            a_in_effect.get();
            runs_in_effect.set(runs_in_effect.get() + 1);
        });

        rt.batch(|| {
            a.set(1);
            rt.batch(|| a.set(2)).unwrap();
            assert_eq!(runs.get(), 1);
            a.set(3);
        })
        .unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn independent_runtimes_do_not_share_tracking() {
        let first = Runtime::new();
        let second = Runtime::new();
        let a = first.signal(1);
        let a_in_computed = a.clone();
        let reader = second.computed(move || a_in_computed.get() + 1);

        let runs = Rc::new(Cell::new(0));
        let runs_in_effect = runs.clone();
        let reader_in_effect = reader.clone();
        second.effect(move || {
            reader_in_effect.get();
            runs_in_effect.set(runs_in_effect.get() + 1);
        });

        // `reader` read a signal from another graph: no edge was recorded.
        assert_eq!(a.subscriber_count(), 0);
        a.set(2);
        first.sync().unwrap();
        second.sync().unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn sample_does_not_subscribe() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let runs = Rc::new(Cell::new(0));
        let runs_in_effect = runs.clone();
        let a_in_effect = a.clone();
        let rt_in_effect = rt.clone();
        rt.effect(move || {
            rt_in_effect.sample(|| a_in_effect.get());
            runs_in_effect.set(runs_in_effect.get() + 1);
        });

        assert_eq!(a.subscriber_count(), 0);
        a.set(2);
        rt.sync().unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn dispose_is_idempotent_by_handle() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let id = a.id();
        assert_eq!(rt.kind_of(id), Some(NodeKind::Signal));

        rt.dispose(id);
        rt.dispose(id);
        assert_eq!(rt.kind_of(id), None);
    }

    #[test]
    fn stats_reflect_graph_shape() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let a_in_computed = a.clone();
        let b = rt.computed(move || a_in_computed.get() * 2);
        let b_in_effect = b.clone();
        rt.effect(move || {
            b_in_effect.get();
        });

        let stats = rt.stats();
        assert_eq!(stats.signals, 1);
        assert_eq!(stats.computeds, 1);
        assert_eq!(stats.active_computeds, 1);
        assert_eq!(stats.effects, 1);
        assert_eq!(stats.edges, 2);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn runtime_without_executor_queues_no_flush_tasks() {
        let rt = Runtime::new();
        let a = rt.signal(0);
        let seen = Rc::new(Cell::new(0));
        let seen_in_callback = seen.clone();
        let _listener = a.on(move |value| seen_in_callback.set(value));
        let handles = Rc::weak_count(&rt.inner);

        for i in 1..=1000 {
            a.set(i);
            rt.sync().unwrap();
        }

        assert_eq!(seen.get(), 1000);
        assert_eq!(Rc::weak_count(&rt.inner), handles);
    }

    #[test]
    fn batch_inside_sample_flushes_on_exit() {
        let rt = Runtime::new();
        let a = rt.signal(0);
        let runs = Rc::new(Cell::new(0));
        let runs_in_effect = runs.clone();
        let a_in_effect = a.clone();
        rt.effect(move || {
            a_in_effect.get();
            runs_in_effect.set(runs_in_effect.get() + 1);
        });

        rt.sample(|| rt.batch(|| a.set(1)).unwrap());

        assert_eq!(runs.get(), 2);
        assert!(!rt.has_pending());
    }
}
