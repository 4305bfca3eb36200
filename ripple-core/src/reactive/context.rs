//! Reactive Context
//!
//! The reactive context tracks which subscriber is currently evaluating, so
//! that a read of a signal-like node can be recorded as a dependency of it.
//!
//! # Implementation
//!
//! Each runtime owns a [`Tracker`] holding a stack of frames. Evaluating a
//! subscriber pushes a tracking frame; [`sample`](super::Runtime::sample)
//! pushes an untracked frame that hides every frame below it. Reads only
//! ever record into the top frame, so nested evaluations (a computed read
//! inside an effect) each collect their own sources.
//!
//! The stack lives in the runtime rather than in thread-local storage, so
//! independent runtimes on one thread never observe each other's reads.
//!
//! Observed sources are collected in the frame and only turned into edges
//! when the evaluation returns. An evaluation that panics leaves the
//! committed edge set untouched.

use std::cell::{Cell, RefCell};

use indexmap::IndexSet;

use crate::graph::NodeId;

enum Frame {
    Tracking {
        subscriber: NodeId,
        observed: IndexSet<NodeId>,
    },
    Untracked,
}

/// Per-runtime tracking state.
pub(crate) struct Tracker {
    frames: RefCell<Vec<Frame>>,
    /// Node that owns anything created right now.
    owner: Cell<Option<NodeId>>,
    /// Number of nested computed evaluations in progress.
    depth: Cell<usize>,
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
            owner: Cell::new(None),
            depth: Cell::new(0),
        }
    }

    /// Record a read of `source` in the top frame, if it is tracking.
    pub fn observe(&self, source: NodeId) {
        if let Some(Frame::Tracking { observed, .. }) = self.frames.borrow_mut().last_mut() {
            observed.insert(source);
        }
    }

    /// Whether a read right now would create an edge.
    pub fn is_tracking(&self) -> bool {
        matches!(self.frames.borrow().last(), Some(Frame::Tracking { .. }))
    }

    /// Whether any evaluation is in progress, sampled or not.
    pub fn is_evaluating(&self) -> bool {
        self.frames
            .borrow()
            .iter()
            .any(|frame| matches!(frame, Frame::Tracking { .. }))
    }

    /// The subscriber whose frame is on top, if tracking.
    #[cfg(test)]
    pub fn current_subscriber(&self) -> Option<NodeId> {
        match self.frames.borrow().last() {
            Some(Frame::Tracking { subscriber, .. }) => Some(*subscriber),
            _ => None,
        }
    }

    /// No evaluation or sampled scope is in progress.
    pub fn is_idle(&self) -> bool {
        self.frames.borrow().is_empty()
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.owner.get()
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    fn pop(&self) -> Option<Frame> {
        self.frames.try_borrow_mut().ok()?.pop()
    }
}

/// Guard for one tracked evaluation.
///
/// Dropping the guard without calling [`finish`](Self::finish) pops the
/// frame and discards what it observed.
pub(crate) struct ReactiveContext<'a> {
    tracker: &'a Tracker,
    subscriber: NodeId,
    previous_owner: Option<NodeId>,
    counts_depth: bool,
    finished: bool,
}

impl<'a> ReactiveContext<'a> {
    /// Enter a tracking frame for `subscriber`, which also becomes the owner
    /// of nodes created until the guard is released. `counts_depth` marks a
    /// computed evaluation for the recursion bound.
    pub fn enter(tracker: &'a Tracker, subscriber: NodeId, counts_depth: bool) -> Self {
        tracker.frames.borrow_mut().push(Frame::Tracking {
            subscriber,
            observed: IndexSet::new(),
        });
        let previous_owner = tracker.owner.replace(Some(subscriber));
        if counts_depth {
            tracker.depth.set(tracker.depth.get() + 1);
        }
        Self {
            tracker,
            subscriber,
            previous_owner,
            counts_depth,
            finished: false,
        }
    }

    /// Leave the frame and return the sources it observed.
    pub fn finish(mut self) -> IndexSet<NodeId> {
        self.finished = true;
        match self.release() {
            Some(Frame::Tracking {
                subscriber,
                observed,
            }) => {
                debug_assert_eq!(
                    subscriber, self.subscriber,
                    "ReactiveContext mismatch: expected {}, got {}",
                    self.subscriber, subscriber
                );
                observed
            }
            _ => IndexSet::new(),
        }
    }

    fn release(&self) -> Option<Frame> {
        self.tracker.owner.set(self.previous_owner);
        if self.counts_depth {
            self.tracker.depth.set(self.tracker.depth.get().saturating_sub(1));
        }
        self.tracker.pop()
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.release();
        }
    }
}

/// Guard for a scope in which reads do not create edges.
pub(crate) struct Untracked<'a> {
    tracker: &'a Tracker,
}

impl<'a> Untracked<'a> {
    pub fn enter(tracker: &'a Tracker) -> Self {
        tracker.frames.borrow_mut().push(Frame::Untracked);
        Self { tracker }
    }
}

impl Drop for Untracked<'_> {
    fn drop(&mut self) {
        self.tracker.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Arena;

    fn ids(count: usize) -> Vec<NodeId> {
        let mut arena = Arena::new();
        (0..count).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn context_tracks_subscriber() {
        let tracker = Tracker::new();
        let n = ids(1);

        assert!(!tracker.is_tracking());
        assert!(tracker.current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(&tracker, n[0], true);
            assert!(tracker.is_tracking());
            assert_eq!(tracker.current_subscriber(), Some(n[0]));
            assert_eq!(tracker.owner(), Some(n[0]));
            assert_eq!(tracker.depth(), 1);
        }

        // Context should be cleaned up after drop
        assert!(tracker.is_idle());
        assert!(!tracker.is_evaluating());
        assert!(tracker.owner().is_none());
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn context_collects_distinct_sources() {
        let tracker = Tracker::new();
        let n = ids(3);

        let ctx = ReactiveContext::enter(&tracker, n[0], false);
        tracker.observe(n[1]);
        tracker.observe(n[2]);
        tracker.observe(n[1]);

        let observed: Vec<_> = ctx.finish().into_iter().collect();
        assert_eq!(observed, vec![n[1], n[2]]);
        assert!(tracker.is_idle());
    }

    #[test]
    fn nested_contexts() {
        let tracker = Tracker::new();
        let n = ids(4);

        let outer = ReactiveContext::enter(&tracker, n[0], true);
        tracker.observe(n[2]);
        {
            let inner = ReactiveContext::enter(&tracker, n[1], true);
            assert_eq!(tracker.current_subscriber(), Some(n[1]));
            assert_eq!(tracker.depth(), 2);
            tracker.observe(n[3]);
            assert_eq!(inner.finish().len(), 1);
        }

        // After inner context finishes, outer should be current
        assert_eq!(tracker.current_subscriber(), Some(n[0]));
        assert_eq!(tracker.owner(), Some(n[0]));
        let observed = outer.finish();
        assert!(observed.contains(&n[2]));
        assert!(!observed.contains(&n[3]));
    }

    #[test]
    fn untracked_scope_hides_outer_frame() {
        let tracker = Tracker::new();
        let n = ids(3);

        let ctx = ReactiveContext::enter(&tracker, n[0], false);
        {
            let _untracked = Untracked::enter(&tracker);
            assert!(!tracker.is_tracking());
            assert!(tracker.is_evaluating());
            tracker.observe(n[1]);
        }
        tracker.observe(n[2]);

        let observed: Vec<_> = ctx.finish().into_iter().collect();
        assert_eq!(observed, vec![n[2]]);
    }

    #[test]
    fn sampled_scope_alone_is_not_an_evaluation() {
        let tracker = Tracker::new();
        let _untracked = Untracked::enter(&tracker);
        assert!(!tracker.is_idle());
        assert!(!tracker.is_evaluating());
    }
}
