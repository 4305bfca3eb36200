//! Dependency Graph
//!
//! This module implements the dependency graph that records which
//! subscribers read which signal-like nodes.
//!
//! # Overview
//!
//! - Nodes are signals, computeds, effects and events, stored in a
//!   generational [`Arena`] and addressed by [`NodeId`].
//! - An edge `(source, subscriber)` is stored on both ends: the subscriber's
//!   `sources` set and the source's `subscribers` set. Every mutation here
//!   updates both sides together.
//! - A second tree, owner/children, records which nodes were created while
//!   another node was evaluating. It is independent of the edges.
//! - The [`LevelQueue`] holds dirty subscribers until the runtime drains it.
//!
//! Nothing in this module calls user code. The runtime clones behaviors out
//! of the graph and drops its borrow before invoking them.

mod arena;
mod node;
mod scheduler;

use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexSet;
use serde::Serialize;
use smallvec::SmallVec;

pub use arena::Arena;
pub use node::{Node, NodeId, NodeKind};
pub use scheduler::LevelQueue;

use crate::reactive::Reactive;

/// Counters describing the current shape of a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub signals: usize,
    pub computeds: usize,
    pub active_computeds: usize,
    pub effects: usize,
    pub events: usize,
    pub edges: usize,
    pub pending: usize,
}

/// What remains to be done after a node was unlinked.
pub(crate) struct Detached {
    pub behavior: Option<Rc<dyn Reactive>>,
    /// Sources left as lazy computeds without subscribers.
    pub orphans: Vec<NodeId>,
    pub children: SmallVec<[NodeId; 4]>,
}

/// Arena of nodes plus the pending-work queue.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Arena<Node>,
    queue: LevelQueue,
    /// Number of nodes whose dirty flag is set.
    pending: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        let owner = node.owner;
        let id = self.nodes.insert(node);
        if let Some(owner) = owner.and_then(|owner| self.nodes.get_mut(owner)) {
            owner.children.push(id);
        }
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(id).map(Node::kind)
    }

    /// Number of dirty nodes awaiting a run.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn clock(&self) -> u64 {
        self.queue.clock()
    }

    /// Mark one subscriber dirty and queue it.
    ///
    /// A subscriber that already ran in the current flush round is carried
    /// to the next round instead. Returns `false` if it was already queued.
    pub(crate) fn schedule(&mut self, id: NodeId, flushing: bool) -> bool {
        let clock = self.queue.clock();
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        if node.dirty || !node.active || !node.kind.is_subscriber() {
            return false;
        }
        node.dirty = true;
        self.pending += 1;
        if flushing && node.clock == clock {
            self.queue.carry(id);
        } else {
            self.queue.push(id, node.level);
        }
        true
    }

    /// Schedule every subscriber of `id`. Returns how many were newly queued.
    pub(crate) fn schedule_subscribers(&mut self, id: NodeId, flushing: bool) -> usize {
        let subscribers: SmallVec<[NodeId; 8]> = match self.nodes.get(id) {
            Some(node) => node.subscribers.iter().copied().collect(),
            None => return 0,
        };
        subscribers
            .into_iter()
            .filter(|sub| self.schedule(*sub, flushing))
            .count()
    }

    /// Next queued entry as `(bucket level, node)`.
    pub(crate) fn pop_queued(&mut self) -> Option<(u32, NodeId)> {
        self.queue.pop()
    }

    /// Move carried subscribers into the buckets under a fresh clock.
    /// Returns `false` when there was nothing to carry.
    pub(crate) fn start_next_round(&mut self) -> bool {
        let carried = self.queue.take_carry();
        if carried.is_empty() {
            return false;
        }
        self.queue.advance_clock();
        for id in carried {
            if let Some(node) = self.nodes.get(id).filter(|node| node.dirty) {
                let level = node.level;
                self.queue.push(id, level);
            }
        }
        true
    }

    /// Begin a flush: returns the clock token of its first round.
    pub(crate) fn begin_flush(&mut self) -> u64 {
        self.queue.advance_clock()
    }

    /// Clear the dirty flag of `id`. Returns `false` if it was not dirty.
    ///
    /// `bucket` is the level the entry was queued at; entries left behind by
    /// a level change are ignored. `clock` stamps the run when flushing.
    pub(crate) fn take_dirty(&mut self, id: NodeId, bucket: Option<u32>, clock: Option<u64>) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        if !node.dirty || bucket.is_some_and(|level| level != node.level) {
            return false;
        }
        node.dirty = false;
        self.pending -= 1;
        if let Some(clock) = clock {
            node.clock = clock;
        }
        true
    }

    /// Whether `id` is dirty or could be reached by dirty work upstream.
    ///
    /// Everything a computed reads sits at a lower level, so with no dirty
    /// entry queued below its level its cached value is current.
    pub(crate) fn may_be_stale(&self, id: NodeId) -> bool {
        match self.nodes.get(id) {
            Some(node) => {
                node.dirty || (self.pending > 0 && self.queue.may_hold_below(node.level))
            }
            None => false,
        }
    }

    pub(crate) fn behavior(&self, id: NodeId) -> Option<Rc<dyn Reactive>> {
        self.nodes.get(id).and_then(|node| node.behavior.clone())
    }

    /// Drop all queued work and dirty flags.
    pub(crate) fn clear_pending(&mut self) {
        while let Some((_, id)) = self.queue.pop() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.dirty = false;
            }
        }
        for id in self.queue.take_carry() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.dirty = false;
            }
        }
        self.queue.clear();
        self.pending = 0;
    }

    /// Replace the source set of `subscriber`, keeping both edge ends in sync.
    ///
    /// Sources that no longer exist (or the subscriber itself) are dropped.
    /// Returns the sources whose edge was removed.
    pub(crate) fn replace_sources(
        &mut self,
        subscriber: NodeId,
        observed: IndexSet<NodeId>,
    ) -> Vec<NodeId> {
        let observed: IndexSet<NodeId> = observed
            .into_iter()
            .filter(|source| *source != subscriber && self.nodes.contains(*source))
            .collect();

        let previous = match self.nodes.get_mut(subscriber) {
            Some(node) => std::mem::take(&mut node.sources),
            None => return Vec::new(),
        };

        for source in observed.iter().filter(|source| !previous.contains(*source)) {
            if let Some(node) = self.nodes.get_mut(*source) {
                node.subscribers.insert(subscriber);
            }
        }

        let mut removed = Vec::new();
        for source in previous.iter().filter(|source| !observed.contains(*source)) {
            if let Some(node) = self.nodes.get_mut(*source) {
                node.subscribers.shift_remove(&subscriber);
            }
            removed.push(*source);
        }

        if let Some(node) = self.nodes.get_mut(subscriber) {
            node.sources = observed;
        }
        removed
    }

    /// Restore the level invariant starting at `id`.
    ///
    /// A computed must sit strictly above all of its sources. When `id`'s
    /// required level grew, the increase is pushed breadth-first through its
    /// subscribers, touching only nodes whose level actually changes. Levels
    /// never decrease. Queued nodes are re-queued at their new level.
    pub(crate) fn raise_level(&mut self, id: NodeId) {
        let mut frontier = VecDeque::from([id]);
        while let Some(current) = frontier.pop_front() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            if node.kind != NodeKind::Computed {
                continue;
            }
            let required = node
                .sources
                .iter()
                .filter_map(|source| self.nodes.get(*source))
                .map(|source| source.level + 1)
                .max()
                .unwrap_or(1);
            if required <= node.level {
                continue;
            }

            // Carried nodes are re-bucketed at their current level next round.
            let requeue = node.dirty && !self.queue.is_carried(current);
            let subscribers: SmallVec<[NodeId; 8]> = node.subscribers.iter().copied().collect();
            if let Some(node) = self.nodes.get_mut(current) {
                node.level = required;
            }
            if requeue {
                self.queue.push(current, required);
            }
            tracing::trace!(node = %current, level = required, "raised level");
            frontier.extend(subscribers);
        }
    }

    /// Unlink `id` from its sources, children and (when removing) its
    /// subscribers.
    ///
    /// With `remove == false` the node stays in the arena as an inactive
    /// lazy computed; inactive nodes are skipped so teardown is idempotent.
    pub(crate) fn detach(&mut self, id: NodeId, remove: bool) -> Option<Detached> {
        let node = self.nodes.get_mut(id)?;
        if !remove && !node.active {
            return None;
        }
        if node.dirty {
            node.dirty = false;
            self.pending -= 1;
        }
        if node.kind == NodeKind::Computed {
            node.active = false;
        }
        let sources = std::mem::take(&mut node.sources);
        let children = std::mem::take(&mut node.children);
        let owner = node.owner;
        let (behavior, subscribers) = if remove {
            (node.behavior.take(), std::mem::take(&mut node.subscribers))
        } else {
            (node.behavior.clone(), IndexSet::new())
        };

        let mut orphans = Vec::new();
        for source in sources {
            if let Some(node) = self.nodes.get_mut(source) {
                node.subscribers.shift_remove(&id);
                if node.is_orphaned() {
                    orphans.push(source);
                }
            }
        }

        if remove {
            for subscriber in subscribers {
                if let Some(node) = self.nodes.get_mut(subscriber) {
                    node.sources.shift_remove(&id);
                }
            }
            if let Some(owner) = owner.and_then(|owner| self.nodes.get_mut(owner)) {
                owner.children.retain(|child| *child != id);
            }
            self.nodes.remove(id);
        }

        Some(Detached {
            behavior,
            orphans,
            children,
        })
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            pending: self.pending,
            ..GraphStats::default()
        };
        for (_, node) in self.nodes.iter() {
            match node.kind {
                NodeKind::Signal => stats.signals += 1,
                NodeKind::Computed => {
                    stats.computeds += 1;
                    if node.active {
                        stats.active_computeds += 1;
                    }
                }
                NodeKind::Effect => stats.effects += 1,
                NodeKind::Event => stats.events += 1,
            }
            stats.edges += node.sources.len();
        }
        stats
    }
}
