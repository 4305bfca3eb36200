//! Graph Nodes
//!
//! This module defines the node record stored in the arena for every signal,
//! computed, effect and event.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::reactive::Reactive;

/// Handle to a node in the dependency graph.
///
/// Handles are generational: once a node is disposed its handle never
/// resolves again, even after the arena slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the arena.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this node was inserted.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A mutable cell. Readable, never a subscriber. Always level 0.
    Signal,

    /// A derived cached value. Both readable and a subscriber.
    Computed,

    /// A terminal reaction (effects, subscriptions, event listeners).
    /// Nothing can depend on it; its level is fixed at 0.
    Effect,

    /// A push-only event channel. Not readable and never scheduled.
    Event,
}

impl NodeKind {
    /// Whether reads of this kind create dependency edges.
    pub fn is_readable(&self) -> bool {
        matches!(self, NodeKind::Signal | NodeKind::Computed)
    }

    /// Whether nodes of this kind can hold dependency edges to sources.
    pub fn is_subscriber(&self) -> bool {
        matches!(self, NodeKind::Computed | NodeKind::Effect)
    }
}

/// A node in the dependency graph.
pub struct Node {
    pub(crate) kind: NodeKind,

    /// Topological rank. Computeds sit strictly above every source they read.
    pub(crate) level: u32,

    /// Flush round in which this subscriber last ran.
    pub(crate) clock: u64,

    /// Scheduled and not yet run.
    pub(crate) dirty: bool,

    /// Holds a value and live edges. Lazy computeds drop to inactive when
    /// their last subscriber goes away.
    pub(crate) active: bool,

    /// Currently inside its own evaluation.
    pub(crate) computing: bool,

    /// Tear down when the subscriber count reaches zero.
    pub(crate) lazy: bool,

    /// Readable nodes this node read during its last committed evaluation.
    pub(crate) sources: IndexSet<NodeId>,

    /// Subscribers that currently read this node.
    pub(crate) subscribers: IndexSet<NodeId>,

    /// The node whose evaluation created this one.
    pub(crate) owner: Option<NodeId>,

    /// Nodes created during this node's last evaluation.
    pub(crate) children: SmallVec<[NodeId; 4]>,

    pub(crate) behavior: Option<Rc<dyn Reactive>>,
}

impl Node {
    /// Create a new node of the given kind.
    pub(crate) fn new(kind: NodeKind, behavior: Option<Rc<dyn Reactive>>) -> Self {
        Self {
            kind,
            level: match kind {
                NodeKind::Computed => 1,
                NodeKind::Signal | NodeKind::Effect | NodeKind::Event => 0,
            },
            clock: 0,
            dirty: false,
            // Computeds become active on first evaluation.
            active: kind != NodeKind::Computed,
            computing: false,
            lazy: false,
            sources: IndexSet::new(),
            subscribers: IndexSet::new(),
            owner: None,
            children: SmallVec::new(),
            behavior,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn sources(&self) -> &IndexSet<NodeId> {
        &self.sources
    }

    pub fn subscribers(&self) -> &IndexSet<NodeId> {
        &self.subscribers
    }

    /// A lazy computed that holds a value nobody is subscribed to and is
    /// not in the middle of evaluating.
    pub(crate) fn is_orphaned(&self) -> bool {
        self.kind == NodeKind::Computed
            && self.lazy
            && self.active
            && !self.computing
            && self.subscribers.is_empty()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("level", &self.level)
            .field("dirty", &self.dirty)
            .field("active", &self.active)
            .field("sources", &self.sources.len())
            .field("subscribers", &self.subscribers.len())
            .field("children", &self.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_start_by_kind() {
        assert_eq!(Node::new(NodeKind::Signal, None).level(), 0);
        assert_eq!(Node::new(NodeKind::Computed, None).level(), 1);
        assert_eq!(Node::new(NodeKind::Effect, None).level(), 0);
    }

    #[test]
    fn only_computeds_start_inactive() {
        assert!(!Node::new(NodeKind::Computed, None).is_active());
        assert!(Node::new(NodeKind::Signal, None).is_active());
        assert!(Node::new(NodeKind::Effect, None).is_active());
    }

    #[test]
    fn kind_roles() {
        assert!(NodeKind::Signal.is_readable());
        assert!(!NodeKind::Signal.is_subscriber());
        assert!(NodeKind::Computed.is_readable());
        assert!(NodeKind::Computed.is_subscriber());
        assert!(!NodeKind::Effect.is_readable());
        assert!(!NodeKind::Event.is_subscriber());
    }

    #[test]
    fn orphan_requires_lazy_active_computed() {
        let mut node = Node::new(NodeKind::Computed, None);
        node.lazy = true;
        assert!(!node.is_orphaned());

        node.active = true;
        assert!(node.is_orphaned());

        node.subscribers.insert(NodeId::new(9, 0));
        assert!(!node.is_orphaned());
    }
}
