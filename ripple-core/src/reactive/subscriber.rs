//! Subscriber types for the reactive system.
//!
//! A subscriber is any node that depends on reactive values: computeds,
//! effects, and the push-based subscriptions created here. This module also
//! holds the traits that let callers treat signals, computeds, triggers and
//! events uniformly.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{Reactive, RuntimeInner};
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

/// Anything that can notify listeners.
pub trait Observable {
    type Value;

    fn node_id(&self) -> NodeId;

    fn kind(&self) -> NodeKind;

    /// Call `callback` with the new value whenever this node changes.
    fn subscribe(&self, callback: Box<dyn FnMut(Self::Value)>) -> Disposer;
}

/// An observable that also holds a current value.
pub trait Readable: Observable {
    /// Read the value, recording a dependency if tracking.
    fn read(&self) -> Self::Value;

    /// Read the value without recording a dependency.
    fn try_snapshot(&self) -> Result<Self::Value>;
}

/// Handle that disposes one node when called.
///
/// Disposing is idempotent. Dropping a `Disposer` does not dispose.
#[derive(Clone)]
pub struct Disposer {
    runtime: Weak<RuntimeInner>,
    id: Option<NodeId>,
}

impl Disposer {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, id: NodeId) -> Self {
        Self {
            runtime,
            id: Some(id),
        }
    }

    /// A disposer for work that was never registered.
    pub(crate) fn inert() -> Self {
        Self {
            runtime: Weak::new(),
            id: None,
        }
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn dispose(&self) {
        if let (Some(rt), Some(id)) = (self.runtime.upgrade(), self.id) {
            rt.dispose(id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        match (self.runtime.upgrade(), self.id) {
            (Some(rt), Some(id)) => !rt.contains(id),
            _ => true,
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Disposes a freshly created node if its first run unwinds.
pub(crate) struct DisposeOnUnwind<'a> {
    rt: &'a RuntimeInner,
    id: NodeId,
    armed: bool,
}

impl<'a> DisposeOnUnwind<'a> {
    pub fn new(rt: &'a RuntimeInner, id: NodeId) -> Self {
        Self { rt, id, armed: true }
    }

    pub fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for DisposeOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.rt.dispose(self.id);
        }
    }
}

/// Terminal subscriber that forwards the value `read` returns to a callback.
struct SubscriptionCell<T> {
    read: Box<dyn Fn() -> T>,
    callback: RefCell<Box<dyn FnMut(T)>>,
}

impl<T: 'static> Reactive for SubscriptionCell<T> {
    fn run(&self, rt: &RuntimeInner, id: NodeId) -> Result<bool> {
        let value = rt.track(id, || (self.read)())?;
        let mut callback = self.callback.borrow_mut();
        rt.untracked(|| callback(value));
        Ok(false)
    }

    fn release(&self, _id: NodeId) {}
}

/// Subscribe `callback` to whatever `read` reads.
///
/// `read` runs once now to record the dependencies; the callback itself
/// only runs on later changes.
pub(crate) fn subscription<T: 'static>(
    runtime: &Weak<RuntimeInner>,
    read: impl Fn() -> T + 'static,
    callback: Box<dyn FnMut(T)>,
) -> Disposer {
    let Some(rt) = runtime.upgrade() else {
        return Disposer::inert();
    };
    let cell = Rc::new(SubscriptionCell {
        read: Box::new(read),
        callback: RefCell::new(callback),
    });
    let id = rt.create_node(
        NodeKind::Effect,
        false,
        Some(cell.clone() as Rc<dyn Reactive>),
    );
    let guard = DisposeOnUnwind::new(&rt, id);
    if let Err(err) = rt.guarded(None, || rt.track(id, || drop((cell.read)()))) {
        rt.fail(err);
    }
    guard.defuse();
    Disposer::new(rt.weak(), id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;
    use std::cell::Cell;

    #[test]
    fn subscription_fires_on_change_only() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_in_callback = seen.clone();
        let disposer = a.on(move |value| seen_in_callback.borrow_mut().push(value));
        assert!(seen.borrow().is_empty());

        a.set(2);
        a.set(3);
        rt.sync().unwrap();
        assert_eq!(*seen.borrow(), vec![3]);

        disposer.dispose();
        a.set(4);
        rt.sync().unwrap();
        assert_eq!(*seen.borrow(), vec![3]);
        assert_eq!(a.subscriber_count(), 0);
    }

    #[test]
    fn disposer_is_idempotent() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let disposer = a.on(|_| {});
        assert!(!disposer.is_disposed());

        disposer.dispose();
        disposer.dispose();
        assert!(disposer.is_disposed());
        assert_eq!(rt.stats().effects, 0);
    }

    #[test]
    fn subscribe_through_observable() {
        let rt = Runtime::new();
        let trigger = rt.trigger();
        let hits = Rc::new(Cell::new(0));
        let hits_in_callback = hits.clone();
        let disposer = rt.subscribe(&trigger, move |()| {
            hits_in_callback.set(hits_in_callback.get() + 1)
        });
        assert_eq!(trigger.kind(), NodeKind::Signal);

        trigger.notify();
        rt.sync().unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(rt.kind_of(disposer.id().unwrap()), Some(NodeKind::Effect));
    }

    #[test]
    fn subscription_on_dropped_runtime_is_inert() {
        let signal = {
            let rt = Runtime::new();
            rt.signal(1)
        };
        let disposer = signal.on(|_| {});
        assert!(disposer.id().is_none());
        assert!(disposer.is_disposed());
        disposer.dispose();
    }
}
