//! Event Implementation
//!
//! An Event is a push-only channel: it has no current value, so it cannot
//! be read or tracked. Listeners are called synchronously, in registration
//! order, for every [`emit`](Event::emit).
//!
//! Each listener is a terminal node. It belongs to the evaluation that
//! registered it, or to the event itself when registered outside one, so it
//! is disposed with its owner like any nested effect.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::runtime::{Reactive, RuntimeInner};
use super::subscriber::{Disposer, Observable};
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

type Listener<T> = Rc<RefCell<Box<dyn FnMut(T)>>>;

struct EventCell<T> {
    runtime: Weak<RuntimeInner>,
    listeners: RefCell<IndexMap<NodeId, Listener<T>>>,
}

impl<T: 'static> Reactive for EventCell<T> {
    fn run(&self, _rt: &RuntimeInner, _id: NodeId) -> Result<bool> {
        Ok(false)
    }

    fn release(&self, _id: NodeId) {
        let listeners: Vec<NodeId> = self.listeners.borrow_mut().drain(..).map(|(id, _)| id).collect();
        if let Some(rt) = self.runtime.upgrade() {
            for id in listeners {
                rt.dispose(id);
            }
        }
    }
}

struct ListenerCell<T> {
    event: Weak<EventCell<T>>,
}

impl<T: 'static> Reactive for ListenerCell<T> {
    fn run(&self, _rt: &RuntimeInner, _id: NodeId) -> Result<bool> {
        Ok(false)
    }

    fn release(&self, id: NodeId) {
        if let Some(event) = self.event.upgrade() {
            event.listeners.borrow_mut().shift_remove(&id);
        }
    }
}

/// A push-only event carrying payloads of type `T`.
pub struct Event<T> {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
    cell: Rc<EventCell<T>>,
}

impl<T> Event<T>
where
    T: Clone + 'static,
{
    pub(crate) fn new(rt: &RuntimeInner) -> Self {
        let cell = Rc::new(EventCell {
            runtime: rt.weak(),
            listeners: RefCell::new(IndexMap::new()),
        });
        let id = rt.create_node(
            NodeKind::Event,
            false,
            Some(cell.clone() as Rc<dyn Reactive>),
        );
        Self {
            runtime: rt.weak(),
            id,
            cell,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Register `callback` for every later emit.
    pub fn on(&self, callback: impl FnMut(T) + 'static) -> Disposer {
        self.subscribe(Box::new(callback))
    }

    /// Call every listener with `payload`.
    ///
    /// Listeners run untracked inside one batch, so writes they make are
    /// flushed together once the last listener returns. A listener removed
    /// by an earlier one is skipped; a listener that re-emits this event is
    /// not re-entered.
    pub fn emit(&self, payload: T) -> Result<()> {
        let listeners: Vec<(NodeId, Listener<T>)> = self
            .cell
            .listeners
            .borrow()
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();
        tracing::trace!(node = %self.id, listeners = listeners.len(), "emitting event");

        let call_all = || {
            for (id, listener) in listeners {
                if !self.cell.listeners.borrow().contains_key(&id) {
                    continue;
                }
                let Ok(mut callback) = listener.try_borrow_mut() else {
                    continue;
                };
                callback(payload.clone());
            }
        };
        match self.runtime.upgrade() {
            Some(rt) => rt.batch(|| rt.untracked(call_all)),
            None => {
                call_all();
                Ok(())
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.cell.listeners.borrow().len()
    }

    /// Dispose the event and every listener it owns.
    pub fn dispose(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.dispose(self.id);
        }
    }
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id,
            cell: self.cell.clone(),
        }
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("listeners", &self.cell.listeners.borrow().len())
            .finish()
    }
}

impl<T> Observable for Event<T>
where
    T: Clone + 'static,
{
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Event
    }

    fn subscribe(&self, callback: Box<dyn FnMut(T)>) -> Disposer {
        let Some(rt) = self.runtime.upgrade() else {
            return Disposer::inert();
        };
        if !rt.contains(self.id) {
            return Disposer::inert();
        }
        let owner = rt.owner().or(Some(self.id));
        let listener = Rc::new(ListenerCell {
            event: Rc::downgrade(&self.cell),
        });
        let id = rt.create_child(
            owner,
            NodeKind::Effect,
            false,
            Some(listener as Rc<dyn Reactive>),
        );
        self.cell
            .listeners
            .borrow_mut()
            .insert(id, Rc::new(RefCell::new(callback)));
        Disposer::new(rt.weak(), id)
    }
}

#[cfg(test)]
mod tests {
    use crate::Runtime;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn listeners_run_in_registration_order() {
        let rt = Runtime::new();
        let event = rt.event::<u32>();
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = log.clone();
        let second = log.clone();
        event.on(move |n| first.borrow_mut().push(("first", n)));
        event.on(move |n| second.borrow_mut().push(("second", n)));

        event.emit(7).unwrap();
        assert_eq!(*log.borrow(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn listener_writes_flush_once() {
        let rt = Runtime::new();
        let event = rt.event::<i32>();
        let a = rt.signal(0);
        let b = rt.signal(0);
        let a_in_listener = a.clone();
        let b_in_listener = b.clone();
        event.on(move |n| {
            a_in_listener.set(n);
        });
        event.on(move |n| {
            b_in_listener.set(n * 2);
        });

        let runs = Rc::new(Cell::new(0));
        let runs_in_effect = runs.clone();
        let (a_in_effect, b_in_effect) = (a.clone(), b.clone());
        rt.effect(move || {
            a_in_effect.get();
            b_in_effect.get();
            runs_in_effect.set(runs_in_effect.get() + 1);
        });

        event.emit(5).unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(b.get(), 10);
    }

    #[test]
    fn disposed_listener_stops_receiving() {
        let rt = Runtime::new();
        let event = rt.event::<()>();
        let hits = Rc::new(Cell::new(0));
        let hits_in_listener = hits.clone();
        let disposer = event.on(move |()| hits_in_listener.set(hits_in_listener.get() + 1));

        event.emit(()).unwrap();
        disposer.dispose();
        event.emit(()).unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(event.listener_count(), 0);
    }

    #[test]
    fn disposing_event_disposes_its_listeners() {
        let rt = Runtime::new();
        let event = rt.event::<u8>();
        let disposer = event.on(|_| {});
        event.on(|_| {});
        assert_eq!(rt.stats().events, 1);
        assert_eq!(rt.stats().effects, 2);

        event.dispose();
        assert!(disposer.is_disposed());
        assert_eq!(rt.stats().events, 0);
        assert_eq!(rt.stats().effects, 0);
        assert!(event.on(|_| {}).is_disposed());
    }
}
