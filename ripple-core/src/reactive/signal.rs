//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which subscribers depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a tracked evaluation (computed/effect),
//!    the read is recorded as a dependency of the evaluating subscriber.
//!
//! 2. When a write is accepted, the signal's subscribers are queued and a
//!    flush is requested.
//!
//! 3. A write is accepted only if the new value differs from the current one
//!    (`PartialEq`). Equal writes do nothing.
//!
//! # Memory Layout
//!
//! The graph only stores the node. The value and version live in a cell
//! shared by every clone of the handle, so reading never borrows the graph.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::RuntimeInner;
use super::subscriber::{subscription, Disposer, Observable, Readable};
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

struct SignalCell<T> {
    value: RefCell<T>,
    version: Cell<u64>,
}

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// assert_eq!(count.version(), 1);
/// ```
pub struct Signal<T> {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
    cell: Rc<SignalCell<T>>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + 'static,
{
    pub(crate) fn new(rt: &RuntimeInner, value: T) -> Self {
        let id = rt.create_child(None, NodeKind::Signal, false, None);
        Self {
            runtime: rt.weak(),
            id,
            cell: Rc::new(SignalCell {
                value: RefCell::new(value),
                version: Cell::new(0),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value, recording a dependency if tracking.
    pub fn get(&self) -> T {
        self.track();
        self.cell.value.borrow().clone()
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.cell.value.borrow().clone()
    }

    /// Borrow the current value, recording a dependency if tracking.
    ///
    /// The signal must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.cell.value.borrow())
    }

    /// Set a new value. Returns whether the write was accepted.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.cell.value.borrow_mut();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.cell.version.set(self.cell.version.get() + 1);
        if let Some(rt) = self.runtime.upgrade() {
            rt.signal_changed(self.id);
        }
        true
    }

    /// Write the value computed from the current one and return what the
    /// signal holds afterwards.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> T {
        let next = f(&self.cell.value.borrow());
        self.set(next);
        self.get_untracked()
    }

    /// Number of accepted writes so far.
    pub fn version(&self) -> u64 {
        self.cell.version.get()
    }

    pub fn subscriber_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |rt| rt.subscriber_count(self.id))
    }

    /// Call `callback` with the new value after every accepted write.
    pub fn on(&self, callback: impl FnMut(T) + 'static) -> Disposer {
        self.subscribe(Box::new(callback))
    }

    pub fn dispose(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.dispose(self.id);
        }
    }

    fn track(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.observe(self.id);
        }
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id,
            cell: self.cell.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &*self.cell.value.borrow())
            .field("version", &self.cell.version.get())
            .finish()
    }
}

impl<T> Observable for Signal<T>
where
    T: Clone + PartialEq + 'static,
{
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Signal
    }

    fn subscribe(&self, callback: Box<dyn FnMut(T)>) -> Disposer {
        let this = self.clone();
        subscription(&self.runtime, move || this.get(), callback)
    }
}

impl<T> Readable for Signal<T>
where
    T: Clone + PartialEq + 'static,
{
    fn read(&self) -> T {
        self.get()
    }

    fn try_snapshot(&self) -> Result<T> {
        Ok(self.get_untracked())
    }
}

/// A valueless signal. Every [`notify`](Self::notify) counts as a change.
///
/// Use it to mark state held outside the graph as mutated.
#[derive(Clone)]
pub struct Trigger {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
    version: Rc<Cell<u64>>,
}

impl Trigger {
    pub(crate) fn new(rt: &RuntimeInner) -> Self {
        Self {
            runtime: rt.weak(),
            id: rt.create_child(None, NodeKind::Signal, false, None),
            version: Rc::new(Cell::new(0)),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Record a dependency on this trigger if tracking.
    pub fn track(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.observe(self.id);
        }
    }

    /// Notify every subscriber.
    pub fn notify(&self) {
        self.version.set(self.version.get() + 1);
        if let Some(rt) = self.runtime.upgrade() {
            rt.signal_changed(self.id);
        }
    }

    pub fn version(&self) -> u64 {
        self.version.get()
    }

    pub fn on(&self, callback: impl FnMut(()) + 'static) -> Disposer {
        self.subscribe(Box::new(callback))
    }

    pub fn dispose(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.dispose(self.id);
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("version", &self.version.get())
            .finish()
    }
}

impl Observable for Trigger {
    type Value = ();

    fn node_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Signal
    }

    fn subscribe(&self, callback: Box<dyn FnMut(())>) -> Disposer {
        let this = self.clone();
        subscription(&self.runtime, move || this.track(), callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    #[test]
    fn signal_basic() {
        let rt = Runtime::new();
        let signal = rt.signal(42);
        assert_eq!(signal.get(), 42);

        assert!(signal.set(100));
        assert_eq!(signal.get(), 100);
    }

    #[test]
    fn equal_write_is_rejected() {
        let rt = Runtime::new();
        let signal = rt.signal(String::from("a"));
        assert!(!signal.set(String::from("a")));
        assert_eq!(signal.version(), 0);
        assert!(signal.set(String::from("b")));
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn signal_update() {
        let rt = Runtime::new();
        let signal = rt.signal(10);
        assert_eq!(signal.update(|x| x + 5), 15);
        assert_eq!(signal.update(|x| *x), 15);
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn with_borrows_in_place() {
        let rt = Runtime::new();
        let signal = rt.signal(vec![1, 2, 3]);
        assert_eq!(signal.with(|v| v.len()), 3);
    }

    #[test]
    fn signal_with_runs_initializer() {
        let rt = Runtime::new();
        let signal = rt.signal_with(|| "init".to_string());
        assert_eq!(signal.get(), "init");
    }

    #[test]
    fn signal_outlives_runtime() {
        let signal = {
            let rt = Runtime::new();
            rt.signal(1)
        };
        assert!(signal.set(2));
        assert_eq!(signal.get(), 2);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn trigger_notifies_every_time() {
        let rt = Runtime::new();
        let trigger = rt.trigger();
        let runs = Rc::new(Cell::new(0));
        let runs_in_effect = runs.clone();
        let trigger_in_effect = trigger.clone();
        rt.effect(move || {
            trigger_in_effect.track();
            runs_in_effect.set(runs_in_effect.get() + 1);
        });

        trigger.notify();
        rt.sync().unwrap();
        trigger.notify();
        rt.sync().unwrap();
        assert_eq!(runs.get(), 3);
        assert_eq!(trigger.version(), 2);
    }
}
