//! Computed Implementation
//!
//! A Computed is a cached derived value. It is a subscriber of whatever its
//! function reads and a readable source for whoever reads it.
//!
//! # How Computeds Work
//!
//! 1. A lazy computed (the default) does nothing until it is read. A
//!    tracked read activates it: the function runs, its sources are
//!    recorded, its value is cached and its level computed.
//!
//! 2. While it has subscribers it stays active. When a source changes it is
//!    queued at its level, re-runs, and notifies its own subscribers only if
//!    the new value differs from the cached one.
//!
//! 3. When its last subscriber goes away it drops its value and its edges.
//!    An untracked read of an idle lazy computed evaluates it for that read
//!    only.
//!
//! An eager computed is activated at construction and kept live until it
//! is disposed.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{ReadMode, Reactive, RuntimeInner};
use super::subscriber::{subscription, Disposer, Observable, Readable};
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

/// Lifecycle options for a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputedOptions {
    /// Tear down when the last subscriber goes away.
    pub lazy: bool,
}

impl ComputedOptions {
    /// Activated at construction and kept live until disposed.
    pub fn eager() -> Self {
        Self { lazy: false }
    }
}

impl Default for ComputedOptions {
    fn default() -> Self {
        Self { lazy: true }
    }
}

struct ComputedCell<T> {
    compute: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
}

impl<T> Reactive for ComputedCell<T>
where
    T: PartialEq + 'static,
{
    fn run(&self, rt: &RuntimeInner, id: NodeId) -> Result<bool> {
        let next = rt.track(id, || (self.compute)())?;
        let mut value = self.value.borrow_mut();
        if value.as_ref() == Some(&next) {
            return Ok(false);
        }
        *value = Some(next);
        Ok(true)
    }

    fn release(&self, _id: NodeId) {
        let stale = self.value.borrow_mut().take();
        drop(stale);
    }
}

/// A read-only derived value.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.signal(2);
/// let doubled = {
///     let count = count.clone();
///     rt.computed(move || count.get() * 2)
/// };
/// assert_eq!(doubled.get(), 4);
/// ```
pub struct Computed<T> {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
    cell: Rc<ComputedCell<T>>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    pub(crate) fn new(
        rt: &RuntimeInner,
        compute: impl Fn() -> T + 'static,
        options: ComputedOptions,
    ) -> Self {
        let cell = Rc::new(ComputedCell {
            compute: Box::new(compute),
            value: RefCell::new(None),
        });
        let id = rt.create_node(
            NodeKind::Computed,
            options.lazy,
            Some(cell.clone() as Rc<dyn Reactive>),
        );
        if !options.lazy {
            if let Err(err) = rt.activate(id) {
                rt.fail(err);
            }
        }
        Self {
            runtime: rt.weak(),
            id,
            cell,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value, recording a dependency if tracking.
    ///
    /// # Panics
    ///
    /// Panics if the read detects a cycle or the activation worklist
    /// diverges. Inside another evaluation the error is instead returned
    /// from the call that started the work.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => match self.runtime.upgrade() {
                Some(rt) => rt.fail(err),
                None => panic!("{err}"),
            },
        }
    }

    /// Get the current value, recording a dependency if tracking.
    pub fn try_get(&self) -> Result<T> {
        let Some(rt) = self.runtime.upgrade() else {
            return Ok((self.cell.compute)());
        };
        let mode = rt.prepare_read(self.id)?;
        if let ReadMode::Detached = mode {
            return Ok(rt.untracked(|| (self.cell.compute)()));
        }

        rt.observe(self.id);
        let cached = self.cell.value.borrow().clone();
        let value = match cached {
            Some(value) => value,
            None => rt.untracked(|| (self.cell.compute)()),
        };
        if let ReadMode::Transient = mode {
            rt.release_if_unobserved(self.id);
        }
        Ok(value)
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        match self.runtime.upgrade() {
            Some(rt) => rt.untracked(|| self.get()),
            None => (self.cell.compute)(),
        }
    }

    /// Whether the computed currently holds a value and live edges.
    pub fn is_active(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|rt| rt.is_active(self.id))
    }

    /// Scheduling level, or `None` once disposed.
    pub fn level(&self) -> Option<u32> {
        self.runtime.upgrade().and_then(|rt| rt.level(self.id))
    }

    pub fn subscriber_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |rt| rt.subscriber_count(self.id))
    }

    /// Call `callback` with the new value whenever it changes.
    pub fn on(&self, callback: impl FnMut(T) + 'static) -> Disposer {
        self.subscribe(Box::new(callback))
    }

    pub fn dispose(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.dispose(self.id);
        }
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id,
            cell: self.cell.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id)
            .field("cached", &*self.cell.value.borrow())
            .finish()
    }
}

impl<T> Observable for Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Computed
    }

    fn subscribe(&self, callback: Box<dyn FnMut(T)>) -> Disposer {
        let this = self.clone();
        subscription(&self.runtime, move || this.get(), callback)
    }
}

impl<T> Readable for Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    fn read(&self) -> T {
        self.get()
    }

    fn try_snapshot(&self) -> Result<T> {
        match self.runtime.upgrade() {
            Some(rt) => rt.untracked(|| self.try_get()),
            None => Ok((self.cell.compute)()),
        }
    }
}
