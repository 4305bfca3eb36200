//! External store adapter.
//!
//! UI layers that integrate external state through a "subscribe, then pull
//! a snapshot" hook need two functions: `subscribe(on_change)` and
//! `get_snapshot()`. [`ExternalStore`] provides both over any signal or
//! computed.
//!
//! `on_change` fires at most once per flush, and only when the observed
//! value changed. `get_snapshot` never fails: if reading the source errors,
//! the last good snapshot is returned.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::subscriber::{Disposer, Readable};
use crate::error::Result;

pub struct ExternalStore<T> {
    snapshot: Rc<dyn Fn() -> Result<T>>,
    subscribe: Rc<dyn Fn(Box<dyn FnMut(T)>) -> Disposer>,
    last: Rc<RefCell<T>>,
}

impl<T: Clone + PartialEq + 'static> ExternalStore<T> {
    /// Wrap `source`, taking its first snapshot now.
    pub fn new<R>(source: &R) -> Result<Self>
    where
        R: Readable<Value = T> + Clone + 'static,
    {
        let initial = source.try_snapshot()?;
        let reader = source.clone();
        let target = source.clone();
        Ok(Self {
            snapshot: Rc::new(move || reader.try_snapshot()),
            subscribe: Rc::new(move |callback| target.subscribe(callback)),
            last: Rc::new(RefCell::new(initial)),
        })
    }

    /// Call `on_change` after a flush that left the source with a value
    /// different from the one it had at the previous notification.
    pub fn subscribe(&self, mut on_change: impl FnMut() + 'static) -> Disposer {
        let mut seen = self.get_snapshot();
        (self.subscribe)(Box::new(move |value| {
            if value != seen {
                seen = value;
                on_change();
            }
        }))
    }

    /// Current value of the source.
    pub fn get_snapshot(&self) -> T {
        match (self.snapshot)() {
            Ok(value) => {
                *self.last.borrow_mut() = value.clone();
                value
            }
            Err(err) => {
                tracing::warn!(error = %err, "snapshot failed, returning last value");
                self.last.borrow().clone()
            }
        }
    }
}

impl<T> Clone for ExternalStore<T> {
    fn clone(&self) -> Self {
        Self {
            snapshot: self.snapshot.clone(),
            subscribe: self.subscribe.clone(),
            last: self.last.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ExternalStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalStore")
            .field("last", &*self.last.borrow())
            .finish()
    }
}
