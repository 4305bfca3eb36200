//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued in the terminal
//!    bucket and runs after every computed in the same flush has settled.
//!
//! 3. Each run replaces the previous dependency set with what the new run
//!    read. Effects and computeds created by the previous run are disposed
//!    before the new run starts.
//!
//! # Cleanup
//!
//! Effects created with [`Runtime::effect_with_cleanup`] return a cleanup
//! function. It is called before the effect re-runs and when the effect is
//! disposed.
//!
//! [`Runtime::effect_with_cleanup`]: super::Runtime::effect_with_cleanup

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{Reactive, RuntimeInner};
use super::subscriber::{DisposeOnUnwind, Disposer};
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

type Cleanup = Box<dyn FnOnce()>;

struct EffectCell {
    body: RefCell<Box<dyn FnMut() -> Option<Cleanup>>>,
    cleanup: RefCell<Option<Cleanup>>,
    runs: Cell<usize>,
}

impl EffectCell {
    fn take_cleanup(&self) -> Option<Cleanup> {
        self.cleanup.borrow_mut().take()
    }
}

impl Reactive for EffectCell {
    fn run(&self, rt: &RuntimeInner, id: NodeId) -> Result<bool> {
        if let Some(cleanup) = self.take_cleanup() {
            rt.untracked(cleanup);
        }
        let cleanup = rt.track(id, || {
            let mut body = self.body.borrow_mut();
            body()
        })?;
        self.runs.set(self.runs.get() + 1);

        // Disposed by its own body: nobody will call release again.
        if !rt.contains(id) {
            if let Some(cleanup) = cleanup {
                rt.untracked(cleanup);
            }
        } else {
            *self.cleanup.borrow_mut() = cleanup;
        }
        Ok(false)
    }

    fn release(&self, _id: NodeId) {
        if let Some(cleanup) = self.take_cleanup() {
            cleanup();
        }
    }
}

/// Handle to a running effect.
///
/// Dropping the handle does not stop the effect; call
/// [`dispose`](Self::dispose).
#[derive(Clone)]
pub struct Effect {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
    cell: Rc<EffectCell>,
}

impl Effect {
    pub(crate) fn new(
        rt: &RuntimeInner,
        body: impl FnMut() -> Option<Cleanup> + 'static,
    ) -> Self {
        let cell = Rc::new(EffectCell {
            body: RefCell::new(Box::new(body)),
            cleanup: RefCell::new(None),
            runs: Cell::new(0),
        });
        let id = rt.create_node(
            NodeKind::Effect,
            false,
            Some(cell.clone() as Rc<dyn Reactive>),
        );
        tracing::trace!(node = %id, "running new effect");
        let guard = DisposeOnUnwind::new(rt, id);
        if let Err(err) = rt.run_node(id) {
            rt.fail(err);
        }
        guard.defuse();
        Self {
            runtime: rt.weak(),
            id,
            cell,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.cell.runs.get()
    }

    /// Number of sources read by the last run.
    pub fn dependency_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |rt| rt.source_count(self.id))
    }

    /// Stop the effect and run its cleanup. Idempotent.
    pub fn dispose(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.dispose(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.runtime
            .upgrade()
            .map_or(true, |rt| !rt.contains(self.id))
    }

    /// A detachable disposer for this effect.
    pub fn disposer(&self) -> Disposer {
        Disposer::new(self.runtime.clone(), self.id)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::Runtime;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn effect_runs_on_creation() {
        let rt = Runtime::new();
        let ran = Rc::new(Cell::new(false));
        let ran_in_effect = ran.clone();

        let effect = rt.effect(move || ran_in_effect.set(true));

        assert!(ran.get());
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let rt = Runtime::new();
        let a = rt.signal(0);
        let a_in_effect = a.clone();
        let effect = rt.effect(move || {
            a_in_effect.get();
        });
        assert_eq!(effect.dependency_count(), 1);

        effect.dispose();
        assert!(effect.is_disposed());
        a.set(1);
        rt.sync().unwrap();

        assert_eq!(effect.run_count(), 1);
        assert_eq!(a.subscriber_count(), 0);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let rt = Runtime::new();
        let a = rt.signal(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_in_effect = log.clone();
        let a_in_effect = a.clone();
        let effect = rt.effect_with_cleanup(move || {
            let value = a_in_effect.get();
            log_in_effect.borrow_mut().push(format!("run {value}"));
            let log = log_in_effect.clone();
            move || log.borrow_mut().push(format!("cleanup {value}"))
        });

        a.set(1);
        rt.sync().unwrap();
        effect.dispose();
        effect.dispose();

        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn nested_effects_are_disposed_on_rerun() {
        let rt = Runtime::new();
        let outer_signal = rt.signal(0);
        let inner_runs = Rc::new(Cell::new(0));
        let inner_signal = rt.signal(0);

        let rt_in_effect = rt.clone();
        let outer_in_effect = outer_signal.clone();
        let inner_in_effect = inner_signal.clone();
        let runs = inner_runs.clone();
        rt.effect(move || {
            outer_in_effect.get();
            let inner = inner_in_effect.clone();
            let runs = runs.clone();
            rt_in_effect.effect(move || {
                inner.get();
                runs.set(runs.get() + 1);
            });
        });
        assert_eq!(inner_runs.get(), 1);
        assert_eq!(rt.stats().effects, 2);

        outer_signal.set(1);
        rt.sync().unwrap();
        assert_eq!(inner_runs.get(), 2);
        assert_eq!(rt.stats().effects, 2);
        assert_eq!(inner_signal.subscriber_count(), 1);

        inner_signal.set(1);
        rt.sync().unwrap();
        assert_eq!(inner_runs.get(), 3);
    }

    #[test]
    fn effect_disposing_itself_runs_cleanup() {
        let rt = Runtime::new();
        let cleaned = Rc::new(Cell::new(false));
        let cleaned_in_effect = cleaned.clone();
        let slot: Rc<RefCell<Option<crate::Effect>>> = Rc::new(RefCell::new(None));
        let slot_in_effect = slot.clone();
        let a = rt.signal(0);
        let a_in_effect = a.clone();

        let effect = rt.effect_with_cleanup(move || {
            if a_in_effect.get() > 0 {
                if let Some(effect) = slot_in_effect.borrow().as_ref() {
                    effect.dispose();
                }
            }
            let cleaned = cleaned_in_effect.clone();
            move || cleaned.set(true)
        });
        *slot.borrow_mut() = Some(effect.clone());

        a.set(1);
        rt.sync().unwrap();
        assert!(effect.is_disposed());
        assert!(cleaned.get());
    }
}
