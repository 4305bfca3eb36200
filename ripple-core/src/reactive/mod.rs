//! Reactive Primitives
//!
//! This module implements the reactive system: signals, computeds, effects
//! and events, connected by a per-runtime dependency tracker and scheduler.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracked evaluation (a computed or an effect), the read is
//! recorded as a dependency. When the value changes, every dependent is
//! queued for the next flush.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies changes, and only notifies its own
//! dependents when the result actually differs. Lazy computeds hold no
//! value and no edges while nobody reads them.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are terminal: nothing depends on them, and
//! they run after every computed in the same flush has settled.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic: the runtime keeps a stack of
//! evaluation frames, and every read consults the top frame. The stack is
//! owned by the [`Runtime`], not by the thread, so independent runtimes
//! can coexist.

mod computed;
mod context;
mod effect;
mod event;
mod executor;
mod runtime;
mod signal;
mod store;
mod subscriber;

pub use computed::{Computed, ComputedOptions};
pub use effect::Effect;
pub use event::Event;
pub use executor::{Executor, FlushTask, ImmediateExecutor, ManualExecutor, TokioExecutor};
pub use runtime::Runtime;
pub use signal::{Signal, Trigger};
pub use store::ExternalStore;
pub use subscriber::{Disposer, Observable, Readable};

pub(crate) use runtime::Reactive;
