//! Ripple Core
//!
//! This crate provides a glitch-free reactive dataflow engine. It
//! implements:
//!
//! - Reactive primitives (signals, computeds, effects, events, triggers)
//! - Automatic dependency tracking with edge diffing on every evaluation
//! - Level-ordered scheduling: each subscriber runs at most once per flush,
//!   after everything it reads has settled
//! - Lazy computed lifecycle and cascading disposal of nested nodes
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: node arena, bidirectional edges, levels and the pending queue
//! - `reactive`: the runtime, the tracking context and the node handles
//! - `config`: runtime bounds
//! - `error`: the error type shared by fallible entry points
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use ripple_core::Runtime;
//!
//! let rt = Runtime::new();
//!
//! // Create a signal
//! let count = rt.signal(1);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     rt.computed(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! {
//!     let log = log.clone();
//!     let doubled = doubled.clone();
//!     rt.effect(move || log.borrow_mut().push(doubled.get()));
//! }
//!
//! // Update the signal; the effect runs on the next flush
//! count.set(2);
//! rt.sync().unwrap();
//! assert_eq!(*log.borrow(), vec![2, 4]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result};
pub use graph::{GraphStats, NodeId, NodeKind};
pub use reactive::{
    Computed, ComputedOptions, Disposer, Effect, Event, Executor, ExternalStore, FlushTask,
    ImmediateExecutor, ManualExecutor, Observable, Readable, Runtime, Signal, TokioExecutor,
    Trigger,
};
