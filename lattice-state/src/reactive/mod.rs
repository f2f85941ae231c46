//! Reactive Primitives
//!
//! This module implements the signal engine the rest of the crate is built
//! on: signals, memos, and effects, plus `untracked` and `batch`.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the read is recorded
//! as a dependency. When the signal's value changes, all dependents are
//! invalidated.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changed and it is read again.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects are the only thing the runtime runs eagerly.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, record the read.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod signal;
mod context;
mod subscriber;
mod memo;
mod effect;
mod runtime;

pub use signal::{signal, Signal};
pub use context::{untracked, Dependencies, ReactiveContext};
pub use subscriber::{SourceId, SubscriberId};
pub use memo::{computed, Memo, MemoState};
pub use effect::Effect;
pub use runtime::{batch, Reactive, ReactiveHandle, Runtime, Staleness};
