//! Lattice State
//!
//! This crate provides the lifecycle layer of the Lattice reactive runtime.
//! It implements:
//!
//! - A fine-grained signal engine (signals, memos, effects)
//! - Lazy singleton services with explicit instantiate/destroy
//! - Reaction combinators (`effect`, `reaction`, `fire_immediately`, `when`)
//! - Reactive struct fields with per-instance lazy initialization
//! - Scopes that collect teardown callbacks for an owning lifetime
//! - Lightweight multicast actions
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `scope`: Cleanup collection and scope-bound instances
//! - `provider`: Construction and release of scoped instances
//! - `container`: Lazy singleton services
//! - `reaction`: Combinators built on effects
//! - `field` / `model`: Reactive fields and by-name field access
//! - `action`: Synchronous event emitters
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice_state::{fire_immediately, service, Computed, Field, Service};
//!
//! struct Counter {
//!     count: Field<i32>,
//!     doubled: Computed<i32>,
//! }
//!
//! impl Service for Counter {}
//!
//! let counter = service(|| {
//!     let count = Field::new(1);
//!     let doubled = Computed::new({
//!         let count = count.clone();
//!         move || count.get() * 2
//!     });
//!     Counter { count, doubled }
//! });
//!
//! let c = counter.get()?;
//! fire_immediately(move || c.doubled.get(), |v| println!("doubled: {v}"));
//! // prints "doubled: 2"
//!
//! counter.with(|c| c.count.set(5))?;
//! // prints "doubled: 10"
//! ```

pub mod action;
pub mod config;
pub mod container;
pub mod error;
pub mod field;
pub mod model;
pub mod provider;
pub mod reaction;
pub mod reactive;
pub mod scope;

pub use action::{action, Action};
pub use config::RuntimeConfig;
pub use container::{destroy, instantiate, service, try_service, Service, ServiceHandle};
pub use error::{BoxError, Error, ReadOnlyFieldError, Result};
pub use field::{Computed, Field, FieldKind, ReactiveField};
pub use model::{FieldDescriptor, Model};
pub use reaction::{effect, fire_immediately, reaction, try_when, when, When};
pub use reactive::{batch, computed, signal, untracked, Effect, Memo, Runtime, Signal};
pub use scope::{un, Disposer, Scope, Scoped};
