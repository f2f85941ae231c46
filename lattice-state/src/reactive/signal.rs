//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! notifies the computations that read it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    read is recorded as a dependency of that context.
//!
//! 2. When a signal's value changes, the runtime invalidates every dependent
//!    and re-runs the affected effects.
//!
//! 3. Writing a value equal to the current one is not a change.
//!
//! # Thread Safety
//!
//! The value lives behind a `parking_lot` RwLock and the handle is cheap to
//! clone; every clone refers to the same cell.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::subscriber::{next_source_id, SourceId};

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (re-runs dependent effects)
/// count.set(5);
/// ```
pub struct Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

struct SignalInner<T> {
    id: SourceId,
    value: RwLock<T>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: next_source_id(),
                value: RwLock::new(value),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also records the signal as
    /// a dependency of the running computation.
    pub fn get(&self) -> T {
        ReactiveContext::track_dependency(self.inner.id);
        self.inner.value.read().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the current value (tracked) without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        ReactiveContext::track_dependency(self.inner.id);
        f(&self.inner.value.read())
    }

    /// Set a new value and notify dependents if it differs from the
    /// current one.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.inner.value.write();
            if *guard == value {
                return;
            }
            *guard = value;
        }

        Runtime::notify_source_change(self.inner.id);
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = f(&self.inner.value.read());
        self.set(new_value);
    }

    /// Mutate the value in place. Always notifies dependents.
    pub fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        f(&mut self.inner.value.write());
        Runtime::notify_source_change(self.inner.id);
    }

    /// Get the number of computations currently depending on this signal.
    pub fn subscriber_count(&self) -> usize {
        Runtime::subscriber_count(self.inner.id)
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Create a signal. Shorthand for [`Signal::new`].
pub fn signal<T>(value: T) -> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Signal::new(value)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
