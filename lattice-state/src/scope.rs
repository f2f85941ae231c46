//! Scopes and disposers.
//!
//! A [`Scope`] collects cleanup callbacks and runs them, in collection order,
//! when it is closed. While [`Scope::collect`] is running, the scope is the
//! *current* scope of the thread: [`un`] and everything built on it
//! (effects, reactions, action subscriptions) register their teardown there.
//!
//! [`Scoped<T>`] ties a scope to the lifetime of one instance. The service
//! provider builds every service inside one.

use std::cell::RefCell;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

type Cleanup = Box<dyn FnOnce() + Send>;

thread_local! {
    static ACTIVE: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

/// An ordered collection of cleanup callbacks, closed at most once.
#[derive(Clone, Default)]
pub struct Scope {
    inner: Arc<Mutex<ScopeState>>,
}

#[derive(Default)]
struct ScopeState {
    cleanups: Vec<Cleanup>,
    closed: bool,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// The scope `collect` is currently running for on this thread.
    pub fn current() -> Option<Scope> {
        ACTIVE.with(|active| active.borrow().last().cloned())
    }

    /// Add a cleanup. Fails once the scope has been closed.
    pub fn add(&self, cleanup: impl FnOnce() + Send + 'static) -> Result<()> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(Error::ScopeClosed);
        }
        state.cleanups.push(Box::new(cleanup));
        Ok(())
    }

    /// Run `f` with this scope as the current scope.
    pub fn collect<R>(&self, f: impl FnOnce() -> R) -> R {
        ACTIVE.with(|active| active.borrow_mut().push(self.clone()));

        struct PopGuard;

        impl Drop for PopGuard {
            fn drop(&mut self) {
                ACTIVE.with(|active| {
                    active.borrow_mut().pop();
                });
            }
        }

        let _guard = PopGuard;
        f()
    }

    /// Run every collected cleanup in collection order and close the scope.
    /// Closing an already closed scope does nothing.
    pub fn close(&self) {
        let cleanups = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.cleanups)
        };

        tracing::trace!(cleanups = cleanups.len(), "closing scope");
        for cleanup in cleanups {
            cleanup();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of cleanups waiting to run.
    pub fn len(&self) -> usize {
        self.inner.lock().cleanups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Scope")
            .field("cleanups", &state.cleanups.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Register `cleanup` with the current scope.
///
/// Returns `false` when there is no current scope or it is already closed;
/// the cleanup is dropped without running in that case.
pub fn un(cleanup: impl FnOnce() + Send + 'static) -> bool {
    let Some(scope) = Scope::current() else {
        return false;
    };
    match scope.add(cleanup) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(%err, "cleanup rejected");
            false
        }
    }
}

/// Idempotent teardown handle returned by effects, reactions and
/// subscriptions.
///
/// Dropping a `Disposer` does not dispose; only [`Disposer::dispose`] does.
#[derive(Clone)]
pub struct Disposer {
    inner: Arc<Mutex<Option<Cleanup>>>,
}

impl Disposer {
    pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(dispose)))),
        }
    }

    /// Run the teardown. Later calls do nothing.
    pub fn dispose(&self) {
        let dispose = self.inner.lock().take();
        if let Some(dispose) = dispose {
            dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Also dispose when the current scope closes.
    pub(crate) fn collected(self) -> Self {
        let handle = self.clone();
        un(move || handle.dispose());
        self
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// An instance that owns the scope it was constructed in.
///
/// Everything the constructor registered through [`un`] runs when the
/// `Scoped` is closed or dropped.
#[derive(Debug)]
pub struct Scoped<T> {
    instance: Arc<T>,
    scope: Scope,
}

impl<T> Scoped<T> {
    /// Construct `T` inside a fresh scope.
    pub fn new(factory: impl FnOnce() -> T) -> Self {
        let scope = Scope::new();
        let instance = Arc::new(scope.collect(factory));
        Self { instance, scope }
    }

    /// Construct `T` inside a fresh scope; on failure the scope is closed
    /// before the error is returned.
    pub fn try_new<E>(factory: impl FnOnce() -> Result<T, E>) -> Result<Self, E> {
        let scope = Scope::new();
        match scope.collect(factory) {
            Ok(instance) => Ok(Self {
                instance: Arc::new(instance),
                scope,
            }),
            Err(err) => {
                scope.close();
                Err(err)
            }
        }
    }

    pub fn instance(&self) -> &Arc<T> {
        &self.instance
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Run the instance's cleanups now.
    pub fn close(&self) {
        self.scope.close();
    }
}

impl<T> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.instance
    }
}

impl<T> Drop for Scoped<T> {
    fn drop(&mut self) {
        self.scope.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn close_runs_cleanups_in_collection_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let scope = Scope::new();

        for i in 0..3 {
            let order = order.clone();
            scope.add(move || order.lock().push(i)).unwrap();
        }
        assert_eq!(scope.len(), 3);

        scope.close();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(scope.is_closed());
    }

    #[test]
    fn close_is_idempotent_and_rejects_late_cleanups() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scope = Scope::new();

        let r = runs.clone();
        scope.add(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        scope.close();
        scope.close();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert!(matches!(scope.add(|| {}), Err(Error::ScopeClosed)));
    }

    #[test]
    fn un_targets_the_innermost_current_scope() {
        let outer = Scope::new();
        let inner = Scope::new();

        assert!(!un(|| {}));

        outer.collect(|| {
            assert!(un(|| {}));
            inner.collect(|| {
                assert!(un(|| {}));
                assert!(un(|| {}));
            });
        });

        assert_eq!(outer.len(), 1);
        assert_eq!(inner.len(), 2);
        assert!(Scope::current().is_none());
    }

    #[test]
    fn disposer_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let disposer = Disposer::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let copy = disposer.clone();

        disposer.dispose();
        copy.dispose();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(copy.is_disposed());
    }

    #[test]
    fn scoped_closes_on_drop() {
        let closed = Arc::new(AtomicUsize::new(0));

        let c = closed.clone();
        let owned = Scoped::new(move || {
            un(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
            7
        });

        assert_eq!(*owned, 7);
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        drop(owned);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_construction_releases_partial_registrations() {
        let closed = Arc::new(AtomicUsize::new(0));

        let c = closed.clone();
        let result = Scoped::<u8>::try_new(move || {
            un(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
            Err("boom")
        });

        assert_eq!(result.err(), Some("boom"));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
