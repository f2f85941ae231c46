//! Lazy singleton services.
//!
//! A [`ServiceHandle`] owns a factory and at most one live instance. The
//! instance is built on first access, inside its own scope, and stays until
//! [`ServiceHandle::destroy`] tears it down. The next access after that builds
//! a fresh one.
//!
//! ```rust,ignore
//! struct Counter {
//!     value: Field<i32>,
//! }
//!
//! impl Service for Counter {}
//!
//! let counter = service(|| Counter { value: Field::new(0) });
//! counter.with(|c| c.value.update(|v| v + 1))?;
//! counter.destroy();
//! ```

use std::any::type_name;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{BoxError, Result};
use crate::model::{self, Model};
use crate::provider::{provide, release};
use crate::scope::Scoped;

/// Lifecycle hooks of a service. Both default to doing nothing.
pub trait Service: Send + Sync + 'static {
    /// Called by [`ServiceHandle::instantiate`] once the instance exists.
    fn instantiate(&self) {}

    /// Called by [`ServiceHandle::destroy`] before the instance is released.
    fn destroy(&self) {}
}

type Factory<T> = Box<dyn Fn() -> std::result::Result<T, BoxError> + Send + Sync>;

/// Shared handle to a lazily constructed service. Clones share the same
/// live instance.
pub struct ServiceHandle<T: Service> {
    inner: Arc<HandleInner<T>>,
}

struct HandleInner<T: Service> {
    factory: Factory<T>,
    slot: Mutex<Option<Scoped<T>>>,
}

impl<T: Service> ServiceHandle<T> {
    fn from_factory(factory: Factory<T>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                factory,
                slot: Mutex::new(None),
            }),
        }
    }

    /// A handle whose instance is `T::default()`.
    pub fn from_default() -> Self
    where
        T: Default,
    {
        service(T::default)
    }

    /// The live instance, constructing it first if needed.
    pub fn get(&self) -> Result<Arc<T>> {
        if let Some(live) = self.live() {
            return Ok(live);
        }

        let built = provide(|| (self.inner.factory)())?;

        let mut slot = self.inner.slot.lock();
        if let Some(existing) = slot.as_ref() {
            // A nested access finished first; keep its instance.
            let existing = Arc::clone(existing.instance());
            drop(slot);
            tracing::debug!(service = type_name::<T>(), "releasing duplicate instance");
            release(built);
            return Ok(existing);
        }

        let instance = Arc::clone(built.instance());
        stamp(&instance, Arc::downgrade(&self.inner));
        *slot = Some(built);
        drop(slot);

        tracing::debug!(service = type_name::<T>(), "constructed service");
        Ok(instance)
    }

    /// Run `f` against the live instance.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let instance = self.get()?;
        Ok(f(&instance))
    }

    /// Construct if needed, then run the instance's `instantiate` hook.
    pub fn instantiate(&self) -> Result<()> {
        self.get()?.instantiate();
        Ok(())
    }

    /// Run the instance's `destroy` hook and release it.
    ///
    /// Does nothing when no instance is live. The hook runs exactly once per
    /// instance, after the handle has already let go of it.
    pub fn destroy(&self) {
        self.release_live(None);
    }

    /// Tear down the live instance, but only if it is the one identified by
    /// `expected` when given.
    fn release_live(&self, expected: Option<usize>) {
        let released = {
            let mut slot = self.inner.slot.lock();
            let matches = slot.as_ref().is_some_and(|live| {
                expected.map_or(true, |key| identity(live.instance()) == key)
            });
            if !matches {
                return;
            }
            slot.take()
        };
        let Some(released) = released else {
            return;
        };

        unstamp(released.instance());
        released.instance().destroy();
        release(released);
        tracing::debug!(service = type_name::<T>(), "destroyed service");
    }

    /// Whether an instance currently exists.
    pub fn is_live(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    fn live(&self) -> Option<Arc<T>> {
        self.inner
            .slot
            .lock()
            .as_ref()
            .map(|scoped| Arc::clone(scoped.instance()))
    }
}

impl<T: Service + Model> ServiceHandle<T> {
    /// Read reactive field `name` of the live instance.
    pub fn read<V: 'static>(&self, name: &str) -> Result<V> {
        model::read(&*self.get()?, name)
    }

    /// Write reactive field `name` of the live instance.
    pub fn write<V: Send + 'static>(&self, name: &str, value: V) -> Result<()> {
        model::write(&*self.get()?, name, value)
    }
}

impl<T: Service> Clone for ServiceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Service> std::fmt::Debug for ServiceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service", &type_name::<T>())
            .field("live", &self.is_live())
            .finish()
    }
}

impl<T: Service> Drop for HandleInner<T> {
    fn drop(&mut self) {
        if let Some(live) = self.slot.get_mut().as_ref() {
            unstamp(live.instance());
        }
    }
}

/// A service built by `factory` on first access.
pub fn service<T, F>(factory: F) -> ServiceHandle<T>
where
    T: Service,
    F: Fn() -> T + Send + Sync + 'static,
{
    ServiceHandle::from_factory(Box::new(move || Ok(factory())))
}

/// A service whose factory can fail. The error reaches whichever access
/// triggered construction.
pub fn try_service<T, E, F>(factory: F) -> ServiceHandle<T>
where
    T: Service,
    E: Into<BoxError>,
    F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
{
    ServiceHandle::from_factory(Box::new(move || factory().map_err(Into::into)))
}

// ----------------------------------------------------------------------------
// Lifecycle side table
// ----------------------------------------------------------------------------

struct Lifecycle {
    instantiate: Box<dyn Fn() + Send + Sync>,
    destroy: Box<dyn Fn() + Send + Sync>,
}

static LIFECYCLES: OnceLock<DashMap<usize, Arc<Lifecycle>>> = OnceLock::new();

fn lifecycles() -> &'static DashMap<usize, Arc<Lifecycle>> {
    LIFECYCLES.get_or_init(DashMap::new)
}

fn identity<T>(instance: &Arc<T>) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}

fn stamp<T: Service>(instance: &Arc<T>, handle: Weak<HandleInner<T>>) {
    let key = identity(instance);
    let on_destroy = handle.clone();
    let lifecycle = Lifecycle {
        instantiate: Box::new(move || {
            let live = handle
                .upgrade()
                .map(|inner| ServiceHandle { inner })
                .and_then(|handle| handle.live());
            if let Some(live) = live.filter(|live| identity(live) == key) {
                live.instantiate();
            }
        }),
        destroy: Box::new(move || {
            if let Some(inner) = on_destroy.upgrade() {
                ServiceHandle { inner }.release_live(Some(key));
            }
        }),
    };
    lifecycles().insert(key, Arc::new(lifecycle));
}

fn unstamp<T>(instance: &Arc<T>) {
    lifecycles().remove(&identity(instance));
}

fn lifecycle_of<T>(instance: &Arc<T>) -> Option<Arc<Lifecycle>> {
    lifecycles()
        .get(&identity(instance))
        .map(|entry| Arc::clone(entry.value()))
}

/// Run the `instantiate` hook of a service instance.
///
/// Returns `false` when `instance` is not a live service instance.
pub fn instantiate<T: Service>(instance: &Arc<T>) -> bool {
    match lifecycle_of(instance) {
        Some(lifecycle) => {
            (lifecycle.instantiate)();
            true
        }
        None => false,
    }
}

/// Destroy the service that owns `instance`.
///
/// Returns `false` when `instance` is not a live service instance.
pub fn destroy<T: Service>(instance: &Arc<T>) -> bool {
    match lifecycle_of(instance) {
        Some(lifecycle) => {
            (lifecycle.destroy)();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::scope::un;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default, Debug)]
    struct Spies {
        created: AtomicUsize,
        instantiated: AtomicUsize,
        destroyed: AtomicUsize,
        cleaned: AtomicUsize,
    }

    #[derive(Debug)]
    struct Spied {
        serial: usize,
        spies: Arc<Spies>,
    }

    impl Spied {
        fn build(spies: &Arc<Spies>) -> Self {
            let serial = spies.created.fetch_add(1, Ordering::SeqCst) + 1;
            let s = spies.clone();
            un(move || {
                s.cleaned.fetch_add(1, Ordering::SeqCst);
            });
            Self {
                serial,
                spies: spies.clone(),
            }
        }
    }

    impl Service for Spied {
        fn instantiate(&self) {
            self.spies.instantiated.fetch_add(1, Ordering::SeqCst);
        }

        fn destroy(&self) {
            self.spies.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spied_service(spies: &Arc<Spies>) -> ServiceHandle<Spied> {
        let spies = spies.clone();
        service(move || Spied::build(&spies))
    }

    #[test]
    fn constructs_on_first_access_only() {
        let spies = Arc::new(Spies::default());
        let handle = spied_service(&spies);

        assert!(!handle.is_live());
        assert_eq!(spies.created.load(Ordering::SeqCst), 0);

        let first = handle.get().unwrap();
        let second = handle.clone().get().unwrap();
        handle.with(|p| assert_eq!(p.serial, 1)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(spies.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroy_runs_hook_once_then_rebuilds() {
        let spies = Arc::new(Spies::default());
        let handle = spied_service(&spies);

        handle.destroy();
        assert_eq!(spies.destroyed.load(Ordering::SeqCst), 0);

        handle.get().unwrap();
        handle.destroy();
        handle.destroy();

        assert!(!handle.is_live());
        assert_eq!(spies.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(spies.cleaned.load(Ordering::SeqCst), 1);

        assert_eq!(handle.with(|p| p.serial).unwrap(), 2);
    }

    #[test]
    fn instantiate_constructs_then_calls_hook() {
        let spies = Arc::new(Spies::default());
        let handle = spied_service(&spies);

        handle.instantiate().unwrap();
        assert_eq!(spies.created.load(Ordering::SeqCst), 1);
        assert_eq!(spies.instantiated.load(Ordering::SeqCst), 1);

        handle.instantiate().unwrap();
        assert_eq!(spies.created.load(Ordering::SeqCst), 1);
        assert_eq!(spies.instantiated.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn top_level_lifecycle_goes_through_the_owning_handle() {
        let spies = Arc::new(Spies::default());
        let handle = spied_service(&spies);
        let instance = handle.get().unwrap();

        assert!(instantiate(&instance));
        assert_eq!(spies.instantiated.load(Ordering::SeqCst), 1);

        assert!(destroy(&instance));
        assert!(!handle.is_live());
        assert_eq!(spies.destroyed.load(Ordering::SeqCst), 1);

        // No longer a live service instance.
        assert!(!destroy(&instance));
        assert!(!instantiate(&instance));
    }

    #[test]
    fn destroying_an_old_instance_leaves_its_successor_alone() {
        let spies = Arc::new(Spies::default());
        let handle = spied_service(&spies);

        let old = handle.get().unwrap();
        handle.destroy();
        let current = handle.get().unwrap();

        assert!(!destroy(&old));
        assert!(!instantiate(&old));
        assert!(handle.is_live());
        assert!(Arc::ptr_eq(&handle.get().unwrap(), &current));
        assert_eq!(spies.destroyed.load(Ordering::SeqCst), 1);

        assert!(destroy(&current));
        assert!(!handle.is_live());
    }

    #[test]
    fn unmanaged_instances_are_ignored() {
        let spies = Arc::new(Spies::default());
        let loose = Arc::new(Spied {
            serial: 0,
            spies: spies.clone(),
        });

        assert!(!destroy(&loose));
        assert!(!instantiate(&loose));
        assert_eq!(spies.destroyed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reentrant_construction_keeps_the_nested_instance() {
        let spies = Arc::new(Spies::default());
        let cell: Arc<OnceLock<ServiceHandle<Spied>>> = Arc::new(OnceLock::new());

        let (c, s) = (cell.clone(), spies.clone());
        let handle = service(move || {
            let spied = Spied::build(&s);
            if spied.serial == 1 {
                if let Some(handle) = c.get() {
                    handle.get().unwrap();
                }
            }
            spied
        });
        assert!(cell.set(handle.clone()).is_ok());

        let instance = handle.get().unwrap();
        assert_eq!(instance.serial, 2);
        assert_eq!(spies.created.load(Ordering::SeqCst), 2);
        // The outer build was released.
        assert_eq!(spies.cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(handle.get().unwrap().serial, 2);
    }

    #[test]
    fn construction_failure_reaches_the_caller() {
        let attempts = Arc::new(AtomicUsize::new(0));

        let a = attempts.clone();
        let handle = try_service(move || {
            a.fetch_add(1, Ordering::SeqCst);
            Err::<Spied, _>(std::io::Error::other("offline"))
        });

        let err = handle.get().unwrap_err();
        assert!(matches!(err, Error::Construction { .. }));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("offline"));
        assert!(!handle.is_live());

        // Not cached: the next access tries again.
        assert!(handle.instantiate().is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_services() {
        #[derive(Default)]
        struct Settings {
            retries: u8,
        }
        impl Service for Settings {}

        let handle = ServiceHandle::<Settings>::from_default();
        assert_eq!(handle.with(|s| s.retries).unwrap(), 0);
    }
}
