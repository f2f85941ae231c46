//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a signal it reads changes, the runtime marks the memo dirty.
//!    Everything that reads the memo is flagged for a check.
//!
//! 4. On next access, a dirty memo recomputes and re-tracks its
//!    dependencies. A memo flagged for a check first brings its own memo
//!    sources up to date and recomputes only if one of them changed.
//!
//! 5. A recomputation that yields a value equal to the cached one does not
//!    advance the memo's write version, so readers flagged for a check stay
//!    as they are.
//!
//! # Why This Matters
//!
//! Memos that are never read stay dirty and cost nothing, and a change that
//! does not alter a derived value stops at that value.
//!
//! # Thread Safety
//!
//! The computation runs without any of the memo's locks held, so it may
//! freely read other signals and memos.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::{Reactive, ReactiveHandle, Runtime, Staleness};
use super::subscriber::{next_source_id, SourceId, SubscriberId};

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A memo this one reads may have changed.
    Check,

    /// The memo needs to recompute on next access.
    Dirty,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The `PartialEq` bound is used to detect when a recomputation actually
/// changed the value. Dependents are only re-run when it did.
pub struct Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<MemoInner<T>>,
    _handle: Arc<ReactiveHandle>,
}

struct MemoInner<T> {
    /// Identity as a source (what dependents subscribe to).
    id: SourceId,

    /// Identity as a subscriber (what this memo depends on).
    subscriber_id: SubscriberId,

    compute: Box<dyn Fn() -> T + Send + Sync>,

    /// The cached value (None if never computed).
    value: RwLock<Option<T>>,

    state: RwLock<MemoState>,

    /// Write version at which the cached value last changed.
    version: AtomicU64,

    /// Write version at which the cached value was last known current.
    verified_at: AtomicU64,
}

impl<T> Reactive for MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_dirty(&self, staleness: Staleness) -> Option<SourceId> {
        let mut state = self.state.write();
        let was_clean = *state == MemoState::Clean;
        *state = match (*state, staleness) {
            (_, Staleness::Dirty) | (MemoState::Dirty, _) => MemoState::Dirty,
            (_, Staleness::Check) => MemoState::Check,
        };
        was_clean.then_some(self.id)
    }

    fn schedule(&self) {}

    fn is_eager(&self) -> bool {
        false
    }

    fn source_id(&self) -> Option<SourceId> {
        Some(self.id)
    }

    fn refresh(&self) -> u64 {
        if !self.is_current() {
            self.recompute();
        }
        self.version.load(Ordering::SeqCst)
    }
}

impl<T> MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Whether the cached value can be handed out as is. A memo flagged for
    /// a check becomes clean here when none of its sources changed.
    fn is_current(&self) -> bool {
        if self.value.read().is_none() {
            return false;
        }
        let state = *self.state.read();
        match state {
            MemoState::Clean => true,
            MemoState::Dirty => false,
            MemoState::Check => {
                let since = self.verified_at.load(Ordering::SeqCst);
                if Runtime::sources_changed(self.subscriber_id, since) {
                    return false;
                }
                self.verified_at.store(Runtime::version(), Ordering::SeqCst);
                let mut state = self.state.write();
                if *state == MemoState::Check {
                    *state = MemoState::Clean;
                }
                true
            }
        }
    }

    fn current(&self) -> T {
        if self.is_current() {
            if let Some(value) = self.value.read().as_ref() {
                return value.clone();
            }
        }
        self.recompute()
    }

    /// Run the computation inside a tracking context and cache the result.
    ///
    /// The state is cleaned before running, so a source that changes while
    /// the computation runs leaves the memo dirty again.
    fn recompute(&self) -> T {
        *self.state.write() = MemoState::Clean;

        let (new_value, dependencies) = {
            let ctx = ReactiveContext::enter(self.subscriber_id);
            let value = (self.compute)();
            (value, ctx.dependencies())
        };

        Runtime::set_dependencies(self.subscriber_id, dependencies);

        {
            let mut value = self.value.write();
            if value.as_ref() != Some(&new_value) {
                *value = Some(new_value.clone());
                self.version.store(Runtime::next_version(), Ordering::SeqCst);
            }
        }
        self.verified_at.store(Runtime::version(), Ordering::SeqCst);

        new_value
    }
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(MemoInner {
            id: next_source_id(),
            subscriber_id: SubscriberId::new(),
            compute: Box::new(compute),
            value: RwLock::new(None),
            state: RwLock::new(MemoState::Dirty),
            version: AtomicU64::new(0),
            verified_at: AtomicU64::new(0),
        });
        let handle = Runtime::register(inner.clone());

        Self {
            inner,
            _handle: Arc::new(handle),
        }
    }

    /// Get the memo's unique source ID.
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Get the subscriber ID for this memo.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        ReactiveContext::track_dependency(self.inner.id);
        self.get_untracked()
    }

    /// Get the current value without tracking the memo as a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.current()
    }

    /// Force the memo to recompute on next access.
    pub fn mark_dirty(&self) {
        *self.inner.state.write() = MemoState::Dirty;
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        *self.inner.state.read()
    }

    /// Get the number of computations currently depending on this memo.
    pub fn dependent_count(&self) -> usize {
        Runtime::subscriber_count(self.inner.id)
    }

    /// Write version at which the value last changed.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _handle: Arc::clone(&self._handle),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

/// Create a memo. Shorthand for [`Memo::new`].
pub fn computed<T, F>(compute: F) -> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Memo::new(compute)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
