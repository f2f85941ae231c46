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
//! 2. When any dependency changes, the runtime queues the effect and runs it
//!    when the current write (or batch) completes. An effect that was only
//!    reached through memos runs only if one of those memos produced a new
//!    value since its last run.
//!
//! 3. Each run replaces the previous dependencies with the ones read during
//!    that run.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - The runtime keeps effects alive until they are disposed.
//!
//! # Re-entrancy
//!
//! An effect never runs inside itself. If it is invalidated while running,
//! the request is remembered and the effect runs again right after the
//! current run returns.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use super::context::ReactiveContext;
use super::runtime::{Reactive, Runtime, Staleness};
use super::subscriber::{SourceId, SubscriberId};

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let c = count.clone();
/// let effect = Effect::new(move || {
///     println!("Count is: {}", c.get());
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// effect.dispose();
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

const CLEAN: u8 = 0;
const CHECK: u8 = 1;
const DIRTY: u8 = 2;

struct EffectInner {
    subscriber_id: SubscriberId,
    run: Box<dyn Fn() + Send + Sync>,
    disposed: AtomicBool,
    running: AtomicBool,
    rerun_requested: AtomicBool,
    staleness: AtomicU8,
    /// Write version when the last run finished.
    ran_at: AtomicU64,
    run_count: AtomicUsize,
    dependency_count: AtomicUsize,
}

impl Reactive for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_dirty(&self, staleness: Staleness) -> Option<SourceId> {
        let level = match staleness {
            Staleness::Check => CHECK,
            Staleness::Dirty => DIRTY,
        };
        self.staleness.fetch_max(level, Ordering::SeqCst);
        None
    }

    fn schedule(&self) {
        let stale = match self.staleness.swap(CLEAN, Ordering::SeqCst) {
            DIRTY => true,
            CHECK => Runtime::sources_changed(
                self.subscriber_id,
                self.ran_at.load(Ordering::SeqCst),
            ),
            _ => false,
        };
        if stale {
            self.execute();
        }
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            self.rerun_requested.store(true, Ordering::SeqCst);
            return;
        }

        struct RunningGuard<'a>(&'a AtomicBool);

        impl Drop for RunningGuard<'_> {
            fn drop(&mut self) {
                self.0.store(false, Ordering::SeqCst);
            }
        }

        let _running = RunningGuard(&self.running);
        let max_reruns = Runtime::config().max_effect_reruns;
        let mut reruns = 0usize;

        loop {
            self.rerun_requested.store(false, Ordering::SeqCst);
            self.staleness.store(CLEAN, Ordering::SeqCst);

            let dependencies = {
                let ctx = ReactiveContext::enter(self.subscriber_id);
                (self.run)();
                ctx.dependencies()
            };
            self.run_count.fetch_add(1, Ordering::SeqCst);
            self.ran_at.store(Runtime::version(), Ordering::SeqCst);

            if self.disposed.load(Ordering::SeqCst) {
                Runtime::clear_dependencies(self.subscriber_id);
                return;
            }
            self.dependency_count
                .store(dependencies.len(), Ordering::SeqCst);
            Runtime::set_dependencies(self.subscriber_id, dependencies);

            if !self.rerun_requested.load(Ordering::SeqCst) {
                return;
            }
            reruns += 1;
            if reruns > max_reruns {
                tracing::warn!(
                    subscriber = ?self.subscriber_id,
                    max_reruns,
                    "effect keeps invalidating itself, skipping further re-runs"
                );
                return;
            }
        }
    }
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it immediately.
    ///
    /// It has no dependencies until [`Effect::execute`] is called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            subscriber_id: SubscriberId::new(),
            run: Box::new(run),
            disposed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            staleness: AtomicU8::new(CLEAN),
            ran_at: AtomicU64::new(0),
            run_count: AtomicUsize::new(0),
            dependency_count: AtomicUsize::new(0),
        });
        Runtime::retain(inner.clone());
        Self { inner }
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Run the effect function now, re-tracking its dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Dispose of the effect.
    ///
    /// After disposal the effect will not run again. Disposing twice is a
    /// no-op. A run in progress is not interrupted.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        Runtime::release(self.inner.subscriber_id);
        tracing::trace!(subscriber = ?self.inner.subscriber_id, "effect disposed");
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of sources read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependency_count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("subscriber_id", &self.inner.subscriber_id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
