//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns the dependency table and schedules effects when
//! sources change.
//!
//! # How It Works
//!
//! 1. Memos and effects register with the runtime when they are created.
//!
//! 2. After a memo or effect runs, it hands the runtime the sources it read;
//!    these replace its previous dependencies.
//!
//! 3. When a source changes, the runtime:
//!    a. Finds all subscribers of the source
//!    b. Marks them dirty, and everything downstream of a memo that just
//!       turned stale as needing a check
//!    c. Queues effects (deduplicated, in subscription order)
//!    d. Flushes the queue unless a batch or a flush is already in progress
//!
//! Memos are lazy: they only recompute when read. A memo whose recomputed
//! value equals the cached one keeps its write version, so an effect that
//! only needs a check sees nothing newer than its last run and is skipped.
//!
//! # Thread Safety
//!
//! The node registry is process-global behind a `parking_lot` lock, so
//! handles can move between threads. The effect queue and batch depth are
//! thread-local: effects run on the thread that performed the write.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexSet;
use parking_lot::RwLock;

use super::context::Dependencies;
use super::subscriber::{SourceId, SubscriberId};
use crate::config::RuntimeConfig;

/// How much a computation has to do before it is up to date again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Staleness {
    /// A memo it reads may have changed. Recompute only if one did.
    Check,

    /// A signal it reads changed.
    Dirty,
}

/// A trait for computations that can be notified when dependencies change.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this computation.
    fn subscriber_id(&self) -> SubscriberId;

    /// Invalidate this computation.
    ///
    /// Lazy nodes that were clean return their own source ID so the runtime
    /// can flag their dependents for a check.
    fn mark_dirty(&self, staleness: Staleness) -> Option<SourceId>;

    /// Run this computation if it is still stale (effects only).
    fn schedule(&self);

    /// Check if this computation is an effect (eager) or memo (lazy).
    fn is_eager(&self) -> bool;

    /// The ID dependents subscribe to, for lazy nodes.
    fn source_id(&self) -> Option<SourceId> {
        None
    }

    /// Bring a lazy node up to date and return the write version at which
    /// its value last changed.
    fn refresh(&self) -> u64 {
        0
    }
}

/// Handle to a weakly registered computation.
///
/// Dropping this handle unregisters the computation from the runtime.
pub struct ReactiveHandle {
    subscriber_id: SubscriberId,
    source_id: Option<SourceId>,
}

impl Drop for ReactiveHandle {
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber_id, self.source_id);
    }
}

#[derive(Default)]
struct Registry {
    /// Every registered computation.
    nodes: HashMap<SubscriberId, Weak<dyn Reactive>>,
    /// Computations kept alive by the runtime itself (effects).
    retained: HashMap<SubscriberId, Arc<dyn Reactive>>,
    /// Source -> subscribers, in the order they first subscribed.
    subscribers: HashMap<SourceId, IndexSet<SubscriberId>>,
    /// Subscriber -> sources it currently depends on.
    sources: HashMap<SubscriberId, Dependencies>,
    /// Source ID of a lazy node -> its subscriber ID.
    lazy: HashMap<SourceId, SubscriberId>,
}

impl Registry {
    fn lookup(&self, id: SubscriberId) -> Option<Arc<dyn Reactive>> {
        self.retained
            .get(&id)
            .cloned()
            .or_else(|| self.nodes.get(&id).and_then(Weak::upgrade))
    }

    fn clear_dependencies(&mut self, id: SubscriberId) {
        if let Some(sources) = self.sources.remove(&id) {
            for source in sources {
                if let Some(subs) = self.subscribers.get_mut(&source) {
                    subs.shift_remove(&id);
                    if subs.is_empty() {
                        self.subscribers.remove(&source);
                    }
                }
            }
        }
    }
}

#[derive(Default)]
struct Scheduler {
    batch_depth: usize,
    flushing: bool,
    pending: IndexSet<SubscriberId>,
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();
static CONFIG: OnceLock<RwLock<RuntimeConfig>> = OnceLock::new();
static WRITE_VERSION: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| RwLock::new(Registry::default()))
}

fn config_cell() -> &'static RwLock<RuntimeConfig> {
    CONFIG.get_or_init(|| RwLock::new(RuntimeConfig::default()))
}

/// The global reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Register a computation the caller keeps alive.
    ///
    /// Returns a handle that unregisters the computation when dropped.
    pub fn register(reactive: Arc<dyn Reactive>) -> ReactiveHandle {
        let id = reactive.subscriber_id();
        let source_id = reactive.source_id();
        let mut registry = registry().write();
        registry.nodes.insert(id, Arc::downgrade(&reactive));
        if let Some(source) = source_id {
            registry.lazy.insert(source, id);
        }
        ReactiveHandle {
            subscriber_id: id,
            source_id,
        }
    }

    /// Register a computation the runtime keeps alive until
    /// [`Runtime::release`] is called.
    pub fn retain(reactive: Arc<dyn Reactive>) {
        let id = reactive.subscriber_id();
        let mut registry = registry().write();
        registry.nodes.insert(id, Arc::downgrade(&reactive));
        registry.retained.insert(id, reactive);
    }

    /// Release a retained computation and forget its dependencies.
    pub fn release(id: SubscriberId) {
        Self::unregister(id, None);
    }

    fn unregister(id: SubscriberId, source_id: Option<SourceId>) {
        // Take the strong reference out first so it drops after the lock.
        let retained = {
            let mut registry = registry().write();
            registry.nodes.remove(&id);
            if let Some(source) = source_id {
                registry.lazy.remove(&source);
            }
            registry.clear_dependencies(id);
            registry.retained.remove(&id)
        };
        SCHEDULER.with(|s| {
            if let Ok(mut s) = s.try_borrow_mut() {
                s.pending.shift_remove(&id);
            }
        });
        drop(retained);
    }

    /// Replace the dependencies of a subscriber with `sources`.
    pub fn set_dependencies(subscriber_id: SubscriberId, sources: Dependencies) {
        let mut registry = registry().write();
        registry.clear_dependencies(subscriber_id);
        if !registry.nodes.contains_key(&subscriber_id) {
            return;
        }
        for &source in &sources {
            registry
                .subscribers
                .entry(source)
                .or_default()
                .insert(subscriber_id);
        }
        registry.sources.insert(subscriber_id, sources);
    }

    /// Remove all dependencies for a subscriber.
    pub fn clear_dependencies(subscriber_id: SubscriberId) {
        registry().write().clear_dependencies(subscriber_id);
    }

    /// Number of subscribers currently depending on `source_id`.
    pub fn subscriber_count(source_id: SourceId) -> usize {
        registry()
            .read()
            .subscribers
            .get(&source_id)
            .map_or(0, IndexSet::len)
    }

    /// The current write version.
    pub fn version() -> u64 {
        WRITE_VERSION.load(Ordering::SeqCst)
    }

    /// Advance the write version. Called by a memo whose value changed.
    pub fn next_version() -> u64 {
        WRITE_VERSION.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Bring the lazy node behind `source_id` up to date.
    ///
    /// Returns its last write version, or `None` for signals and unknown
    /// sources.
    pub fn refresh_source(source_id: SourceId) -> Option<u64> {
        let node = {
            let registry = registry().read();
            registry
                .lazy
                .get(&source_id)
                .and_then(|id| registry.lookup(*id))
        };
        node.map(|node| node.refresh())
    }

    /// Whether any lazy source of `subscriber_id` changed after write
    /// version `since`. Stale sources are recomputed along the way.
    pub fn sources_changed(subscriber_id: SubscriberId, since: u64) -> bool {
        let sources = registry()
            .read()
            .sources
            .get(&subscriber_id)
            .cloned()
            .unwrap_or_default();
        sources
            .into_iter()
            .any(|source| Self::refresh_source(source).is_some_and(|version| version > since))
    }

    /// Notify the runtime that a source changed.
    ///
    /// Dependents are invalidated and queued effects run before this returns,
    /// unless a batch or an outer flush is in progress.
    pub fn notify_source_change(source_id: SourceId) {
        Self::propagate(source_id);
        Self::flush();
    }

    /// Invalidate everything downstream of `source_id` and queue effects.
    fn propagate(source_id: SourceId) {
        let mut worklist = vec![(source_id, Staleness::Dirty)];

        while let Some((source, staleness)) = worklist.pop() {
            let affected: Vec<Arc<dyn Reactive>> = {
                let registry = registry().read();
                registry
                    .subscribers
                    .get(&source)
                    .map(|subs| subs.iter().filter_map(|id| registry.lookup(*id)).collect())
                    .unwrap_or_default()
            };

            for node in affected {
                if let Some(downstream) = node.mark_dirty(staleness) {
                    worklist.push((downstream, Staleness::Check));
                }
                if node.is_eager() {
                    let id = node.subscriber_id();
                    SCHEDULER.with(|s| s.borrow_mut().pending.insert(id));
                }
            }
        }
    }

    /// Run queued effects until the queue is empty.
    ///
    /// Does nothing while batching or when called from inside a flush; the
    /// outer flush picks up anything queued in the meantime.
    pub fn flush() {
        let start = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            if s.batch_depth > 0 || s.flushing {
                false
            } else {
                s.flushing = true;
                true
            }
        });
        if !start {
            return;
        }

        struct FlushGuard;

        impl Drop for FlushGuard {
            fn drop(&mut self) {
                SCHEDULER.with(|s| {
                    let mut s = s.borrow_mut();
                    s.flushing = false;
                    if std::thread::panicking() {
                        s.pending.clear();
                    }
                });
            }
        }

        let _guard = FlushGuard;
        let limit = Self::config().max_flush_iterations;
        let mut runs = 0usize;

        loop {
            let next = SCHEDULER.with(|s| s.borrow_mut().pending.shift_remove_index(0));
            let Some(id) = next else { break };

            if runs >= limit {
                let dropped = SCHEDULER.with(|s| {
                    let mut s = s.borrow_mut();
                    let dropped = s.pending.len() + 1;
                    s.pending.clear();
                    dropped
                });
                tracing::warn!(limit, dropped, "effect flush limit reached, dropping queued effects");
                break;
            }
            runs += 1;

            let node = registry().read().lookup(id);
            if let Some(node) = node {
                node.schedule();
            }
        }

        tracing::trace!(runs, "flushed effects");
    }

    /// Check if the current thread is inside a batch.
    pub fn is_batching() -> bool {
        SCHEDULER.with(|s| s.borrow().batch_depth > 0)
    }

    /// Install a new configuration for the whole process.
    pub fn configure(config: RuntimeConfig) {
        tracing::debug!(?config, "runtime configured");
        *config_cell().write() = config;
    }

    /// The active configuration.
    pub fn config() -> RuntimeConfig {
        config_cell().read().clone()
    }
}

/// Defer effect re-runs until `f` (and any enclosing batch) completes.
///
/// Multiple writes inside the batch coalesce into at most one re-run per
/// affected effect, which observes the final values.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    SCHEDULER.with(|s| s.borrow_mut().batch_depth += 1);

    struct BatchGuard;

    impl Drop for BatchGuard {
        fn drop(&mut self) {
            let depth = SCHEDULER.with(|s| {
                let mut s = s.borrow_mut();
                s.batch_depth -= 1;
                s.batch_depth
            });
            if depth == 0 {
                if std::thread::panicking() {
                    SCHEDULER.with(|s| s.borrow_mut().pending.clear());
                } else {
                    Runtime::flush();
                }
            }
        }
    }

    let _guard = BatchGuard;
    f()
}
