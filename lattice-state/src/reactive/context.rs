//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! the read is recorded against the computation on top of the stack.
//!
//! # Implementation
//!
//! We use a thread-local stack. Running a memo or effect pushes a tracking
//! entry; `untracked` pushes an entry with no subscriber, which swallows
//! reads until it is popped. Entries are popped by guards, so the stack
//! stays balanced even if a computation panics.

use std::cell::RefCell;

use smallvec::SmallVec;

use super::subscriber::{SourceId, SubscriberId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// Sources read by one computation, in first-read order.
pub type Dependencies = SmallVec<[SourceId; 4]>;

#[derive(Debug)]
struct ContextEntry {
    /// `None` for an untracked section.
    subscriber_id: Option<SubscriberId>,
    dependencies: Dependencies,
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
}

impl ReactiveContext {
    /// Enter a tracking context for the given subscriber.
    ///
    /// While this context is on top of the stack, every source that is read
    /// is recorded as a dependency of `subscriber_id`.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Self::push(Some(subscriber_id))
    }

    /// Enter an untracked section. Reads inside it record nothing.
    pub fn enter_untracked() -> Self {
        Self::push(None)
    }

    fn push(subscriber_id: Option<SubscriberId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber_id,
                dependencies: SmallVec::new(),
            });
        });

        Self { subscriber_id }
    }

    /// Check whether reads are currently being tracked.
    pub fn is_tracking() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the subscriber that reads are attributed to, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.subscriber_id))
    }

    /// Record a read of the given source.
    ///
    /// Repeated reads of one source are recorded once.
    pub fn track_dependency(source_id: SourceId) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.subscriber_id.is_some() && !entry.dependencies.contains(&source_id) {
                    entry.dependencies.push(source_id);
                }
            }
        });
    }

    /// Sources recorded so far in the innermost context.
    pub fn dependencies(&self) -> Dependencies {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.clone())
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.subscriber_id, self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id, entry.subscriber_id
                );
            }
        });
    }
}

/// Run `f` without recording any of its reads as dependencies.
///
/// ```rust,ignore
/// let a = Signal::new(1);
/// let b = Signal::new(2);
/// Effect::new(move || {
///     let _ = a.get();                  // tracked
///     let _ = untracked(|| b.get());    // not tracked
/// });
/// ```
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    let _ctx = ReactiveContext::enter_untracked();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_subscriber() {
        let id = SubscriberId::new();

        assert!(!ReactiveContext::is_tracking());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(id);

            assert!(ReactiveContext::is_tracking());
            assert_eq!(ReactiveContext::current_subscriber(), Some(id));
        }

        assert!(!ReactiveContext::is_tracking());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn context_deduplicates_dependencies() {
        let ctx = ReactiveContext::enter(SubscriberId::new());

        ReactiveContext::track_dependency(1);
        ReactiveContext::track_dependency(2);
        ReactiveContext::track_dependency(1);
        ReactiveContext::track_dependency(3);

        assert_eq!(ctx.dependencies().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn untracked_section_swallows_reads() {
        let ctx = ReactiveContext::enter(SubscriberId::new());
        ReactiveContext::track_dependency(1);

        untracked(|| {
            assert!(!ReactiveContext::is_tracking());
            ReactiveContext::track_dependency(2);
        });

        assert!(ReactiveContext::is_tracking());
        assert_eq!(ctx.dependencies().as_slice(), &[1]);
    }

    #[test]
    fn nested_contexts() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();

        {
            let _ctx1 = ReactiveContext::enter(id1);
            assert_eq!(ReactiveContext::current_subscriber(), Some(id1));

            {
                let _ctx2 = ReactiveContext::enter(id2);
                assert_eq!(ReactiveContext::current_subscriber(), Some(id2));
            }

            assert_eq!(ReactiveContext::current_subscriber(), Some(id1));
        }

        assert!(ReactiveContext::current_subscriber().is_none());
    }
}
