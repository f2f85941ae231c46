//! Reaction combinators.
//!
//! Everything here is built from two engine primitives: [`Effect`] and
//! [`untracked`]. Each combinator returns a [`Disposer`]; when created inside
//! a collecting [`Scope`](crate::scope::Scope) the disposer is also
//! registered there.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::task::AtomicWaker;
use parking_lot::Mutex;

use crate::reactive::{untracked, Effect};
use crate::scope::Disposer;

/// Run `f` now and again whenever anything it read changes.
pub fn effect<F>(f: F) -> Disposer
where
    F: Fn() + Send + Sync + 'static,
{
    let effect = Effect::new(f);
    Disposer::new(move || effect.dispose()).collected()
}

/// Re-evaluate `expression` on every change and call
/// `listener(current, previous)` from the second evaluation on.
///
/// The listener runs untracked: its own reads never re-trigger the reaction.
pub fn reaction<T, E, L>(expression: E, listener: L) -> Disposer
where
    T: Clone + Send + 'static,
    E: Fn() -> T + Send + Sync + 'static,
    L: Fn(T, T) + Send + Sync + 'static,
{
    let previous: Mutex<Option<T>> = Mutex::new(None);

    effect(move || {
        let value = expression();
        let last = previous.lock().replace(value.clone());
        if let Some(last) = last {
            untracked(|| listener(value, last));
        }
    })
}

/// Like [`reaction`], but the listener also sees the first evaluation.
pub fn fire_immediately<T, E, L>(expression: E, listener: L) -> Disposer
where
    E: Fn() -> T + Send + Sync + 'static,
    L: Fn(T) + Send + Sync + 'static,
{
    effect(move || {
        let value = expression();
        untracked(|| listener(value));
    })
}

/// Wait until `predicate` returns `true`.
///
/// See [`try_when`] for a predicate that can fail.
pub fn when<P>(predicate: P) -> When
where
    P: Fn() -> bool + Send + Sync + 'static,
{
    try_when(move || Ok(predicate()))
}

/// Wait until `predicate` returns `Ok(true)`, or fail with the first error
/// it returns.
///
/// The predicate is evaluated reactively. Once the future settles, the
/// underlying effect is disposed and the predicate never runs again.
pub fn try_when<P, E>(predicate: P) -> When<E>
where
    P: Fn() -> Result<bool, E> + Send + Sync + 'static,
    E: Send + 'static,
{
    let shared = Arc::new(WhenShared {
        outcome: Mutex::new(None),
        settled: AtomicBool::new(false),
        waker: AtomicWaker::new(),
        stop: Mutex::new(None),
        stop_requested: AtomicBool::new(false),
    });

    let state = shared.clone();
    let disposer = effect(move || {
        if state.settled.load(Ordering::SeqCst) {
            return;
        }
        let outcome = match predicate() {
            Ok(false) => return,
            Ok(true) => Ok(()),
            Err(err) => Err(err),
        };
        state.settle(outcome);
    });

    *shared.stop.lock() = Some(disposer.clone());
    // Settled during the first synchronous run, before the disposer existed.
    if shared.stop_requested.load(Ordering::SeqCst) {
        disposer.dispose();
    }

    When { shared, disposer }
}

struct WhenShared<E> {
    outcome: Mutex<Option<Result<(), E>>>,
    settled: AtomicBool,
    waker: AtomicWaker,
    stop: Mutex<Option<Disposer>>,
    stop_requested: AtomicBool,
}

impl<E> WhenShared<E> {
    fn settle(&self, outcome: Result<(), E>) {
        if self.settled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::trace!(ok = outcome.is_ok(), "when settled");
        *self.outcome.lock() = Some(outcome);
        self.waker.wake();

        let stop = self.stop.lock().clone();
        match stop {
            Some(stop) => stop.dispose(),
            None => self.stop_requested.store(true, Ordering::SeqCst),
        }
    }
}

/// Future returned by [`when`] and [`try_when`].
///
/// Resolves with `Ok(())` once the predicate holds, or with the predicate's
/// error. [`When::cancel`] stops watching without settling, leaving the
/// future pending forever.
#[must_use = "a `When` does nothing unless polled or cancelled"]
pub struct When<E = std::convert::Infallible> {
    shared: Arc<WhenShared<E>>,
    disposer: Disposer,
}

impl<E> When<E> {
    /// Stop evaluating the predicate. Does not settle the future.
    pub fn cancel(&self) {
        self.disposer.dispose();
    }

    /// Disposer for the underlying effect.
    pub fn disposer(&self) -> Disposer {
        self.disposer.clone()
    }

    /// Whether the predicate has resolved or failed.
    pub fn is_settled(&self) -> bool {
        self.shared.settled.load(Ordering::SeqCst)
    }
}

impl<E> Future for When<E> {
    type Output = Result<(), E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared.waker.register(cx.waker());
        match self.shared.outcome.lock().take() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl<E> std::fmt::Debug for When<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("When")
            .field("settled", &self.is_settled())
            .field("disposed", &self.disposer.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Computed, Field};
    use crate::reactive::{batch, Signal};
    use crate::scope::Scope;
    use futures_util::FutureExt;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn effect_disposer_is_collected_by_scope() {
        let signal = Signal::new(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let scope = Scope::new();

        let (s, r) = (signal.clone(), runs.clone());
        let disposer = scope.collect(|| {
            effect(move || {
                let _ = s.get();
                r.fetch_add(1, Ordering::SeqCst);
            })
        });

        signal.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        scope.close();
        assert!(disposer.is_disposed());
        signal.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reaction_skips_first_evaluation() {
        let signal = Signal::new(0);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let (s, c) = (signal.clone(), calls.clone());
        let disposer = reaction(move || s.get(), move |v, prev| c.lock().push((v, prev)));

        assert!(calls.lock().is_empty());
        signal.set(1);
        signal.set(2);

        assert_eq!(*calls.lock(), vec![(1, 0), (2, 1)]);
        disposer.dispose();
    }

    #[test]
    fn reaction_listener_is_untracked() {
        let watched = Signal::new(0);
        let other = Signal::new(0);
        let calls = Arc::new(AtomicUsize::new(0));

        let (w, o, c) = (watched.clone(), other.clone(), calls.clone());
        let disposer = reaction(
            move || w.get(),
            move |_, _| {
                let _ = o.get();
                c.fetch_add(1, Ordering::SeqCst);
            },
        );

        watched.set(1);
        other.set(1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        disposer.dispose();
    }

    #[test]
    fn reaction_ignores_recomputations_to_equal_values() {
        let count = Field::new(1);
        let parity = Computed::new({
            let count = count.clone();
            move || count.get() % 2
        });
        let calls = Arc::new(Mutex::new(Vec::new()));

        let (p, c) = (parity.clone(), calls.clone());
        let disposer = reaction(move || p.get(), move |v, prev| c.lock().push((v, prev)));

        count.set(3);
        count.set(5);
        assert!(calls.lock().is_empty());

        count.set(6);
        assert_eq!(*calls.lock(), vec![(0, 1)]);
        disposer.dispose();
    }

    #[test]
    fn fire_immediately_sees_every_value() {
        let signal = Signal::new(0);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let (s, c) = (signal.clone(), calls.clone());
        let disposer = fire_immediately(move || s.get(), move |v| c.lock().push(v));

        signal.set(1);
        signal.update(|v| v + 1);

        assert_eq!(*calls.lock(), vec![0, 1, 2]);
        disposer.dispose();
    }

    #[test]
    fn reaction_sees_post_batch_values_only() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let (a2, b2, c) = (a.clone(), b.clone(), calls.clone());
        let disposer = fire_immediately(move || a2.get() + b2.get(), move |v| c.lock().push(v));

        a.set(1);
        batch(|| {
            a.update(|n| n + 1);
            b.update(|n| n + 2);
        });

        assert_eq!(*calls.lock(), vec![0, 1, 4]);
        disposer.dispose();
    }

    #[test]
    fn when_resolves_once_and_stops() {
        let signal = Signal::new(0);
        let evaluations = Arc::new(AtomicUsize::new(0));

        let (s, e) = (signal.clone(), evaluations.clone());
        let mut waiting = when(move || {
            e.fetch_add(1, Ordering::SeqCst);
            s.get() > 0
        });

        assert!((&mut waiting).now_or_never().is_none());
        signal.set(1);
        assert!(waiting.is_settled());
        assert_eq!(evaluations.load(Ordering::SeqCst), 2);

        signal.set(2);
        assert_eq!(evaluations.load(Ordering::SeqCst), 2);
        assert_eq!(signal.subscriber_count(), 0);

        assert!(matches!(waiting.now_or_never(), Some(Ok(()))));
    }

    #[test]
    fn when_already_true_disposes_during_first_run() {
        let signal = Signal::new(5);

        let s = signal.clone();
        let waiting = when(move || s.get() > 0);

        assert!(waiting.is_settled());
        assert!(waiting.disposer().is_disposed());
        assert_eq!(signal.subscriber_count(), 0);
        assert!(matches!(waiting.now_or_never(), Some(Ok(()))));
    }

    #[test]
    fn try_when_rejects_with_predicate_error() {
        let signal = Signal::new(0);
        let evaluations = Arc::new(AtomicUsize::new(0));

        let (s, e) = (signal.clone(), evaluations.clone());
        let waiting = try_when(move || {
            e.fetch_add(1, Ordering::SeqCst);
            match s.get() {
                0 => Ok(false),
                n if n < 0 => Err(format!("negative: {n}")),
                _ => Ok(true),
            }
        });

        signal.set(-1);
        assert!(waiting.is_settled());
        assert_eq!(evaluations.load(Ordering::SeqCst), 2);
        assert_eq!(signal.subscriber_count(), 0);

        // Settled: later writes never reach the predicate.
        signal.set(3);
        signal.set(-2);
        assert_eq!(evaluations.load(Ordering::SeqCst), 2);

        assert_eq!(waiting.now_or_never(), Some(Err("negative: -1".to_string())));
    }

    #[test]
    fn cancelled_when_stays_pending() {
        let signal = Signal::new(0);

        let s = signal.clone();
        let mut waiting = when(move || s.get() > 0);
        waiting.cancel();
        waiting.cancel();

        signal.set(1);
        assert!(!waiting.is_settled());
        assert!((&mut waiting).now_or_never().is_none());
    }
}
