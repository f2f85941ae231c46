//! Lightweight multicast actions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::scope::Disposer;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A list of listeners that are called synchronously, in subscription order,
/// every time the action is emitted. Nothing is buffered.
pub struct Action<T = ()> {
    inner: Arc<ActionInner<T>>,
}

struct ActionInner<T> {
    next_id: AtomicU64,
    listeners: Mutex<IndexMap<u64, Listener<T>>>,
}

impl<T: 'static> Action<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ActionInner {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// Call every current listener with `value`.
    ///
    /// Listeners added or removed while emitting take effect from the next
    /// emit.
    pub fn emit(&self, value: T) {
        let listeners: Vec<Listener<T>> = self.inner.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(&value);
        }
    }

    /// Add a listener. The returned disposer removes exactly this listener.
    ///
    /// Removal keeps the remaining listeners in subscription order, so it is
    /// linear in the number of listeners.
    ///
    /// Inside a collecting scope the subscription is also removed when the
    /// scope closes.
    pub fn subscribe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&T) + Send + Sync + 'static,
        T: Send + Sync,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(listener));

        let inner = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.lock().shift_remove(&id);
            }
        })
        .collected()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl Action<()> {
    /// Emit an action that carries no value.
    pub fn fire(&self) {
        self.emit(());
    }
}

impl<T: 'static> Default for Action<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Create an action. Shorthand for [`Action::new`].
pub fn action<T: 'static>() -> Action<T> {
    Action::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn light_action_calls_listener_each_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = action::<()>();

        let c = calls.clone();
        a.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        a.fire();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        a.fire();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn params_action_passes_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = action::<i32>();

        let s = seen.clone();
        a.subscribe(move |v| s.lock().push(*v));

        a.emit(1);
        a.emit(2);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn disposer_removes_only_its_listener() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = action::<()>();

        let o = order.clone();
        let first = a.subscribe(move |_| o.lock().push("first"));
        let o = order.clone();
        let _second = a.subscribe(move |_| o.lock().push("second"));

        first.dispose();
        first.dispose();
        a.fire();

        assert_eq!(*order.lock(), vec!["second"]);
        assert_eq!(a.listener_count(), 1);
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = action::<u8>();

        for tag in 0..3u8 {
            let o = order.clone();
            a.subscribe(move |v| o.lock().push((tag, *v)));
        }
        a.emit(9);

        assert_eq!(*order.lock(), vec![(0, 9), (1, 9), (2, 9)]);
    }

    #[test]
    fn removing_a_middle_listener_keeps_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = action::<()>();

        let disposers: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|tag| {
                let o = order.clone();
                a.subscribe(move |_| o.lock().push(tag))
            })
            .collect();

        disposers[1].dispose();
        a.fire();

        assert_eq!(*order.lock(), vec!["a", "c", "d"]);
    }

    #[test]
    fn late_subscribers_miss_past_emits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = action::<()>();
        a.fire();

        let c = calls.clone();
        a.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scope_close_unsubscribes() {
        let a = action::<()>();
        let scope = Scope::new();

        scope.collect(|| a.subscribe(|_| {}));
        assert_eq!(a.listener_count(), 1);

        scope.close();
        assert_eq!(a.listener_count(), 0);
    }
}
