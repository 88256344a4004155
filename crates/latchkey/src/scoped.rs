//! Explicit-release scope guards.
//!
//! [`defer`] covers synchronous teardown: the closure runs exactly once when
//! the guard drops. [`ScopedValue`] covers values whose teardown is async —
//! and async teardown cannot be run from `Drop`, so it must be released
//! explicitly with [`release`](ScopedValue::release). A scoped value dropped
//! without release logs a warning and runs nothing: there is no finalizer
//! safety net, skipping release leaks whatever the action would have freed.

use std::ops::{Deref, DerefMut};
use std::pin::Pin;

/// Runs a closure exactly once when dropped, unless disarmed.
pub struct DeferGuard<F: FnOnce()> {
    action: Option<F>,
}

/// Defers `action` to the end of the enclosing scope.
pub fn defer<F: FnOnce()>(action: F) -> DeferGuard<F> {
    DeferGuard {
        action: Some(action),
    }
}

impl<F: FnOnce()> DeferGuard<F> {
    /// Drops the guard without running the action.
    pub fn disarm(mut self) {
        self.action = None;
    }
}

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

type ReleaseFn<T> =
    Box<dyn FnOnce(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static>;

/// A value paired with an async release action that must be run explicitly.
///
/// The wrapped value is reachable through `Deref`/`DerefMut`. Call
/// [`release`](Self::release) to run the release action; dropping the
/// wrapper instead logs a `tracing::warn!` and does not run it.
pub struct ScopedValue<T> {
    value: Option<T>,
    release: Option<ReleaseFn<T>>,
    what: &'static str,
}

impl<T> ScopedValue<T> {
    /// Wraps `value` with its async release action.
    pub fn new<F, Fut>(value: T, release: F) -> Self
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            value: Some(value),
            release: Some(Box::new(move |value| Box::pin(release(value)))),
            what: std::any::type_name::<T>(),
        }
    }

    /// Runs the release action on the wrapped value, consuming the scope.
    pub async fn release(mut self) {
        let value = self.value.take().expect("value present until release");
        let release = self.release.take().expect("release action runs once");
        release(value).await;
    }

    /// Hands the value back out without running the release action.
    pub fn into_inner(mut self) -> T {
        self.release = None;
        self.value.take().expect("value present until release")
    }
}

impl<T> Deref for ScopedValue<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("value present until release")
    }
}

impl<T> DerefMut for ScopedValue<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("value present until release")
    }
}

impl<T> Drop for ScopedValue<T> {
    fn drop(&mut self) {
        if self.release.is_some() {
            tracing::warn!(
                value = self.what,
                "scoped value dropped without release; its release action will not run"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn defer_runs_once_on_drop() {
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let _guard = defer({
                let hits = hits.clone();
                move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn defer_disarm_skips_the_action() {
        let hits = Arc::new(AtomicUsize::new(0));
        let guard = defer({
            let hits = hits.clone();
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });
        guard.disarm();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn scoped_release_runs_the_action() {
        let released = Arc::new(AtomicBool::new(false));
        let scope = ScopedValue::new(41u32, {
            let released = released.clone();
            move |value| async move {
                assert_eq!(value, 41);
                released.store(true, Ordering::SeqCst);
            }
        });
        assert_eq!(*scope, 41);
        scope.release().await;
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn scoped_drop_without_release_runs_nothing() {
        let released = Arc::new(AtomicBool::new(false));
        {
            let _scope = ScopedValue::new((), {
                let released = released.clone();
                move |()| async move {
                    released.store(true, Ordering::SeqCst);
                }
            });
        }
        assert!(!released.load(Ordering::SeqCst));
    }

    #[test]
    fn scoped_into_inner_skips_the_action() {
        let scope = ScopedValue::new(5u8, |_| async {});
        assert_eq!(scope.into_inner(), 5);
    }
}
