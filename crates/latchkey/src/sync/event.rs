use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use slab::Slab;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

/// A manual-reset signal usable from both blocking and async contexts.
///
/// `ResetEvent` is the bridge between thread-blocking code and Tokio tasks:
/// the blocking side waits on a condvar, the async side registers a one-shot
/// watcher that [`set`](Self::set) fires. Watcher registrations are removed
/// deterministically on every outcome — signal, timeout, cancellation, or the
/// waiting future simply being dropped.
///
/// Handles are cheap to clone and all refer to the same signal.
#[derive(Clone, Default)]
pub struct ResetEvent {
    core: Arc<EventCore>,
}

#[derive(Default)]
struct EventCore {
    state: Mutex<EventState>,
    cond: Condvar,
}

#[derive(Default)]
struct EventState {
    set: bool,
    next_id: u64,
    watchers: Slab<WatcherSlot>,
}

struct WatcherSlot {
    // Slab keys are reused; the id makes stale deregistrations a no-op.
    id: u64,
    watcher: Watcher,
}

enum Watcher {
    Once(oneshot::Sender<()>),
    Persistent(Arc<dyn Fn() + Send + Sync>),
}

impl ResetEvent {
    /// Creates an event in the given initial state.
    pub fn new(set: bool) -> Self {
        Self {
            core: Arc::new(EventCore {
                state: Mutex::new(EventState {
                    set,
                    next_id: 0,
                    watchers: Slab::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Returns whether the event is currently set.
    pub fn is_set(&self) -> bool {
        self.core.state.lock().set
    }

    /// Sets the event, waking every blocked waiter and firing every
    /// registered watcher. A no-op if the event is already set.
    ///
    /// Persistent watch callbacks run on the calling thread, outside the
    /// event's internal lock.
    pub fn set(&self) {
        let callbacks = {
            let mut state = self.core.state.lock();
            if state.set {
                return;
            }
            state.set = true;

            let fired: Vec<usize> = state
                .watchers
                .iter()
                .filter(|(_, slot)| matches!(slot.watcher, Watcher::Once(_)))
                .map(|(key, _)| key)
                .collect();
            for key in fired {
                if let Watcher::Once(tx) = state.watchers.remove(key).watcher {
                    let _ = tx.send(());
                }
            }

            let callbacks: Vec<_> = state
                .watchers
                .iter()
                .filter_map(|(_, slot)| match &slot.watcher {
                    Watcher::Persistent(cb) => Some(cb.clone()),
                    Watcher::Once(_) => None,
                })
                .collect();

            self.core.cond.notify_all();
            callbacks
        };

        for cb in callbacks {
            cb();
        }
    }

    /// Un-sets the event. A no-op if the event is not set.
    pub fn reset(&self) {
        self.core.state.lock().set = false;
    }

    /// Blocks the calling thread until the event is set.
    ///
    /// Do not call this from async code; use [`wait_async`](Self::wait_async).
    pub fn wait(&self) {
        let mut state = self.core.state.lock();
        while !state.set {
            self.core.cond.wait(&mut state);
        }
    }

    /// Blocks the calling thread until the event is set or the timeout
    /// elapses. Returns `true` if the event was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.core.state.lock();
        while !state.set {
            if self.core.cond.wait_until(&mut state, deadline).timed_out() {
                return state.set;
            }
        }
        true
    }

    /// Suspends until the event is set or the token is cancelled.
    pub async fn wait_async(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let Some((key, id, rx)) = self.register_once() else {
            return Ok(());
        };
        let _dereg = Deregister {
            core: &self.core,
            key,
            id,
        };
        tokio::select! {
            _ = rx => Ok(()),
            _ = cancel.cancelled() => Err(Cancelled),
        }
    }

    /// Suspends until the event is set, the timeout elapses, or the token is
    /// cancelled. Returns `Ok(true)` on signal and `Ok(false)` on timeout.
    pub async fn wait_timeout_async(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let Some((key, id, rx)) = self.register_once() else {
            return Ok(true);
        };
        let _dereg = Deregister {
            core: &self.core,
            key,
            id,
        };
        tokio::select! {
            _ = rx => Ok(true),
            _ = tokio::time::sleep(timeout) => Ok(false),
            _ = cancel.cancelled() => Err(Cancelled),
        }
    }

    /// Registers a callback fired on every unset→set transition until the
    /// returned guard is dropped or the token is cancelled, whichever comes
    /// first. Dropping the guard deterministically unregisters.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
        cancel: &CancellationToken,
    ) -> WatchGuard {
        let (key, id) = {
            let mut state = self.core.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            let key = state.watchers.insert(WatcherSlot {
                id,
                watcher: Watcher::Persistent(Arc::new(callback)),
            });
            (key, id)
        };

        let cancel_task = tokio::spawn({
            let core = self.core.clone();
            let cancel = cancel.clone();
            async move {
                cancel.cancelled().await;
                remove_watcher(&core, key, id);
            }
        });

        WatchGuard {
            core: self.core.clone(),
            key,
            id,
            cancel_task,
        }
    }

    /// If the event is unset, registers a one-shot watcher and returns its
    /// slot plus the receiving half. Returns `None` if the event is already
    /// set (no registration needed).
    fn register_once(&self) -> Option<(usize, u64, oneshot::Receiver<()>)> {
        let mut state = self.core.state.lock();
        if state.set {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        let id = state.next_id;
        state.next_id += 1;
        let key = state.watchers.insert(WatcherSlot {
            id,
            watcher: Watcher::Once(tx),
        });
        Some((key, id, rx))
    }

    /// Number of live watcher registrations (one-shot and persistent).
    pub fn watcher_count(&self) -> usize {
        self.core.state.lock().watchers.len()
    }
}

fn remove_watcher(core: &EventCore, key: usize, id: u64) {
    let mut state = core.state.lock();
    if state.watchers.get(key).is_some_and(|slot| slot.id == id) {
        state.watchers.remove(key);
    }
}

/// Removes a one-shot watcher on scope exit, covering the timeout,
/// cancellation, and future-dropped outcomes. Removal after the watcher
/// already fired is a no-op thanks to the slot id.
struct Deregister<'a> {
    core: &'a EventCore,
    key: usize,
    id: u64,
}

impl Drop for Deregister<'_> {
    fn drop(&mut self) {
        remove_watcher(self.core, self.key, self.id);
    }
}

/// Deregisters a persistent watch callback on drop.
pub struct WatchGuard {
    core: Arc<EventCore>,
    key: usize,
    id: u64,
    cancel_task: tokio::task::JoinHandle<()>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.cancel_task.abort();
        remove_watcher(&self.core, self.key, self.id);
    }
}
