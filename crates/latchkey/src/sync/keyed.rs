use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Mutual exclusion per key.
///
/// For any key there is at most one holder at any instant, and waiters are
/// granted the lock strictly in arrival order. Distinct keys never contend
/// with each other: the key table is sharded and per-key state lives behind
/// its own short critical section, never held across a suspension point.
///
/// Release hands the entry directly to the next waiter — the entry is never
/// observed as free while a waiter is pending, so a late arrival cannot steal
/// the lock from the queue. Dropping a pending [`lock`](Self::lock) future
/// withdraws the waiter; a grant that was already in flight to it is
/// forwarded to the next waiter in line.
///
/// Entries are created on first use and removed once nobody holds or awaits
/// them, so the table does not grow with the universe of keys ever used.
///
/// Handles are cheap to clone and all refer to the same table.
pub struct KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    table: Arc<DashMap<K, Arc<LockEntry<K>>>>,
}

impl<K> Clone for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

struct LockEntry<K>
where
    K: Eq + Hash + Clone,
{
    /// Pin count: holders, waiters, and in-flight acquisitions. An entry is
    /// only evicted once this reaches zero and the entry is idle.
    users: AtomicUsize,
    state: Mutex<EntryState<K>>,
}

impl<K> Default for LockEntry<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            users: AtomicUsize::new(0),
            state: Mutex::new(EntryState {
                held: false,
                waiters: VecDeque::new(),
            }),
        }
    }
}

struct EntryState<K>
where
    K: Eq + Hash + Clone,
{
    held: bool,
    waiters: VecDeque<oneshot::Sender<Grant<K>>>,
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self {
            table: Arc::new(DashMap::new()),
        }
    }

    /// Acquires the lock for `key`, suspending while another holder has it.
    ///
    /// The returned guard releases the lock when dropped, on every exit path.
    /// Dropping the future while it waits withdraws the waiter without ever
    /// granting it the lock.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let (entry, pin) = self.pin_entry(&key);
        let rx = {
            let mut state = entry.state.lock();
            if !state.held {
                state.held = true;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };
        let grant = match rx {
            None => Grant {
                table: self.table.clone(),
                key,
                entry,
                armed: true,
            },
            // The sender is only dropped by handing the grant off, and the
            // entry is pinned while we wait.
            Some(rx) => rx.await.expect("lock entry dropped while waiting"),
        };
        KeyedGuard { _grant: grant, pin }
    }

    /// Acquires the lock for `key` if it is free, without suspending.
    pub fn try_lock(&self, key: K) -> Option<KeyedGuard<K>> {
        let (entry, pin) = self.pin_entry(&key);
        let acquired = {
            let mut state = entry.state.lock();
            if state.held {
                false
            } else {
                state.held = true;
                true
            }
        };
        if !acquired {
            return None;
        }
        Some(KeyedGuard {
            _grant: Grant {
                table: self.table.clone(),
                key,
                entry,
                armed: true,
            },
            pin,
        })
    }

    /// Runs `fut` while holding the lock for `key`, releasing on every exit
    /// path — completion, error value, or cancellation of the whole call.
    pub async fn run_locked<F>(&self, key: K, fut: F) -> F::Output
    where
        F: Future,
    {
        let _guard = self.lock(key).await;
        fut.await
    }

    /// Number of live entries in the table.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table currently has no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Looks up or creates the entry for `key` and pins it. The pin is taken
    /// under the shard lock, so eviction can never race a fresh acquisition
    /// into removing an entry that is about to be used.
    fn pin_entry(&self, key: &K) -> (Arc<LockEntry<K>>, EntryPin<K>) {
        let entry = {
            let slot = self.table.entry(key.clone()).or_default();
            slot.users.fetch_add(1, Ordering::AcqRel);
            slot.value().clone()
        };
        let pin = EntryPin {
            table: self.table.clone(),
            key: key.clone(),
            entry: entry.clone(),
        };
        (entry, pin)
    }
}

/// Holds the lock for one key; releasing happens exactly once, when the
/// guard is dropped (or [`unlock`](Self::unlock) is called, which is the
/// same thing spelled out).
pub struct KeyedGuard<K>
where
    K: Eq + Hash + Clone,
{
    // Field order matters: the grant must release before the pin drops, so
    // the eviction check runs after both.
    _grant: Grant<K>,
    pin: EntryPin<K>,
}

impl<K> KeyedGuard<K>
where
    K: Eq + Hash + Clone,
{
    /// Releases the lock. Equivalent to dropping the guard.
    pub fn unlock(self) {}

    /// The key this guard holds.
    pub fn key(&self) -> &K {
        &self.pin.key
    }
}

/// The capability to release one acquisition of one entry. Exactly one grant
/// exists per acquisition; it is either created on the uncontended path or
/// handed through a waiter's channel. Dropping it releases the entry — also
/// when the waiter it was sent to is already gone, which is what forwards
/// the lock instead of losing it.
struct Grant<K>
where
    K: Eq + Hash + Clone,
{
    table: Arc<DashMap<K, Arc<LockEntry<K>>>>,
    key: K,
    entry: Arc<LockEntry<K>>,
    armed: bool,
}

impl<K> Drop for Grant<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.entry.state.lock();
        loop {
            match state.waiters.pop_front() {
                Some(tx) => {
                    let next = Grant {
                        table: self.table.clone(),
                        key: self.key.clone(),
                        entry: self.entry.clone(),
                        armed: true,
                    };
                    match tx.send(next) {
                        // Handed off; the entry stays held.
                        Ok(()) => return,
                        // Waiter withdrew; disarm the bounced grant and try
                        // the next one. (Dropping it armed would re-enter
                        // this critical section.)
                        Err(mut bounced) => {
                            bounced.armed = false;
                            continue;
                        }
                    }
                }
                None => {
                    state.held = false;
                    break;
                }
            }
        }
        drop(state);
        maybe_evict(&self.table, &self.key, &self.entry);
    }
}

/// One acquisition's interest in an entry. Dropping the pin is what makes an
/// idle entry eligible for eviction.
struct EntryPin<K>
where
    K: Eq + Hash + Clone,
{
    table: Arc<DashMap<K, Arc<LockEntry<K>>>>,
    key: K,
    entry: Arc<LockEntry<K>>,
}

impl<K> Drop for EntryPin<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if self.entry.users.fetch_sub(1, Ordering::AcqRel) == 1 {
            maybe_evict(&self.table, &self.key, &self.entry);
        }
    }
}

/// Removes the entry for `key` if nothing pins it and it is idle. The
/// predicate runs under the shard lock, where new pins are also taken, so
/// the check cannot race a concurrent acquisition.
fn maybe_evict<K>(table: &DashMap<K, Arc<LockEntry<K>>>, key: &K, entry: &Arc<LockEntry<K>>)
where
    K: Eq + Hash + Clone,
{
    if entry.users.load(Ordering::Acquire) != 0 {
        return;
    }
    table.remove_if(key, |_, e| {
        e.users.load(Ordering::Acquire) == 0 && {
            let state = e.state.lock();
            !state.held && state.waiters.is_empty()
        }
    });
}
