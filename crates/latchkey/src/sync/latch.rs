use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::LatchError;
use crate::sync::ResetEvent;

/// A reusable count-to-zero gate that un-signals automatically when re-armed.
///
/// The latch becomes signaled exactly when its count reaches zero and
/// un-signals exactly when the count moves away from zero again. The 0↔1
/// boundary is guarded by a dedicated critical section that re-reads count
/// and signal state immediately before flipping the underlying signal, so a
/// decrement to zero racing an immediate increment cannot leave the signal
/// inconsistent with the final count.
///
/// Driving the count below zero or past `i64::MAX` is a state error, never a
/// silent no-op. After [`close`](Self::close), every operation fails with
/// [`LatchError::Closed`].
pub struct CountdownLatch {
    count: AtomicI64,
    /// Guards 0↔1 signal flips; the count itself moves atomically outside it.
    boundary: Mutex<()>,
    event: ResetEvent,
    closed: AtomicBool,
}

impl CountdownLatch {
    /// Creates a latch with the given initial count. A zero count starts
    /// signaled.
    pub fn new(count: u32) -> Self {
        Self {
            count: AtomicI64::new(i64::from(count)),
            boundary: Mutex::new(()),
            event: ResetEvent::new(count == 0),
            closed: AtomicBool::new(false),
        }
    }

    /// Current count. Never reports below zero, even while a concurrent
    /// underflowing signal is being rejected.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire).max(0) as u64
    }

    /// Whether the latch is currently signaled.
    pub fn is_set(&self) -> bool {
        self.event.is_set()
    }

    /// The underlying signal. Crate-internal: handing it out would let
    /// callers flip the signal out from under the count.
    pub(crate) fn event(&self) -> &ResetEvent {
        &self.event
    }

    /// Decrements the count. Returns `Ok(true)` iff this call drove the
    /// count to zero and signaled the latch.
    pub fn signal(&self) -> Result<bool, LatchError> {
        self.ensure_open()?;

        let count = self.count.fetch_sub(1, Ordering::AcqRel) - 1;
        if count == 0 {
            let _boundary = self.boundary.lock();
            // Re-check: a racing increment may already have moved the count
            // away from zero, in which case the signal must stay clear.
            if self.count.load(Ordering::Acquire) == 0 && !self.event.is_set() {
                self.event.set();
            }
            return Ok(true);
        }
        if count < 0 {
            return Err(LatchError::Underflow);
        }
        Ok(false)
    }

    /// Increments the count. Returns `Ok(false)` if the latch was in an
    /// underflowed state and the increment could not re-arm it.
    pub fn try_add_count(&self) -> Result<bool, LatchError> {
        self.ensure_open()?;

        if self.count.load(Ordering::Acquire) == i64::MAX {
            return Err(LatchError::Overflow);
        }
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if count <= 0 {
            return Ok(false);
        }
        if count == 1 {
            // Crossed away from zero. Re-check under the boundary lock: a
            // racing decrement may have taken the count back to zero (the
            // signal must stay set), or a decrementer that saw zero may not
            // have flipped the signal yet (its own re-check will see the new
            // count and leave it clear).
            let _boundary = self.boundary.lock();
            if self.count.load(Ordering::Acquire) > 0 && self.event.is_set() {
                self.event.reset();
            }
        }
        Ok(true)
    }

    /// Increments the count, treating an un-re-armable latch as an error.
    pub fn add_count(&self) -> Result<(), LatchError> {
        if !self.try_add_count()? {
            return Err(LatchError::Underflow);
        }
        Ok(())
    }

    /// Sets the count unconditionally and reconciles the signal to match:
    /// signaled iff `count == 0`, regardless of prior state.
    pub fn reset(&self, count: u32) -> Result<(), LatchError> {
        self.ensure_open()?;

        let _boundary = self.boundary.lock();
        self.count.store(i64::from(count), Ordering::Release);
        if count == 0 {
            if !self.event.is_set() {
                self.event.set();
            }
        } else if self.event.is_set() {
            self.event.reset();
        }
        Ok(())
    }

    /// Blocks the calling thread until the latch is signaled.
    ///
    /// Do not call this from async code; use [`wait_async`](Self::wait_async).
    pub fn wait(&self) -> Result<(), LatchError> {
        self.ensure_open()?;
        self.event.wait();
        Ok(())
    }

    /// Blocks the calling thread until the latch is signaled or the timeout
    /// elapses. Returns `Ok(true)` if it was signaled in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, LatchError> {
        self.ensure_open()?;
        Ok(self.event.wait_timeout(timeout))
    }

    /// Suspends until the latch is signaled or the token is cancelled.
    pub async fn wait_async(&self, cancel: &CancellationToken) -> Result<(), LatchError> {
        self.ensure_open()?;
        self.event.wait_async(cancel).await?;
        Ok(())
    }

    /// Suspends until the latch is signaled, the timeout elapses, or the
    /// token is cancelled. Returns `Ok(true)` if it was signaled in time.
    pub async fn wait_timeout_async(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, LatchError> {
        self.ensure_open()?;
        Ok(self.event.wait_timeout_async(timeout, cancel).await?)
    }

    /// Closes the latch: every subsequent operation fails with
    /// [`LatchError::Closed`]. Waiters already blocked are not interrupted;
    /// they keep waiting for the signal as armed at close time.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn ensure_open(&self) -> Result<(), LatchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LatchError::Closed);
        }
        Ok(())
    }
}
