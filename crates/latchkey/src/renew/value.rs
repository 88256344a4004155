use std::sync::Arc;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, RenewError, SharedError};
use crate::renew::driver::{self, LoopConfig};
use crate::renew::recurring::RecurringOptions;

/// Progress of the renew loop, published per run: a slot with no outcome is
/// a run in flight. Slots are replaced, never mutated.
#[derive(Clone)]
struct RunSlot {
    seq: u64,
    outcome: Option<Result<(), SharedError>>,
}

/// A value that a background loop keeps fresh.
///
/// The loop invokes the factory immediately on spawn and then on every
/// interval, caching the result of each successful run. Loop scheduling,
/// fault handling, the two-tier backoff, and the [`run_now`](Self::run_now)
/// trigger are identical to [`RecurringTask`](crate::renew::RecurringTask);
/// what the factory produced is read through:
///
/// - [`current`](Self::current) — the last successfully produced value,
///   without suspending. Stable while a newer run is in flight.
/// - [`value`](Self::value) — suspends until the most recently started run
///   completes; returns its value, or its failure. The background loop
///   swallows factory errors for scheduling purposes, but an explicit
///   awaiter gets them propagated.
pub struct RenewableValue<T> {
    cancel: CancellationToken,
    trigger: Arc<Notify>,
    driver: JoinHandle<()>,
    value_rx: watch::Receiver<Option<T>>,
    run_rx: watch::Receiver<RunSlot>,
}

impl<T> RenewableValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawns the refresh loop; the first factory run starts immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F, Fut>(options: RecurringOptions, mut factory: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let trigger = Arc::new(Notify::new());
        let (value_tx, value_rx) = watch::channel(None);
        let (run_tx, run_rx) = watch::channel(RunSlot {
            seq: 0,
            outcome: None,
        });

        let step = {
            let cancel = cancel.clone();
            let mut seq = 0u64;
            move || {
                seq += 1;
                let this_seq = seq;
                let fut = factory(cancel.child_token());
                let run_tx = run_tx.clone();
                let value_tx = value_tx.clone();
                async move {
                    run_tx.send_replace(RunSlot {
                        seq: this_seq,
                        outcome: None,
                    });
                    match fut.await {
                        Ok(value) => {
                            // Publish the value before the completion slot so
                            // an awaiter woken by the outcome always sees it.
                            value_tx.send_replace(Some(value));
                            run_tx.send_replace(RunSlot {
                                seq: this_seq,
                                outcome: Some(Ok(())),
                            });
                            Ok(())
                        }
                        Err(err) => {
                            let err = SharedError::from(err);
                            run_tx.send_replace(RunSlot {
                                seq: this_seq,
                                outcome: Some(Err(err.clone())),
                            });
                            Err(err)
                        }
                    }
                }
            }
        };

        let driver = tokio::spawn(driver::drive(
            LoopConfig {
                label: "renewable_value",
                interval: options.interval,
                restart_backoff: options.restart_backoff,
            },
            cancel.clone(),
            trigger.clone(),
            step,
        ));

        Self {
            cancel,
            trigger,
            driver,
            value_rx,
            run_rx,
        }
    }

    /// The last successfully produced value, without suspending. `None`
    /// until the first run succeeds; afterwards always the most recent
    /// success, even while a newer run is in flight.
    pub fn current(&self) -> Option<T> {
        self.value_rx.borrow().clone()
    }

    /// Like [`current`](Self::current), with `T::default()` standing in
    /// until the first success.
    pub fn current_or_default(&self) -> T
    where
        T: Default,
    {
        self.current().unwrap_or_default()
    }

    /// Suspends until the most recently started run completes and returns
    /// its value — or propagates its failure. If no run is in flight, the
    /// last completed run answers immediately.
    pub async fn value(&self) -> Result<T, RenewError> {
        let mut rx = self.run_rx.clone();
        let target = rx.borrow().seq;
        let outcome = rx
            .wait_for(|slot| slot.seq >= target && slot.outcome.is_some())
            .await
            .map_err(|_| RenewError::Shutdown)?
            .outcome
            .clone()
            .expect("outcome present per wait predicate");
        match outcome {
            Ok(()) => self.current().ok_or(RenewError::Shutdown),
            Err(err) => Err(RenewError::Faulted(err)),
        }
    }

    /// Wakes the loop if it is waiting between runs, refreshing immediately.
    /// One-shot, and never starts a run concurrent with one in flight.
    pub fn run_now(&self) {
        self.trigger.notify_one();
    }

    /// The token cancelled when this value shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the refresh loop has fully stopped. The cached value remains
    /// readable.
    pub fn is_stopped(&self) -> bool {
        self.driver.is_finished()
    }

    /// Requests cancellation and waits for the loop to stop. A run in flight
    /// is not aborted; the loop stops after it finishes.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.driver).await;
    }
}

impl<T> Drop for RenewableValue<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
