use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, SharedError};
use crate::renew::driver::{self, LoopConfig};

/// Options for [`RecurringTask`] and [`RenewableValue`](crate::renew::RenewableValue).
#[derive(Debug, Clone)]
pub struct RecurringOptions {
    pub(crate) interval: Duration,
    pub(crate) restart_backoff: Duration,
}

impl RecurringOptions {
    /// Backoff applied when the very first run fails, before the loop starts
    /// over from scratch.
    pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(60);

    /// Options with the given inter-run interval and the default restart
    /// backoff.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            restart_backoff: Self::DEFAULT_RESTART_BACKOFF,
        }
    }

    /// Overrides the first-run restart backoff.
    pub fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }
}

/// Runs an action repeatedly on an interval, in the background.
///
/// The first run starts immediately on spawn. After a successful run the
/// loop waits for the interval, an early [`run_now`](Self::run_now) trigger,
/// or cancellation — whichever comes first. A failed (or panicking) run is
/// reported through `tracing` and never escapes the loop; recovery is
/// two-tier: a fault on the very first run backs off
/// [`RecurringOptions::restart_backoff`] and starts over, a fault on any
/// later run backs off the plain interval and proceeds to the next run.
///
/// Runs are strictly sequential — a new run never starts while the previous
/// one is in flight. Each run receives a child cancellation token it may
/// observe cooperatively; cancellation itself is only acted on at the loop's
/// suspension points, never by aborting a run mid-flight.
///
/// Dropping the task requests cancellation without waiting;
/// [`shutdown`](Self::shutdown) also waits for the loop to wind down.
pub struct RecurringTask {
    cancel: CancellationToken,
    trigger: Arc<Notify>,
    driver: JoinHandle<()>,
}

impl RecurringTask {
    /// Spawns the loop; the first run starts immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F, Fut>(options: RecurringOptions, mut action: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let trigger = Arc::new(Notify::new());

        let step_cancel = cancel.clone();
        let step = move || {
            let fut = action(step_cancel.child_token());
            async move { fut.await.map_err(SharedError::from) }
        };

        let driver = tokio::spawn(driver::drive(
            LoopConfig {
                label: "recurring_task",
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
        }
    }

    /// Wakes the loop if it is waiting between runs, starting the next run
    /// immediately. One-shot: a trigger raised while a run is in flight is
    /// consumed by the next wait, and never starts a concurrent run.
    pub fn run_now(&self) {
        self.trigger.notify_one();
    }

    /// The token cancelled when this task shuts down. Useful for tying other
    /// work to the loop's lifetime.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the loop has fully stopped.
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

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
