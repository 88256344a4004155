use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::SharedError;

pub(crate) struct LoopConfig {
    pub label: &'static str,
    pub interval: Duration,
    pub restart_backoff: Duration,
}

/// The loop's explicit state machine. `first` / `restart` track whether the
/// next run still counts as the initial one: a fault there takes the fixed
/// restart backoff and starts over, while a fault on any later run backs off
/// the plain interval and keeps going.
enum Phase {
    Run { first: bool },
    Wait { delay: Duration, restart: bool },
    Stopped,
}

/// Drives one loop to completion. Each run executes on its own spawned task,
/// so a panicking action is contained and handled like any other fault.
/// Cancellation is observed at suspension points only; a run already in
/// flight is never aborted.
pub(crate) async fn drive<S, Fut>(
    cfg: LoopConfig,
    cancel: CancellationToken,
    trigger: Arc<Notify>,
    mut step: S,
) where
    S: FnMut() -> Fut,
    Fut: Future<Output = Result<(), SharedError>> + Send + 'static,
{
    let mut phase = Phase::Run { first: true };
    loop {
        phase = match phase {
            Phase::Run { first } => {
                if cancel.is_cancelled() {
                    Phase::Stopped
                } else {
                    run_once(&cfg, first, step()).await
                }
            }
            Phase::Wait { delay, restart } => {
                tokio::select! {
                    _ = cancel.cancelled() => Phase::Stopped,
                    _ = tokio::time::sleep(delay) => Phase::Run { first: restart },
                    _ = trigger.notified() => Phase::Run { first: restart },
                }
            }
            Phase::Stopped => break,
        };
    }
    tracing::debug!(task = cfg.label, "loop stopped");
}

async fn run_once<Fut>(cfg: &LoopConfig, first: bool, fut: Fut) -> Phase
where
    Fut: Future<Output = Result<(), SharedError>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(Ok(())) => Phase::Wait {
            delay: cfg.interval,
            restart: false,
        },
        Ok(Err(err)) => {
            tracing::error!(task = cfg.label, error = %err, first, "run failed");
            backoff(cfg, first)
        }
        Err(join_err) if join_err.is_panic() => {
            tracing::error!(task = cfg.label, error = %join_err, first, "run panicked");
            backoff(cfg, first)
        }
        // The run task was torn down under us (runtime shutdown).
        Err(_) => Phase::Stopped,
    }
}

fn backoff(cfg: &LoopConfig, first: bool) -> Phase {
    if first {
        Phase::Wait {
            delay: cfg.restart_backoff,
            restart: true,
        }
    } else {
        Phase::Wait {
            delay: cfg.interval,
            restart: false,
        }
    }
}
