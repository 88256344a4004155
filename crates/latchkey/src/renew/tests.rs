use super::*;
use crate::error::{BoxError, RenewError};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fault paths log through tracing; surface that output in test failures.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("latchkey=debug")
        .with_test_writer()
        .try_init();
}

async fn wait_until(what: &str, deadline: Duration, mut cond: impl FnMut() -> bool) {
    let steps = (deadline.as_millis() / 5).max(1);
    for _ in 0..steps {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cond(), "{what} not reached within {deadline:?}");
}

// ── RecurringTask ───────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn recurring_runs_on_interval() {
    let runs = Arc::new(AtomicUsize::new(0));
    let task = RecurringTask::spawn(RecurringOptions::new(Duration::from_millis(25)), {
        let runs = runs.clone();
        move |_cancel| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(120)).await;
    let seen = runs.load(Ordering::SeqCst);
    assert!(seen >= 3, "expected at least 3 runs, saw {seen}");
    task.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn recurring_first_fault_takes_restart_backoff() {
    init_tracing();
    let runs = Arc::new(AtomicUsize::new(0));
    let task = RecurringTask::spawn(
        RecurringOptions::new(Duration::from_millis(20))
            .restart_backoff(Duration::from_millis(300)),
        {
            let runs = runs.clone();
            move |_cancel| {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err::<(), BoxError>("boom".into())
                }
            }
        },
    );

    // Five intervals in, the loop must still be sitting out the restart
    // backoff rather than retrying on the interval.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // After the backoff it starts over; the retry is first-tier again, so
    // run three is another full backoff away.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    task.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn recurring_later_faults_back_off_the_interval() {
    let runs = Arc::new(AtomicUsize::new(0));
    let task = RecurringTask::spawn(
        RecurringOptions::new(Duration::from_millis(25)).restart_backoff(Duration::from_secs(60)),
        {
            let runs = runs.clone();
            move |_cancel| {
                let runs = runs.clone();
                async move {
                    let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 1 {
                        Ok(())
                    } else {
                        Err::<(), BoxError>("flaky".into())
                    }
                }
            }
        },
    );

    // Only an interval-tier backoff after each later fault keeps this
    // cadence; the 60s restart backoff would stall it after run 2.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let seen = runs.load(Ordering::SeqCst);
    assert!(seen >= 4, "expected at least 4 runs, saw {seen}");
    task.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn recurring_trigger_wakes_a_pending_wait() {
    let runs = Arc::new(AtomicUsize::new(0));
    let task = RecurringTask::spawn(RecurringOptions::new(Duration::from_secs(10)), {
        let runs = runs.clone();
        move |_cancel| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }
    });

    wait_until("first run", Duration::from_secs(1), || {
        runs.load(Ordering::SeqCst) == 1
    })
    .await;

    task.run_now();
    wait_until("triggered run", Duration::from_millis(500), || {
        runs.load(Ordering::SeqCst) == 2
    })
    .await;
    task.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recurring_trigger_never_overlaps_runs() {
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let task = RecurringTask::spawn(RecurringOptions::new(Duration::from_secs(10)), {
        let inside = inside.clone();
        let peak = peak.clone();
        let runs = runs.clone();
        move |_cancel| {
            let inside = inside.clone();
            let peak = peak.clone();
            let runs = runs.clone();
            async move {
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }
    });

    // Trigger while the first run is still in flight; the stored wake starts
    // run two only after run one finishes.
    tokio::time::sleep(Duration::from_millis(20)).await;
    task.run_now();

    wait_until("second run", Duration::from_secs(2), || {
        runs.load(Ordering::SeqCst) == 2
    })
    .await;
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    task.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn recurring_no_runs_after_cancellation() {
    let runs = Arc::new(AtomicUsize::new(0));
    let task = RecurringTask::spawn(RecurringOptions::new(Duration::from_millis(20)), {
        let runs = runs.clone();
        move |_cancel| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    task.cancel_token().cancel();
    wait_until("loop stopped", Duration::from_secs(1), || task.is_stopped()).await;

    let seen = runs.load(Ordering::SeqCst);
    task.run_now();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), seen);
}

#[tokio::test(flavor = "current_thread")]
async fn recurring_panicking_run_is_contained() {
    init_tracing();
    let runs = Arc::new(AtomicUsize::new(0));
    let task = RecurringTask::spawn(
        RecurringOptions::new(Duration::from_millis(20)).restart_backoff(Duration::from_secs(60)),
        {
            let runs = runs.clone();
            move |_cancel| {
                let runs = runs.clone();
                async move {
                    let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 2 {
                        panic!("kaboom");
                    }
                    Ok::<(), BoxError>(())
                }
            }
        },
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    let seen = runs.load(Ordering::SeqCst);
    assert!(seen >= 4, "loop must survive the panic, saw {seen} runs");
    task.shutdown().await;
}

// ── RenewableValue ──────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn renewable_current_is_empty_until_first_success() {
    let resource = RenewableValue::spawn(RecurringOptions::new(Duration::from_secs(10)), |_| {
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<u32, BoxError>(7)
        }
    });

    assert_eq!(resource.current(), None);
    assert_eq!(resource.current_or_default(), 0);

    assert_eq!(resource.value().await.unwrap(), 7);
    assert_eq!(resource.current(), Some(7));
    resource.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn renewable_keeps_last_value_while_refreshing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let resource = RenewableValue::spawn(RecurringOptions::new(Duration::from_secs(10)), {
        let calls = calls.clone();
        move |_cancel| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    Ok::<&str, BoxError>("a")
                } else {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok("b")
                }
            }
        }
    });

    wait_until("first value", Duration::from_secs(1), || {
        resource.current() == Some("a")
    })
    .await;

    resource.run_now();
    tokio::time::sleep(Duration::from_millis(30)).await;
    // Refresh in flight: the cached value stays readable and stale.
    assert_eq!(resource.current(), Some("a"));

    assert_eq!(resource.value().await.unwrap(), "b");
    assert_eq!(resource.current(), Some("b"));
    resource.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn renewable_value_propagates_run_failure() {
    let resource = RenewableValue::spawn(
        RecurringOptions::new(Duration::from_millis(20)).restart_backoff(Duration::from_secs(60)),
        |_| async { Err::<u32, BoxError>("nope".into()) },
    );

    let err = resource.value().await.unwrap_err();
    match err {
        RenewError::Faulted(source) => assert_eq!(source.to_string(), "nope"),
        other => panic!("expected a fault, got {other}"),
    }
    assert_eq!(resource.current(), None);
    resource.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn renewable_run_now_refreshes_immediately() {
    let calls = Arc::new(AtomicUsize::new(0));
    let resource = RenewableValue::spawn(RecurringOptions::new(Duration::from_secs(10)), {
        let calls = calls.clone();
        move |_cancel| {
            let calls = calls.clone();
            async move { Ok::<usize, BoxError>(calls.fetch_add(1, Ordering::SeqCst) + 1) }
        }
    });

    assert_eq!(resource.value().await.unwrap(), 1);
    resource.run_now();
    wait_until("refreshed value", Duration::from_millis(500), || {
        resource.current() == Some(2)
    })
    .await;
    resource.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn renewable_value_reports_shutdown_without_a_run() {
    // A panicking run publishes no outcome at all, leaving nothing for
    // `value` to settle on once the loop is gone.
    async fn panicking_factory() -> Result<u32, BoxError> {
        panic!("no value today")
    }

    let resource = RenewableValue::spawn(
        RecurringOptions::new(Duration::from_millis(20)).restart_backoff(Duration::from_secs(60)),
        |_| panicking_factory(),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    resource.cancel_token().cancel();
    wait_until("loop stopped", Duration::from_secs(1), || {
        resource.is_stopped()
    })
    .await;

    assert!(matches!(resource.value().await, Err(RenewError::Shutdown)));
    assert_eq!(resource.current(), None);
}
