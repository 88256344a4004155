//! A renewable value standing in for a config endpoint: refreshed on an
//! interval, one deliberately failed fetch (the cached value stays
//! readable), and a manual early refresh at the end.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use latchkey::renew::{RecurringOptions, RenewableValue};
use tracing::info;

#[derive(Clone, Debug)]
struct Config {
    generation: u64,
    ttl_secs: u64,
}

pub async fn run() {
    let fetches = Arc::new(AtomicU64::new(0));
    let config = RenewableValue::spawn(
        RecurringOptions::new(Duration::from_millis(400))
            .restart_backoff(Duration::from_secs(2)),
        {
            let fetches = fetches.clone();
            move |_cancel| {
                let fetches = fetches.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let generation = fetches.fetch_add(1, Ordering::SeqCst) + 1;
                    if generation == 2 {
                        return Err("upstream hiccup".into());
                    }
                    Ok(Config {
                        generation,
                        ttl_secs: 30,
                    })
                }
            }
        },
    );

    info!(current = ?config.current(), "before the first fetch");
    let first = config.value().await.expect("first fetch");
    info!(
        generation = first.generation,
        ttl_secs = first.ttl_secs,
        "first fetch done"
    );

    // The second fetch fails; the cached value stays readable and stale.
    tokio::time::sleep(Duration::from_millis(700)).await;
    info!(current = ?config.current(), "after the failed refresh");

    config.run_now();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let fresh = config.value().await.expect("manual refresh");
    info!(?fresh, "manual refresh done");

    config.shutdown().await;
}
