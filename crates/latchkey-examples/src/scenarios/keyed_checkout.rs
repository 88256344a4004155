//! Twelve workers contend for three accounts; the keyed mutex serializes
//! work per account while the accounts proceed independently, and a
//! countdown latch gates the end of the day.

use std::sync::Arc;
use std::time::Duration;

use latchkey::sync::{CountdownLatch, KeyedMutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

const WORKERS: u32 = 12;
const ACCOUNTS: [&str; 3] = ["alpha", "bravo", "charlie"];

pub async fn run() {
    let accounts: KeyedMutex<&'static str> = KeyedMutex::new();
    let done = Arc::new(CountdownLatch::new(WORKERS));

    for worker in 0..WORKERS {
        let accounts = accounts.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let account = ACCOUNTS[worker as usize % ACCOUNTS.len()];
            let guard = accounts.lock(account).await;
            info!(worker, account, "checked out");
            tokio::time::sleep(Duration::from_millis(100)).await;
            info!(worker, account, "returned");
            drop(guard);
            done.signal().unwrap();
        });
    }

    let cancel = CancellationToken::new();
    done.wait_async(&cancel).await.unwrap();
    info!(live_entries = accounts.len(), "all workers done");
}
