//! Keyed async locks, auto-reset countdown latches, and self-renewing values
//! for Tokio-based systems.
//!
//! Latchkey is a small toolkit for coordinating concurrent work:
//!
//! - [`sync::KeyedMutex`] — mutual exclusion per key. At most one holder per
//!   key at any instant, waiters served strictly in arrival order, entries
//!   evicted once nobody holds or wants them.
//! - [`sync::CountdownLatch`] — a reusable count-to-zero gate that un-signals
//!   automatically when re-armed, safe against set/reset races at the
//!   zero boundary.
//! - [`sync::ResetEvent`] — a manual-reset signal usable from both blocking
//!   and async contexts, with persistent watch callbacks.
//! - [`renew::RecurringTask`] — runs an action on an interval with fault
//!   backoff, cooperative cancellation, and an on-demand early trigger.
//! - [`renew::RenewableValue`] — same loop, but caches the last successfully
//!   produced value and exposes non-suspending and awaitable readers.
//! - [`scoped`] — explicit-release scope guards for values whose teardown
//!   is async.
//!
//! Everything here assumes a Tokio runtime. Cancellation flows through
//! [`tokio_util::sync::CancellationToken`]; faults are reported through
//! [`tracing`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use latchkey::renew::{RecurringOptions, RenewableValue};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RenewableValue::spawn(
//!         RecurringOptions::new(Duration::from_secs(30)),
//!         |_cancel| async move { Ok(fetch_config().await) },
//!     );
//!
//!     // Non-suspending best-effort read.
//!     if let Some(snapshot) = config.current() {
//!         println!("ttl = {}", snapshot.ttl);
//!     }
//!
//!     // Suspend until the most recently started refresh completes.
//!     let fresh = config.value().await.unwrap();
//!     println!("ttl = {}", fresh.ttl);
//! }
//!
//! # #[derive(Clone)] struct Config { ttl: u64 }
//! # async fn fetch_config() -> Config { Config { ttl: 60 } }
//! ```

pub mod error;
pub mod renew;
pub mod scoped;
pub mod sync;

pub use error::{BoxError, Cancelled, LatchError, RenewError};
pub use renew::{RecurringOptions, RecurringTask, RenewableValue};
pub use scoped::{DeferGuard, ScopedValue, defer};
pub use sync::{CountdownLatch, KeyedGuard, KeyedMutex, ResetEvent, WatchGuard};
