//! Synchronization primitives: per-key mutual exclusion, countdown latches,
//! and a blocking/async manual-reset signal.

mod event;
mod keyed;
mod latch;

pub use event::{ResetEvent, WatchGuard};
pub use keyed::{KeyedGuard, KeyedMutex};
pub use latch::CountdownLatch;
