//! Delayed delivery with bounded retry
//!
//! ```text
//!  push ──► {prefix:bucket}:pending ──pop──► {prefix:bucket}:claimed ──success──► deleted
//!                 ▲                                   │
//!                 └─────────── fail (attempts+1) ─────┤
//!                                                     └── fail (exhausted / malformed) ──► deleted
//! ```
//!
//! Buckets are `fire_at mod bucket_count`. `pop` claims every bucket concurrently.

mod clock;
mod config;
mod delayer;
mod item;
mod keys;
mod memory_store;
mod redis_store;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DelayConfig, DelayConfigBuilder};
pub use delayer::{
    BucketStats, DelayHandler, Delayer, DelayerHandle, FailOutcome, QueueStats, MAX_DELAY,
    MIN_DELAY,
};
pub use item::{ClaimedEntry, DelayedItem};
pub use keys::{bucket_of, claimed_key, pending_key};
pub use memory_store::InMemoryDelayStore;
pub use redis_store::RedisDelayStore;
pub use store::DelayStore;
