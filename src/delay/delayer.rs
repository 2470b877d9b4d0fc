//! Delay scheduler: push, claim, acknowledge and the tick loop driving them

use crate::delay::clock::{Clock, SystemClock};
use crate::delay::config::DelayConfig;
use crate::delay::item::{ClaimedEntry, DelayedItem};
use crate::delay::keys::{bucket_of, claimed_key, pending_key};
use crate::delay::store::DelayStore;
use crate::error::{panic_message, AppError, Result};
use crate::metrics::{MetricsSink, TaskMetrics, TaskSample};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Serialize, Serializer};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Shortest accepted delay
pub const MIN_DELAY: Duration = Duration::from_secs(1);
/// Longest accepted delay
pub const MAX_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const STORE_ATTEMPTS: u32 = 2;
const STORE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Forwards a due item. An error schedules a retry until the attempt budget is spent.
#[async_trait]
pub trait DelayHandler: Send + Sync + 'static {
    async fn handle(&self, item: DelayedItem) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> DelayHandler for F
where
    F: Fn(DelayedItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, item: DelayedItem) -> anyhow::Result<()> {
        (self)(item).await
    }
}

/// What `fail_ack` did with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Moved back to pending for another attempt
    Retried { attempts: u32, fire_at: i64 },
    /// Attempt budget spent; deleted
    Exhausted,
    /// Unparseable or without destination; deleted
    Discarded,
}

/// Pending and claimed counts of one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub bucket: u32,
    pub pending: u64,
    pub claimed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub buckets: Vec<BucketStats>,
}

impl QueueStats {
    pub fn pending(&self) -> u64 {
        self.buckets.iter().map(|b| b.pending).sum()
    }

    pub fn claimed(&self) -> u64 {
        self.buckets.iter().map(|b| b.claimed).sum()
    }
}

impl Serialize for QueueStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("QueueStats", 3)?;
        s.serialize_field("pending", &self.pending())?;
        s.serialize_field("claimed", &self.claimed())?;
        s.serialize_field("buckets", &self.buckets)?;
        s.end()
    }
}

/// Delay scheduler over a sharded [`DelayStore`].
///
/// Items live in exactly one of two sets per bucket: pending (scored by fire time) or
/// claimed (scored by claim time). Every transition between them is a single atomic
/// store operation, so several schedulers may share one keyspace.
#[derive(Clone)]
pub struct Delayer {
    store: Arc<dyn DelayStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    config: Arc<DelayConfig>,
}

impl Delayer {
    pub fn new(store: Arc<dyn DelayStore>, config: DelayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(TaskMetrics::new("kafka.delay")),
            config: Arc::new(config),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &DelayConfig {
        &self.config
    }

    /// Schedule `payload` for `destination` after `delay`; returns the fire time.
    ///
    /// Sub-second delays are rounded up, so the item never fires early.
    pub async fn push<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        payload: &T,
        delay: Duration,
    ) -> Result<i64> {
        if destination.is_empty() {
            return Err(AppError::Validation("destination must not be empty".to_string()));
        }
        if !(MIN_DELAY..=MAX_DELAY).contains(&delay) {
            return Err(AppError::Validation(format!(
                "delay {:?} outside [{:?}, {:?}]",
                delay, MIN_DELAY, MAX_DELAY
            )));
        }

        let payload = serde_json::to_value(payload)?;
        let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
        let fire_at = self.clock.now() + secs as i64;

        let item = DelayedItem::new(destination, payload, fire_at);
        let bucket = bucket_of(fire_at, self.config.bucket_count);
        self.store
            .add(&pending_key(&self.config.prefix, bucket), fire_at, &item.to_member()?)
            .await?;

        debug!(destination = %destination, fire_at, bucket, "Delayed item pushed");
        Ok(fire_at)
    }

    /// Claim due items from every bucket.
    ///
    /// Buckets are claimed concurrently; a bucket whose claim fails is logged and
    /// skipped until the next call.
    pub async fn pop(&self) -> Vec<ClaimedEntry> {
        let now = self.clock.now();

        let mut claims = JoinSet::new();
        for bucket in 0..self.config.bucket_count {
            let this = self.clone();
            claims.spawn(async move {
                let pending = pending_key(&this.config.prefix, bucket);
                let claimed = claimed_key(&this.config.prefix, bucket);
                let moved = this
                    .with_retry("claim", || {
                        this.store
                            .move_due(&pending, &claimed, now, this.config.batch_size, now)
                    })
                    .await;
                (bucket, moved)
            });
        }

        let mut entries = Vec::new();
        while let Some(joined) = claims.join_next().await {
            match joined {
                Ok((bucket, Ok(members))) => {
                    entries.extend(members.into_iter().map(|member| ClaimedEntry { bucket, member }));
                }
                Ok((bucket, Err(e))) => {
                    error!(bucket, error = %e, "Failed to claim due items");
                }
                Err(e) => {
                    error!(error = %e, "Claim task failed");
                }
            }
        }
        entries
    }

    /// Delete a claimed item after it was forwarded. Absent members are not an error.
    pub async fn success_ack(&self, fire_at: i64, member: &str) -> Result<()> {
        if member.is_empty() {
            return Err(AppError::Validation("member must not be empty".to_string()));
        }
        self.ack_in_bucket(bucket_of(fire_at, self.config.bucket_count), member)
            .await
    }

    /// Reschedule a claimed item after a failed forward, or delete it when it is
    /// malformed or out of attempts.
    pub async fn fail_ack(&self, fire_at: i64, member: &str) -> Result<FailOutcome> {
        if member.is_empty() {
            return Err(AppError::Validation("member must not be empty".to_string()));
        }
        self.fail_in_bucket(bucket_of(fire_at, self.config.bucket_count), member)
            .await
    }

    async fn ack_in_bucket(&self, bucket: u32, member: &str) -> Result<()> {
        let claimed = claimed_key(&self.config.prefix, bucket);
        self.with_retry("ack", || self.store.remove(&claimed, member))
            .await?;
        Ok(())
    }

    async fn fail_in_bucket(&self, bucket: u32, member: &str) -> Result<FailOutcome> {
        let claimed = claimed_key(&self.config.prefix, bucket);

        let item = match DelayedItem::from_member(member) {
            Ok(item) if !item.destination.is_empty() => item,
            Ok(_) | Err(_) => {
                error!(bucket, member = %member, "Discarding malformed delayed item");
                self.with_retry("discard", || self.store.remove(&claimed, member))
                    .await?;
                return Ok(FailOutcome::Discarded);
            }
        };

        if item.attempts >= self.config.max_retry_attempts {
            error!(
                destination = %item.destination,
                attempts = item.attempts,
                max = self.config.max_retry_attempts,
                "Max retry attempts exceeded, dropping delayed item"
            );
            self.with_retry("drop", || self.store.remove(&claimed, member))
                .await?;
            return Ok(FailOutcome::Exhausted);
        }

        let fire_at = self.clock.now() + self.config.retry_delay.as_secs().max(1) as i64;
        let next = item.next_attempt(fire_at);
        let next_member = next.to_member()?;
        let pending = pending_key(
            &self.config.prefix,
            bucket_of(fire_at, self.config.bucket_count),
        );

        self.with_retry("release", || {
            self.store
                .release(&claimed, member, &pending, fire_at, &next_member)
        })
        .await?;

        warn!(
            destination = %next.destination,
            attempts = next.attempts,
            fire_at,
            "Delayed item rescheduled"
        );
        Ok(FailOutcome::Retried {
            attempts: next.attempts,
            fire_at,
        })
    }

    /// Move items claimed at or before `claimed_before` back to pending, due now.
    ///
    /// Recovers items whose claimer died before acknowledging them.
    pub async fn requeue_expired(&self, claimed_before: i64) -> Result<usize> {
        let now = self.clock.now();
        let mut requeued = 0;

        for bucket in 0..self.config.bucket_count {
            let claimed = claimed_key(&self.config.prefix, bucket);
            let pending = pending_key(&self.config.prefix, bucket);
            let moved = self
                .with_retry("requeue", || {
                    self.store.move_due(
                        &claimed,
                        &pending,
                        claimed_before,
                        self.config.batch_size,
                        now,
                    )
                })
                .await?;
            requeued += moved.len();
        }

        if requeued > 0 {
            warn!(requeued, claimed_before, "Requeued expired claims");
        }
        Ok(requeued)
    }

    /// Pending and claimed counts per bucket
    pub async fn stats(&self) -> Result<QueueStats> {
        let mut buckets = Vec::with_capacity(self.config.bucket_count as usize);
        for bucket in 0..self.config.bucket_count {
            buckets.push(BucketStats {
                bucket,
                pending: self
                    .store
                    .len(&pending_key(&self.config.prefix, bucket))
                    .await?,
                claimed: self
                    .store
                    .len(&claimed_key(&self.config.prefix, bucket))
                    .await?,
            });
        }
        Ok(QueueStats { buckets })
    }

    /// Run one scheduling round: requeue expired claims if configured, claim due items
    /// and process them with at most `concurrency` in flight. Returns the number claimed.
    pub async fn tick(&self, handler: &Arc<dyn DelayHandler>) -> usize {
        if let Some(timeout) = self.config.visibility_timeout {
            let cutoff = self.clock.now() - timeout.as_secs() as i64;
            if let Err(e) = self.requeue_expired(cutoff).await {
                error!(error = %e, "Failed to requeue expired claims");
            }
        }

        let entries = self.pop().await;
        let claimed = entries.len();
        if claimed == 0 {
            return 0;
        }
        debug!(claimed, "Processing due items");

        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut workers = JoinSet::new();
        for entry in entries {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let handler = handler.clone();
            workers.spawn(async move {
                this.process(handler.as_ref(), entry).await;
                drop(permit);
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Delay worker failed");
            }
        }
        claimed
    }

    async fn process(&self, handler: &dyn DelayHandler, entry: ClaimedEntry) {
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.forward(handler, &entry))
            .catch_unwind()
            .await;

        let forwarded = match outcome {
            Ok(Ok(forwarded)) => forwarded,
            Ok(Err(e)) => {
                error!(bucket = entry.bucket, error = %e, "Delayed item acknowledgement failed");
                false
            }
            Err(panic) => {
                error!(
                    bucket = entry.bucket,
                    member = %entry.member,
                    panic = %panic_message(panic.as_ref()),
                    "Delayed item handler panicked"
                );
                if let Err(e) = self.fail_in_bucket(entry.bucket, &entry.member).await {
                    error!(bucket = entry.bucket, error = %e, "Delayed item acknowledgement failed");
                }
                false
            }
        };

        self.metrics.add(TaskSample::new(started.elapsed(), !forwarded));
    }

    /// Returns whether the item was forwarded
    async fn forward(&self, handler: &dyn DelayHandler, entry: &ClaimedEntry) -> Result<bool> {
        let item = match DelayedItem::from_member(&entry.member) {
            Ok(item) if !item.destination.is_empty() => item,
            Ok(_) => {
                error!(member = %entry.member, "Delayed item has no destination, dropping");
                self.ack_in_bucket(entry.bucket, &entry.member).await?;
                return Ok(false);
            }
            Err(e) => {
                error!(member = %entry.member, error = %e, "Delayed item unreadable, dropping");
                self.ack_in_bucket(entry.bucket, &entry.member).await?;
                return Ok(false);
            }
        };

        let destination = item.destination.clone();
        let attempts = item.attempts;
        info!(destination = %destination, attempts, "Forwarding delayed item");

        match handler.handle(item).await {
            Ok(()) => {
                self.ack_in_bucket(entry.bucket, &entry.member).await?;
                Ok(true)
            }
            Err(e) => {
                error!(
                    destination = %destination,
                    attempts,
                    error = %format!("{:#}", e),
                    "Delayed item forward failed"
                );
                let outcome = self.fail_in_bucket(entry.bucket, &entry.member).await?;
                debug!(destination = %destination, outcome = ?outcome, "Failure acknowledged");
                Ok(false)
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < STORE_ATTEMPTS && e.is_transient() => {
                    warn!(op, attempt, error = %e, "Delay store call failed, retrying");
                    tokio::time::sleep(STORE_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Spawn the tick loop. It runs until [`DelayerHandle::stop`] is called or the
    /// handle is dropped; a tick in progress is always finished first.
    pub fn start<H: DelayHandler>(&self, handler: H) -> DelayerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handler: Arc<dyn DelayHandler> = Arc::new(handler);
        let this = self.clone();
        let task = tokio::spawn(async move { this.run(handler, stop_rx).await });

        DelayerHandle {
            stop: stop_tx,
            task,
        }
    }

    async fn run(self, handler: Arc<dyn DelayHandler>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            prefix = %self.config.prefix,
            buckets = self.config.bucket_count,
            concurrency = self.config.concurrency,
            "Delay scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.tick(&handler).await;
        }

        info!("Delay scheduler stopped");
    }
}

/// Controls a running tick loop
pub struct DelayerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DelayerHandle {
    /// Ask the loop to exit after the current tick
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Wait for the loop to exit
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| AppError::Internal(format!("delay scheduler task failed: {}", e)))
    }

    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }
}
