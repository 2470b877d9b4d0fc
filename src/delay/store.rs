//! Sorted-set storage contract for delayed items

use crate::error::Result;
use async_trait::async_trait;

/// Score-ordered sets with the two atomic moves the scheduler needs.
///
/// Scores are unix seconds. Implementations must make `move_due` and `release`
/// atomic with respect to every other operation on the same keys, including calls
/// from other processes sharing the store.
#[async_trait]
pub trait DelayStore: Send + Sync {
    /// Insert or re-score `member`
    async fn add(&self, key: &str, score: i64, member: &str) -> Result<()>;

    /// Remove `member`; returns whether it was present
    async fn remove(&self, key: &str, member: &str) -> Result<bool>;

    /// Move up to `limit` members of `src` scored at or below `max_score`, lowest first,
    /// into `dst` with score `new_score`. Returns the moved members.
    async fn move_due(
        &self,
        src: &str,
        dst: &str,
        max_score: i64,
        limit: usize,
        new_score: i64,
    ) -> Result<Vec<String>>;

    /// Remove `old_member` from `from` and add `new_member` to `to` with `score`, as one step
    async fn release(
        &self,
        from: &str,
        old_member: &str,
        to: &str,
        score: i64,
        new_member: &str,
    ) -> Result<()>;

    /// Number of members in `key`
    async fn len(&self, key: &str) -> Result<u64>;

    /// Score of `member`, if present
    async fn score(&self, key: &str, member: &str) -> Result<Option<i64>>;
}
