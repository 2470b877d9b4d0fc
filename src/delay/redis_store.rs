use crate::delay::store::DelayStore;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

/// Move due members from KEYS[1] to KEYS[2].
/// ARGV: max score, limit, new score.
const MOVE_DUE_SCRIPT: &str = r#"
local members = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, member in ipairs(members) do
    redis.call('ZREM', KEYS[1], member)
    redis.call('ZADD', KEYS[2], ARGV[3], member)
end
return members
"#;

/// Remove ARGV[1] from KEYS[1] and add ARGV[3] to KEYS[2] with score ARGV[2].
const RELEASE_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
return 1
"#;

/// Redis sorted-set store; moves run as Lua scripts
#[derive(Clone)]
pub struct RedisDelayStore {
    connection: ConnectionManager,
    move_due: Script,
    release: Script,
}

impl RedisDelayStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            AppError::Configuration(format!("Invalid Redis URL '{}': {}", redis_url, e))
        })?;

        let connection = ConnectionManager::new(client).await?;

        let mut test_conn = connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut test_conn)
            .await?;

        tracing::info!("Initialized Redis delay store");

        Ok(Self {
            connection,
            move_due: Script::new(MOVE_DUE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl DelayStore for RedisDelayStore {
    async fn add(&self, key: &str, score: i64, member: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn move_due(
        &self,
        src: &str,
        dst: &str,
        max_score: i64,
        limit: usize,
        new_score: i64,
    ) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let moved: Vec<String> = self
            .move_due
            .key(src)
            .key(dst)
            .arg(max_score)
            .arg(limit)
            .arg(new_score)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn release(
        &self,
        from: &str,
        old_member: &str,
        to: &str,
        score: i64,
        new_member: &str,
    ) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = self
            .release
            .key(from)
            .key(to)
            .arg(old_member)
            .arg(score)
            .arg(new_member)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let len: u64 = conn.zcard(key).await?;
        Ok(len)
    }

    async fn score(&self, key: &str, member: &str) -> Result<Option<i64>> {
        let mut conn = self.connection.clone();
        let score: Option<f64> = conn.zscore(key, member).await?;
        Ok(score.map(|s| s as i64))
    }
}
