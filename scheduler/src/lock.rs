use std::time::Duration;

use async_trait::async_trait;
use common::error::{AppError, Res};
use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

/// Keeps two runs of the same sweep from overlapping, within one process or
/// across several.
#[async_trait]
pub trait RunLock: Send + Sync {
    /// Returns a token when the lock was taken, `None` when someone else
    /// holds it.
    async fn try_acquire(&self, job: &str, ttl: Duration) -> Res<Option<String>>;

    /// Releases the lock if `token` still owns it.
    async fn release(&self, job: &str, token: &str) -> Res<()>;
}

/// Process-local lock. The TTL is ignored; a lock is held until released.
#[derive(Default)]
pub struct LocalRunLock {
    held: DashMap<String, String>,
}

impl LocalRunLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLock for LocalRunLock {
    async fn try_acquire(&self, job: &str, _ttl: Duration) -> Res<Option<String>> {
        match self.held.entry(job.to_string()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(slot) => {
                let token = Uuid::new_v4().to_string();
                slot.insert(token.clone());
                Ok(Some(token))
            }
        }
    }

    async fn release(&self, job: &str, token: &str) -> Res<()> {
        self.held.remove_if(job, |_, owner| owner == token);
        Ok(())
    }
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock shared by every instance talking to the same Redis. A crashed holder
/// loses the lock once the TTL runs out.
pub struct RedisRunLock {
    pool: deadpool_redis::Pool,
    prefix: String,
}

impl RedisRunLock {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self {
            pool,
            prefix: "sweep:lock".to_string(),
        }
    }

    fn key(&self, job: &str) -> String {
        format!("{}:{}", self.prefix, job)
    }

    async fn connection(&self) -> Res<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to get Redis connection: {}", e)))
    }
}

#[async_trait]
impl RunLock for RedisRunLock {
    async fn try_acquire(&self, job: &str, ttl: Duration) -> Res<Option<String>> {
        let mut conn = self.connection().await?;
        let token = Uuid::new_v4().to_string();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(self.key(job))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| token))
    }

    async fn release(&self, job: &str, token: &str) -> Res<()> {
        let mut conn = self.connection().await?;
        let released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.key(job))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        if released == 0 {
            log::warn!(
                "Run-lock for sweep {} expired before the run finished",
                job
            );
        }
        Ok(())
    }
}
