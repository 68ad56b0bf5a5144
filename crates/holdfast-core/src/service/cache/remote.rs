// Shared lock cache backed by Redis

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;

use super::LockCache;

// Compare-and-delete so a gate holder never removes a token it no longer owns
const DELETE_IF_VALUE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis cache shared by every server process
#[derive(Clone)]
pub struct RedisLockCache {
    conn: ConnectionManager,
    delete_if_value: Script,
}

impl RedisLockCache {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            delete_if_value: Script::new(DELETE_IF_VALUE_SCRIPT),
        })
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        // PX 0 is rejected by Redis
        (ttl.as_millis() as u64).max(1)
    }
}

#[async_trait]
impl LockCache for RedisLockCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(Self::ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(Self::ttl_millis(ttl))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .delete_if_value
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}
