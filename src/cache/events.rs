use crate::cache::CacheService;
use redis::AsyncCommands;

const EVENTS_CACHE_TTL_SECONDS: u64 = 60;

impl CacheService {
    /// Cached JSON for one events-list query, keyed by its parameters.
    pub async fn get_cached_events(&self, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        conn.get(key).await
    }

    pub async fn cache_events(&self, key: &str, json: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        conn.set_ex(key, json, EVENTS_CACHE_TTL_SECONDS).await
    }

    /// Drops every cached list variant. Called after any booking or event
    /// mutation so stale seat counts never outlive a change.
    pub async fn invalidate_events(&self) {
        let mut conn = self.redis.conn.clone();
        let keys: Vec<String> = match redis::cmd("KEYS")
            .arg("events:*")
            .query_async(&mut conn)
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("events cache invalidation failed: {:?}", e);
                return;
            }
        };

        if !keys.is_empty() {
            let mut pipe = redis::pipe();
            for key in &keys {
                pipe.del(key);
            }
            if let Err(e) = pipe.query_async::<()>(&mut conn).await {
                tracing::warn!("events cache invalidation failed: {:?}", e);
            }
        }
    }
}
