use redis::{aio::MultiplexedConnection, Client};
use tracing::debug;

/// Shared multiplexed Redis connection, cloned freely by the cache layer.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        debug!("redis connection established");
        Ok(RedisClient { conn })
    }
}
