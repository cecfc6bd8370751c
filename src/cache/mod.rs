use crate::redis_client::RedisClient;
use tracing::info;

pub mod events;

/// Redis-backed read cache for the public event listing. Seat counts are
/// never cached on the booking decision path; only rendered list
/// responses live here, and every booking mutation invalidates them.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
}

impl CacheService {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    pub async fn warmup(&self) {
        info!("Cache connection ready");
    }
}
