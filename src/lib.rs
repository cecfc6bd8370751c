pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod middleware;
pub mod models;
pub mod rate_limiter;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;
use tokio::task;

use services::booking::BookingService;
use store::postgres::PgBookingStore;

// Shared state for the whole application.
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub config: config::Config,
    pub bookings: BookingService<PgBookingStore>,
    pub email: services::email::EmailClient,
    pub error_log: services::error_log::ErrorTracker,
    pub rate_limiter: rate_limiter::RateLimiter,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;

        db.run_migrations().await?;

        let redis = redis_client::RedisClient::new(&config.redis.url).await?;
        let cache = cache::CacheService::new(redis.clone());
        let email = services::email::EmailClient::from_config(&config.email);
        let error_log = services::error_log::ErrorTracker::new(db.clone());
        let bookings = BookingService::new(PgBookingStore::new(db.pool.clone()));

        let state = Arc::new(Self {
            db,
            redis,
            cache,
            config,
            bookings,
            email,
            error_log,
            rate_limiter: rate_limiter::RateLimiter::new(),
        });

        let state_for_bg = state.clone();
        task::spawn(async move {
            state_for_bg.cache.warmup().await;
        });

        Ok(state)
    }
}
