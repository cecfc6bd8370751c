use serde::Deserialize;
use std::env;

// Top-level configuration container, one struct per concern.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Transactional email provider (Resend-compatible HTTP API).
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub reply_to: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "gastrotour=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            email: EmailConfig {
                api_url: env::var("EMAIL_API_URL")
                    .unwrap_or_else(|_| "https://api.resend.com".to_string()),
                api_key: env::var("EMAIL_API_KEY").expect("EMAIL_API_KEY must be set"),
                from: env::var("EMAIL_FROM").unwrap_or_else(|_| {
                    "Münchner Gastrotour <noreply@muenchner-gastrotour.de>".to_string()
                }),
                reply_to: env::var("EMAIL_REPLY_TO")
                    .unwrap_or_else(|_| "info@muenchner-gastrotour.de".to_string()),
            },
        }
    }
}
