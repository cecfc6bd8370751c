use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gastrotour::{config::Config, controllers, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Münchner Gastrotour API");

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port).parse()?;
    let state = AppState::new(config).await?;
    info!("Database and Redis connected");

    // --- Background tasks ---

    // Drop idle rate-limiter entries every 5 minutes.
    let limiter = state.rate_limiter.clone();
    task::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            limiter.cleanup();
        }
    });

    // --- Web server ---

    let app = Router::new()
        .route("/", get(|| async { "Münchner Gastrotour API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http());

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
