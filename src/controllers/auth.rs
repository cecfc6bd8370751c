use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::middleware::{client_ip, AuthUser};
use crate::models::User;
use crate::rate_limiter::LIMIT_REGISTER;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/me", get(me))
}

// POST /api/auth/register
#[derive(Debug, Deserialize, Validate)]
struct RegisterRequest {
    #[validate(length(min = 2, max = 80))]
    name: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 128))]
    password: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let decision = state
        .rate_limiter
        .check(&format!("register:{}", client_ip(&headers)), LIMIT_REGISTER);
    if !decision.allowed {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            "Zu viele Registrierungsversuche, bitte warte eine Stunde".to_string(),
        ));
    }

    if req.validate().is_err() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Name, gültige E-Mail und ein Passwort mit mindestens 8 Zeichen sind erforderlich"
                .to_string(),
        ));
    }

    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST).map_err(|e| {
        tracing::error!("password hashing failed: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Registrierung fehlgeschlagen".to_string(),
        )
    })?;

    let res = sqlx::query_as::<_, User>(
        "INSERT INTO users (email, name, password_hash)
         VALUES ($1, $2, $3)
         RETURNING *",
    )
    .bind(req.email.to_lowercase())
    .bind(&req.name)
    .bind(&password_hash)
    .fetch_one(&state.db.pool)
    .await;

    match res {
        Ok(user) => Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({
                "user": { "id": user.id, "name": user.name, "email": user.email }
            })),
        )),
        Err(sqlx::Error::Database(db)) if db.constraint() == Some("users_email_key") => Err((
            StatusCode::CONFLICT,
            "Diese E-Mail-Adresse ist bereits registriert".to_string(),
        )),
        Err(e) => {
            tracing::error!("register sql error: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registrierung fehlgeschlagen".to_string(),
            ))
        }
    }
}

// GET /api/auth/me
async fn me(user: AuthUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "user": {
            "id": user.user_id,
            "email": user.email,
            "name": user.name,
            "isAdmin": user.is_admin,
        }
    }))
}
