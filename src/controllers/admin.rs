use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/admin/errors", get(recent_errors))
}

// GET /api/admin/errors
#[derive(Debug, Deserialize)]
struct ErrorsQuery {
    limit: Option<i64>,
}

async fn recent_errors(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<ErrorsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !user.is_admin {
        return Err((
            StatusCode::FORBIDDEN,
            "Nur für Administratoren".to_string(),
        ));
    }

    let entries = state
        .error_log
        .recent(params.limit.unwrap_or(50))
        .await
        .map_err(|e| {
            tracing::error!("recent_errors sql error: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Fehlerprotokoll konnte nicht geladen werden".to_string(),
            )
        })?;

    Ok((StatusCode::OK, Json(serde_json::json!({ "errors": entries }))))
}
