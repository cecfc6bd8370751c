use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::User;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
}

// Basic Auth extractor: credentials are verified against the users table
// on every request. Plenty for an invite-only club of a few dozen people.
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let encoded = auth_header
            .strip_prefix("Basic ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

        let mut parts_iter = credentials.splitn(2, ':');
        let email = parts_iter.next().ok_or(StatusCode::UNAUTHORIZED)?;
        let password = parts_iter.next().ok_or(StatusCode::UNAUTHORIZED)?;

        let user = User::find_by_email(email, &state.db)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        if !user.verify_password(password) {
            return Err(StatusCode::UNAUTHORIZED);
        }

        Ok(AuthUser {
            user_id: user.id,
            email: user.email,
            name: user.name,
            is_admin: user.is_admin,
        })
    }
}

/// Client IP for rate limiting, read from proxy headers with a fallback.
pub fn client_ip(parts: &axum::http::HeaderMap) -> String {
    if let Some(forwarded) = parts.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    if let Some(real_ip) = parts.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return real_ip.trim().to_string();
    }
    "unknown-ip".to_string()
}
