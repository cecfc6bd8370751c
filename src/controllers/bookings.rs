use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

use crate::middleware::{client_ip, AuthUser};
use crate::models::{BookingStatus, Event, User};
use crate::rate_limiter::LIMIT_BOOKING_CREATE;
use crate::services::booking::BookingError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings", get(get_user_bookings))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}", delete(cancel_booking))
}

/* ---------- helpers ---------- */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventSummary {
    id: Uuid,
    name: String,
    date: DateTime<Utc>,
    address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingResponse {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    status: BookingStatus,
    position: Option<i32>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<EventSummary>,
}

impl BookingResponse {
    fn from_booking(booking: &crate::models::Booking, event: Option<&Event>) -> Self {
        Self {
            id: booking.id,
            event_id: booking.event_id,
            user_id: booking.user_id,
            status: booking.status,
            position: booking.position,
            created_at: booking.created_at,
            event: event.map(|e| EventSummary {
                id: e.id,
                name: e.name.clone(),
                date: e.date,
                address: e.address.clone(),
            }),
        }
    }
}

/// Domain errors become localized responses; 409 for every duplicate.
fn domain_error_response(e: &BookingError) -> (StatusCode, String) {
    match e {
        BookingError::EventNotFound => {
            (StatusCode::NOT_FOUND, "Event nicht gefunden".to_string())
        }
        BookingError::BookingNotFound => {
            (StatusCode::NOT_FOUND, "Buchung nicht gefunden".to_string())
        }
        BookingError::EventInPast => (
            StatusCode::BAD_REQUEST,
            "Die Veranstaltung liegt in der Vergangenheit".to_string(),
        ),
        BookingError::AlreadyBooked => (
            StatusCode::CONFLICT,
            "Du hast dieses Event bereits gebucht".to_string(),
        ),
        BookingError::NotOwner => (
            StatusCode::FORBIDDEN,
            "Du kannst nur deine eigenen Buchungen verwalten".to_string(),
        ),
        BookingError::AlreadyCancelled => (
            StatusCode::BAD_REQUEST,
            "Diese Buchung wurde bereits storniert".to_string(),
        ),
        BookingError::Store(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Interner Fehler, bitte versuche es später erneut".to_string(),
        ),
    }
}

async fn load_event(pool: &sqlx::PgPool, event_id: Uuid) -> Option<Event> {
    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
}

fn rate_limited_response(retry_after: u64) -> Response {
    let body = serde_json::json!({
        "error": format!(
            "Zu viele Anfragen. Versuche es in {retry_after} Sekunden erneut."
        )
    });
    Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header("Content-Type", "application/json")
        .header("Retry-After", retry_after.to_string())
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| StatusCode::TOO_MANY_REQUESTS.into_response())
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookingRequest {
    event_id: Uuid,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<Response, (StatusCode, String)> {
    let decision = state.rate_limiter.check(
        &format!("bookings:{}", client_ip(&headers)),
        LIMIT_BOOKING_CREATE,
    );
    if !decision.allowed {
        let retry = decision.retry_after.map(|d| d.as_secs().max(1)).unwrap_or(60);
        return Ok(rate_limited_response(retry));
    }

    let booking = match state.bookings.create_booking(req.event_id, user.user_id).await {
        Ok(booking) => booking,
        Err(BookingError::Store(e)) => {
            tracing::error!("create_booking failed for event {}: {:?}", req.event_id, e);
            state
                .error_log
                .log_error(
                    "bookings",
                    &format!("create failed: {e}"),
                    Some(serde_json::json!({
                        "eventId": req.event_id,
                        "userId": user.user_id,
                    })),
                )
                .await;
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Buchung konnte nicht erstellt werden".to_string(),
            ));
        }
        Err(e) => return Err(domain_error_response(&e)),
    };

    state.cache.invalidate_events().await;

    let event = load_event(&state.db.pool, booking.event_id).await;

    // Notification is best-effort: a failed mail never fails the booking.
    if let Some(ref event) = event {
        let email = state.email.clone();
        let tracker = state.error_log.clone();
        let event = event.clone();
        let to = user.email.clone();
        let name = user.name.clone();
        let status = booking.status;
        tokio::spawn(async move {
            if let Err(e) = email
                .send_booking_notification(&to, &name, &event, status, false)
                .await
            {
                tracing::warn!("booking notification to {} failed: {}", to, e);
                tracker
                    .log_warning("email", &format!("booking notification failed: {e}"), None)
                    .await;
            }
        });
    }

    let message = match booking.position {
        Some(position) => format!(
            "Das Event ist ausgebucht. Du stehst auf Platz {position} der Warteliste."
        ),
        None => "Buchung bestätigt".to_string(),
    };

    let payload = serde_json::json!({
        "booking": BookingResponse::from_booking(&booking, event.as_ref()),
        "message": message,
    });
    Ok((StatusCode::CREATED, Json(payload)).into_response())
}

// GET /api/bookings
#[derive(Debug, Deserialize)]
struct BookingsQuery {
    status: Option<String>,
}

async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<BookingsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let status = params.status.as_deref().unwrap_or("confirmed");
    let status = parse_status(status).ok_or((
        StatusCode::BAD_REQUEST,
        "status muss confirmed, waitlist oder cancelled sein".to_string(),
    ))?;

    let rows = sqlx::query(
        r#"
        SELECT b.id, b.event_id, b.user_id, b.status, b.position, b.created_at,
               e.name AS event_name, e.date AS event_date, e.address AS event_address
        FROM bookings b
        JOIN events e ON e.id = b.event_id
        WHERE b.user_id = $1 AND b.status = $2
        ORDER BY b.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .bind(status)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| {
        tracing::error!("get_user_bookings sql error: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Buchungen konnten nicht geladen werden".to_string(),
        )
    })?;

    let bookings: Vec<BookingResponse> = rows
        .into_iter()
        .map(|row| BookingResponse {
            id: row.get("id"),
            event_id: row.get("event_id"),
            user_id: row.get("user_id"),
            status: row.get("status"),
            position: row.get("position"),
            created_at: row.get("created_at"),
            event: Some(EventSummary {
                id: row.get("event_id"),
                name: row.get("event_name"),
                date: row.get("event_date"),
                address: row.get("event_address"),
            }),
        })
        .collect();

    Ok((StatusCode::OK, Json(serde_json::json!({ "bookings": bookings }))))
}

fn parse_status(status: &str) -> Option<BookingStatus> {
    match status {
        "confirmed" => Some(BookingStatus::Confirmed),
        "waitlist" => Some(BookingStatus::Waitlist),
        "cancelled" => Some(BookingStatus::Cancelled),
        _ => None,
    }
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let booking = sqlx::query_as::<_, crate::models::Booking>(
        "SELECT * FROM bookings WHERE id = $1",
    )
    .bind(booking_id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| {
        tracing::error!("get_booking sql error: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Buchung konnte nicht geladen werden".to_string(),
        )
    })?
    .ok_or((StatusCode::NOT_FOUND, "Buchung nicht gefunden".to_string()))?;

    if booking.user_id != user.user_id && !user.is_admin {
        return Err((
            StatusCode::FORBIDDEN,
            "Du kannst nur deine eigenen Buchungen einsehen".to_string(),
        ));
    }

    let event = load_event(&state.db.pool, booking.event_id).await;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "booking": BookingResponse::from_booking(&booking, event.as_ref())
        })),
    ))
}

// DELETE /api/bookings/{id}
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let outcome = match state
        .bookings
        .cancel_booking(booking_id, user.user_id, user.is_admin)
        .await
    {
        Ok(outcome) => outcome,
        Err(BookingError::Store(e)) => {
            tracing::error!("cancel_booking {} failed: {:?}", booking_id, e);
            state
                .error_log
                .log_error(
                    "bookings",
                    &format!("cancel failed: {e}"),
                    Some(serde_json::json!({ "bookingId": booking_id })),
                )
                .await;
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Buchung konnte nicht storniert werden".to_string(),
            ));
        }
        Err(e) => return Err(domain_error_response(&e)),
    };

    state.cache.invalidate_events().await;

    // Tell the promoted guest the good news.
    if let Some(promoted) = outcome.promoted {
        let event = load_event(&state.db.pool, promoted.event_id).await;
        let promoted_user = User::find_by_id(promoted.user_id, &state.db)
            .await
            .ok()
            .flatten();

        if let (Some(event), Some(promoted_user)) = (event, promoted_user) {
            let email = state.email.clone();
            let tracker = state.error_log.clone();
            tokio::spawn(async move {
                if let Err(e) = email
                    .send_booking_notification(
                        &promoted_user.email,
                        &promoted_user.name,
                        &event,
                        BookingStatus::Confirmed,
                        true,
                    )
                    .await
                {
                    tracing::warn!(
                        "promotion notification to {} failed: {}",
                        promoted_user.email,
                        e
                    );
                    tracker
                        .log_warning(
                            "email",
                            &format!("promotion notification failed: {e}"),
                            None,
                        )
                        .await;
                }
            });
        }
    }

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Buchung erfolgreich storniert" })),
    ))
}
