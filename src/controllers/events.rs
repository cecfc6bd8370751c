use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::middleware::AuthUser;
use crate::models::Event;
use crate::services::booking::BookingError;
use crate::AppState;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", get(list_events))
        .route("/events", post(create_event))
        .route("/events/{id}", get(get_event))
        .route("/events/{id}/availability", get(get_availability))
}

/* ---------- helpers ---------- */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Attendee {
    id: Uuid,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    id: Uuid,
    name: String,
    description: Option<String>,
    date: DateTime<Utc>,
    address: String,
    max_seats: i32,
    seats_taken: usize,
    seats_available: i64,
    attendees: Vec<Attendee>,
}

impl EventResponse {
    fn from_event(event: Event, attendees: Vec<Attendee>) -> Self {
        let seats_taken = attendees.len();
        Self {
            id: event.id,
            name: event.name,
            description: event.description,
            date: event.date,
            address: event.address,
            max_seats: event.max_seats,
            seats_taken,
            seats_available: (i64::from(event.max_seats) - seats_taken as i64).max(0),
            attendees,
        }
    }
}

/// Confirmed attendees per event, in booking order.
async fn load_attendees(
    pool: &sqlx::PgPool,
    event_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Attendee>>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT b.event_id, u.id, u.name
        FROM bookings b
        JOIN users u ON u.id = b.user_id
        WHERE b.event_id = ANY($1) AND b.status = 'confirmed'
        ORDER BY b.created_at
        "#,
    )
    .bind(event_ids)
    .fetch_all(pool)
    .await?;

    let mut map: HashMap<Uuid, Vec<Attendee>> = HashMap::new();
    for row in rows {
        let event_id: Uuid = row.get("event_id");
        map.entry(event_id).or_default().push(Attendee {
            id: row.get("id"),
            name: row.get("name"),
        });
    }
    Ok(map)
}

/* ---------- EVENTS ---------- */

// GET /api/events
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub upcoming: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<Response, (StatusCode, String)> {
    let upcoming = params.upcoming.unwrap_or(false);
    let limit = params.limit.unwrap_or(10).clamp(1, 50);
    let offset = params.offset.unwrap_or(0);

    let cache_key = format!("events:upcoming={upcoming}&limit={limit}&offset={offset}");

    // Serve from the cache when a fresh copy exists.
    if let Ok(Some(cached_json)) = state.cache.get_cached_events(&cache_key).await {
        return Ok(Response::builder()
            .header("Content-Type", "application/json")
            .header("X-Cache", "HIT")
            .body(Body::from(cached_json))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()));
    }

    let mut query = String::from("SELECT * FROM events");
    if upcoming {
        query.push_str(" WHERE date >= NOW()");
        query.push_str(" ORDER BY date ASC");
    } else {
        query.push_str(" ORDER BY date DESC");
    }
    query.push_str(" LIMIT $1 OFFSET $2");

    let events = sqlx::query_as::<_, Event>(&query)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&state.db.pool)
        .await
        .map_err(|e| {
            tracing::error!("list_events sql error: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Events konnten nicht geladen werden".to_string(),
            )
        })?;

    let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
    let mut attendees = load_attendees(&state.db.pool, &event_ids)
        .await
        .map_err(|e| {
            tracing::error!("list_events attendees sql error: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Events konnten nicht geladen werden".to_string(),
            )
        })?;

    let payload: Vec<EventResponse> = events
        .into_iter()
        .map(|event| {
            let event_attendees = attendees.remove(&event.id).unwrap_or_default();
            EventResponse::from_event(event, event_attendees)
        })
        .collect();

    let count = payload.len();
    let response_json = serde_json::json!({
        "events": payload,
        "count": count,
    });

    match serde_json::to_string(&response_json) {
        Ok(json_str) => {
            if let Err(e) = state.cache.cache_events(&cache_key, &json_str).await {
                tracing::warn!("failed to cache events list: {:?}", e);
            }
            Ok(Response::builder()
                .header("Content-Type", "application/json")
                .header("X-Cache", "MISS")
                .body(Body::from(json_str))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
        }
        Err(_) => Ok(Json(response_json).into_response()),
    }
}

// GET /api/events/{id}
async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|e| {
            tracing::error!("get_event sql error: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Event konnte nicht geladen werden".to_string(),
            )
        })?
        .ok_or((StatusCode::NOT_FOUND, "Event nicht gefunden".to_string()))?;

    let mut attendees = load_attendees(&state.db.pool, &[event.id])
        .await
        .unwrap_or_default();
    let event_attendees = attendees.remove(&event.id).unwrap_or_default();

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "event": EventResponse::from_event(event, event_attendees)
        })),
    ))
}

// GET /api/events/{id}/availability
//
// Always recomputed from the booking rows; this endpoint is deliberately
// never cached.
async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match state.bookings.availability(event_id).await {
        Ok(availability) => Ok((StatusCode::OK, Json(availability))),
        Err(BookingError::EventNotFound) => {
            Err((StatusCode::NOT_FOUND, "Event nicht gefunden".to_string()))
        }
        Err(e) => {
            tracing::error!("get_availability for {} failed: {:?}", event_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verfügbarkeit konnte nicht ermittelt werden".to_string(),
            ))
        }
    }
}

// POST /api/events - admin only
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateEventRequest {
    #[validate(length(min = 3, max = 120))]
    name: String,
    description: Option<String>,
    date: DateTime<Utc>,
    #[validate(length(min = 5, max = 200))]
    address: String,
    #[validate(range(min = 1, max = 100))]
    max_seats: i32,
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !user.is_admin {
        return Err((
            StatusCode::FORBIDDEN,
            "Nur Organisatoren können Events anlegen".to_string(),
        ));
    }

    if req.validate().is_err() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Ungültige Eventdaten".to_string(),
        ));
    }

    if req.date < Utc::now() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Das Datum muss in der Zukunft liegen".to_string(),
        ));
    }

    let event = sqlx::query_as::<_, Event>(
        "INSERT INTO events (name, description, date, address, max_seats)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(&req.name)
    .bind(&req.description)
    .bind(req.date)
    .bind(&req.address)
    .bind(req.max_seats)
    .fetch_one(&state.db.pool)
    .await
    .map_err(|e| {
        tracing::error!("create_event sql error: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Event konnte nicht angelegt werden".to_string(),
        )
    })?;

    state.cache.invalidate_events().await;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "event": EventResponse::from_event(event, Vec::new())
        })),
    ))
}
