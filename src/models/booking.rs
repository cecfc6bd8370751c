use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle: confirmed|waitlist -> cancelled, waitlist -> confirmed
/// (promotion). Cancelled is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "booking_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Waitlist,
    Cancelled,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: BookingStatus,
    pub position: Option<i32>,
    pub created_at: DateTime<Utc>,
}
