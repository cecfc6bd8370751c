use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub address: String,
    pub max_seats: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// An event in the past can neither be booked nor have bookings cancelled.
    pub fn is_past(&self) -> bool {
        self.date < Utc::now()
    }
}
