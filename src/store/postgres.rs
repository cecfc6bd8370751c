use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, Event};

use super::{BookingStore, NewBooking, StoreError};

/// Matches the partial unique index in 0003_create_bookings.sql.
const ACTIVE_BOOKING_CONSTRAINT: &str = "uniq_active_booking";

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    async fn count_confirmed(&self, event_id: Uuid) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM bookings WHERE event_id = $1 AND status = $2",
        )
        .bind(event_id)
        .bind(BookingStatus::Confirmed)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_waitlisted(&self, event_id: Uuid) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM bookings WHERE event_id = $1 AND status = $2",
        )
        .bind(event_id)
        .bind(BookingStatus::Waitlist)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_booking(&self, new: NewBooking) -> Result<Booking, StoreError> {
        let res = sqlx::query_as::<_, Booking>(
            "INSERT INTO bookings (event_id, user_id, status, position)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(new.event_id)
        .bind(new.user_id)
        .bind(new.status)
        .bind(new.position)
        .fetch_one(&self.pool)
        .await;

        match res {
            Ok(booking) => Ok(booking),
            Err(sqlx::Error::Database(db))
                if db.constraint() == Some(ACTIVE_BOOKING_CONSTRAINT) =>
            {
                Err(StoreError::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(booking)
    }

    async fn find_active_booking(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Booking>, StoreError> {
        let booking = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings
             WHERE event_id = $1 AND user_id = $2 AND status <> $3",
        )
        .bind(event_id)
        .bind(user_id)
        .bind(BookingStatus::Cancelled)
        .fetch_optional(&self.pool)
        .await?;
        Ok(booking)
    }

    async fn find_earliest_waitlisted(
        &self,
        event_id: Uuid,
    ) -> Result<Option<Booking>, StoreError> {
        let booking = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings
             WHERE event_id = $1 AND status = $2
             ORDER BY position ASC
             LIMIT 1",
        )
        .bind(event_id)
        .bind(BookingStatus::Waitlist)
        .fetch_optional(&self.pool)
        .await?;
        Ok(booking)
    }

    async fn update_booking_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
        position: Option<i32>,
    ) -> Result<Booking, StoreError> {
        let booking = sqlx::query_as::<_, Booking>(
            "UPDATE bookings SET status = $2, position = $3 WHERE id = $1 RETURNING *",
        )
        .bind(booking_id)
        .bind(status)
        .bind(position)
        .fetch_one(&self.pool)
        .await?;
        Ok(booking)
    }

    async fn shift_waitlist_after(
        &self,
        event_id: Uuid,
        position: i32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE bookings SET position = position - 1
             WHERE event_id = $1 AND status = $2 AND position > $3",
        )
        .bind(event_id)
        .bind(BookingStatus::Waitlist)
        .bind(position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
