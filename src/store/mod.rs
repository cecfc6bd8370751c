//! Storage contract consumed by the booking service.
//!
//! The service only ever talks to this trait; production runs against
//! [`postgres::PgBookingStore`], the service tests against an in-memory
//! implementation. `insert_booking` is required to enforce the
//! one-active-booking-per-(event, user) invariant itself and report a
//! violation as [`StoreError::Conflict`]; an application-level existence
//! check alone would leave a check-then-act race open.

pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, Event};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Violation of the one-active-booking-per-user-per-event constraint.
    #[error("active booking already exists for this event and user")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: BookingStatus,
    pub position: Option<i32>,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError>;

    async fn count_confirmed(&self, event_id: Uuid) -> Result<i64, StoreError>;

    async fn count_waitlisted(&self, event_id: Uuid) -> Result<i64, StoreError>;

    async fn insert_booking(&self, new: NewBooking) -> Result<Booking, StoreError>;

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn find_active_booking(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Booking>, StoreError>;

    async fn find_earliest_waitlisted(
        &self,
        event_id: Uuid,
    ) -> Result<Option<Booking>, StoreError>;

    async fn update_booking_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
        position: Option<i32>,
    ) -> Result<Booking, StoreError>;

    /// Closes the gap left at `position`: every waitlisted booking of the
    /// event behind it moves up one place.
    async fn shift_waitlist_after(
        &self,
        event_id: Uuid,
        position: i32,
    ) -> Result<(), StoreError>;
}
