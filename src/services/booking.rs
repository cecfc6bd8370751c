//! booking.rs
//!
//! Seat allocation and waitlist handling for events.
//!
//! Key components:
//! 1.  **BookingService**: decides confirmed-vs-waitlist at creation time,
//!     soft-cancels bookings and promotes the next waitlisted guest when a
//!     confirmed seat frees up. Availability is always recomputed from the
//!     booking rows, never kept as a counter.
//! 2.  **EventLocks**: sharded per-event async locks. All contention is
//!     scoped to a single event id, so serializing per event is enough;
//!     two simultaneous requests for the last seat of *one* event are the
//!     only race this system has.
//! 3.  **BookingError**: the domain error taxonomy the transport layer
//!     maps onto HTTP status codes.
//!
//! The storage layer additionally enforces the one-active-booking
//! constraint itself (partial unique index), so a duplicate booking is
//! rejected even on paths that bypass the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info};
use uuid::Uuid;

use crate::models::{Booking, BookingStatus};
use crate::store::{BookingStore, NewBooking, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("event not found")]
    EventNotFound,
    #[error("booking not found")]
    BookingNotFound,
    #[error("event is in the past")]
    EventInPast,
    #[error("user already has an active booking for this event")]
    AlreadyBooked,
    #[error("booking belongs to another user")]
    NotOwner,
    #[error("booking is already cancelled")]
    AlreadyCancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a cancellation: the cancelled booking plus the waitlisted
/// booking that moved into the freed seat, if any.
#[derive(Debug)]
pub struct Cancellation {
    pub cancelled: Booking,
    pub promoted: Option<Booking>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub max_seats: i32,
    pub confirmed_count: i64,
    pub seats_available: i64,
    pub waitlist_count: i64,
}

/// One async mutex per event id. Entries are created on first use; with a
/// hobby-scale handful of events the map never needs eviction.
#[derive(Clone, Default)]
struct EventLocks {
    inner: Arc<StdMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl EventLocks {
    async fn acquire(&self, event_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            map.entry(event_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct BookingService<S> {
    store: S,
    locks: EventLocks,
}

impl<S: BookingStore> BookingService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: EventLocks::default(),
        }
    }

    /// Books a seat for `user_id` on `event_id`.
    ///
    /// While confirmed seats remain the booking comes back `confirmed`;
    /// once the event is full it is appended to the end of the waitlist
    /// (FIFO). The confirmed count is read once, under the event lock, at
    /// decision time.
    pub async fn create_booking(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Booking, BookingError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(BookingError::EventNotFound)?;

        if event.is_past() {
            return Err(BookingError::EventInPast);
        }

        // All seat accounting for one event happens under its lock.
        let _guard = self.locks.acquire(event_id).await;

        if self
            .store
            .find_active_booking(event_id, user_id)
            .await?
            .is_some()
        {
            return Err(BookingError::AlreadyBooked);
        }

        let confirmed = self.store.count_confirmed(event_id).await?;
        let (status, position) = if confirmed < i64::from(event.max_seats) {
            (BookingStatus::Confirmed, None)
        } else {
            let waitlisted = self.store.count_waitlisted(event_id).await?;
            (BookingStatus::Waitlist, Some(waitlisted as i32 + 1))
        };

        let inserted = self
            .store
            .insert_booking(NewBooking {
                event_id,
                user_id,
                status,
                position,
            })
            .await;

        match inserted {
            Ok(booking) => {
                info!(
                    "booking {} for event {} created as {:?}",
                    booking.id, event_id, booking.status
                );
                Ok(booking)
            }
            // The unique index catches duplicates the pre-check above
            // could not see.
            Err(StoreError::Conflict) => Err(BookingError::AlreadyBooked),
            Err(e) => Err(e.into()),
        }
    }

    /// Soft-cancels a booking. Cancelled is terminal; the row is kept.
    ///
    /// Cancelling a confirmed booking frees a seat and promotes the head
    /// of the waitlist. Cancelling a waitlisted booking frees no seat and
    /// only closes the gap it leaves in the queue.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        acting_user: Uuid,
        is_admin: bool,
    ) -> Result<Cancellation, BookingError> {
        let booking = self
            .store
            .find_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound)?;

        if booking.user_id != acting_user && !is_admin {
            return Err(BookingError::NotOwner);
        }

        let event = self
            .store
            .get_event(booking.event_id)
            .await?
            .ok_or(BookingError::EventNotFound)?;

        if event.is_past() {
            return Err(BookingError::EventInPast);
        }

        let _guard = self.locks.acquire(booking.event_id).await;

        // Re-read under the lock: a concurrent cancellation may have
        // promoted this booking in the meantime.
        let booking = self
            .store
            .find_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound)?;

        if booking.status == BookingStatus::Cancelled {
            return Err(BookingError::AlreadyCancelled);
        }

        let prior_status = booking.status;
        let prior_position = booking.position;

        let cancelled = self
            .store
            .update_booking_status(booking_id, BookingStatus::Cancelled, None)
            .await?;

        let promoted = if prior_status == BookingStatus::Confirmed {
            // The cancellation is already committed. A failed promotion is
            // reconciled by the next availability read, not by rolling the
            // cancel back.
            match self.promote_next(booking.event_id).await {
                Ok(promoted) => promoted,
                Err(e) => {
                    error!(
                        "waitlist promotion after cancelling {} failed: {}",
                        booking_id, e
                    );
                    None
                }
            }
        } else {
            if let Some(position) = prior_position {
                self.store
                    .shift_waitlist_after(booking.event_id, position)
                    .await?;
            }
            None
        };

        Ok(Cancellation { cancelled, promoted })
    }

    /// Moves the smallest-position waitlisted booking of the event into
    /// the freed seat. One freed seat promotes exactly one booking; an
    /// empty waitlist is a no-op.
    async fn promote_next(&self, event_id: Uuid) -> Result<Option<Booking>, BookingError> {
        let Some(next) = self.store.find_earliest_waitlisted(event_id).await? else {
            return Ok(None);
        };

        let position = next.position.unwrap_or(1);
        let promoted = self
            .store
            .update_booking_status(next.id, BookingStatus::Confirmed, None)
            .await?;
        self.store.shift_waitlist_after(event_id, position).await?;

        info!(
            "booking {} promoted from waitlist for event {}",
            promoted.id, event_id
        );
        Ok(Some(promoted))
    }

    /// Seat availability, recomputed from the booking rows on every call.
    pub async fn availability(&self, event_id: Uuid) -> Result<Availability, BookingError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(BookingError::EventNotFound)?;

        let (confirmed, waitlisted) = futures::try_join!(
            self.store.count_confirmed(event_id),
            self.store.count_waitlisted(event_id),
        )?;

        Ok(Availability {
            max_seats: event.max_seats,
            confirmed_count: confirmed,
            seats_available: (i64::from(event.max_seats) - confirmed).max(0),
            waitlist_count: waitlisted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Event;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    /// In-memory store for exercising the service without Postgres. It
    /// enforces the same active-booking uniqueness rule as the partial
    /// unique index, so the service sees identical behavior.
    #[derive(Default)]
    struct MemoryStore {
        inner: StdMutex<MemoryInner>,
    }

    #[derive(Default)]
    struct MemoryInner {
        events: HashMap<Uuid, Event>,
        // Insertion order doubles as creation order.
        bookings: Vec<Booking>,
    }

    impl MemoryStore {
        fn with_event(event: Event) -> Self {
            let store = Self::default();
            store.inner.lock().unwrap().events.insert(event.id, event);
            store
        }

        fn snapshot(&self) -> Vec<Booking> {
            self.inner.lock().unwrap().bookings.clone()
        }
    }

    #[async_trait]
    impl BookingStore for MemoryStore {
        async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
            Ok(self.inner.lock().unwrap().events.get(&event_id).cloned())
        }

        async fn count_confirmed(&self, event_id: Uuid) -> Result<i64, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .bookings
                .iter()
                .filter(|b| b.event_id == event_id && b.status == BookingStatus::Confirmed)
                .count() as i64)
        }

        async fn count_waitlisted(&self, event_id: Uuid) -> Result<i64, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .bookings
                .iter()
                .filter(|b| b.event_id == event_id && b.status == BookingStatus::Waitlist)
                .count() as i64)
        }

        async fn insert_booking(&self, new: NewBooking) -> Result<Booking, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            let duplicate = inner.bookings.iter().any(|b| {
                b.event_id == new.event_id
                    && b.user_id == new.user_id
                    && b.status != BookingStatus::Cancelled
            });
            if duplicate {
                return Err(StoreError::Conflict);
            }
            let booking = Booking {
                id: Uuid::new_v4(),
                event_id: new.event_id,
                user_id: new.user_id,
                status: new.status,
                position: new.position,
                created_at: Utc::now(),
            };
            inner.bookings.push(booking.clone());
            Ok(booking)
        }

        async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.bookings.iter().find(|b| b.id == booking_id).cloned())
        }

        async fn find_active_booking(
            &self,
            event_id: Uuid,
            user_id: Uuid,
        ) -> Result<Option<Booking>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .bookings
                .iter()
                .find(|b| {
                    b.event_id == event_id
                        && b.user_id == user_id
                        && b.status != BookingStatus::Cancelled
                })
                .cloned())
        }

        async fn find_earliest_waitlisted(
            &self,
            event_id: Uuid,
        ) -> Result<Option<Booking>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .bookings
                .iter()
                .filter(|b| b.event_id == event_id && b.status == BookingStatus::Waitlist)
                .min_by_key(|b| b.position)
                .cloned())
        }

        async fn update_booking_status(
            &self,
            booking_id: Uuid,
            status: BookingStatus,
            position: Option<i32>,
        ) -> Result<Booking, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            let booking = inner
                .bookings
                .iter_mut()
                .find(|b| b.id == booking_id)
                .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
            booking.status = status;
            booking.position = position;
            Ok(booking.clone())
        }

        async fn shift_waitlist_after(
            &self,
            event_id: Uuid,
            position: i32,
        ) -> Result<(), StoreError> {
            let mut inner = self.inner.lock().unwrap();
            for booking in inner.bookings.iter_mut() {
                if booking.event_id == event_id
                    && booking.status == BookingStatus::Waitlist
                    && booking.position.is_some_and(|p| p > position)
                {
                    booking.position = booking.position.map(|p| p - 1);
                }
            }
            Ok(())
        }
    }

    fn upcoming_event(max_seats: i32) -> Event {
        Event {
            id: Uuid::new_v4(),
            name: "Abendessen im Tantris".to_string(),
            description: None,
            date: Utc::now() + Duration::days(14),
            address: "Johann-Fichte-Straße 7, München".to_string(),
            max_seats,
            status: "upcoming".to_string(),
            created_at: Utc::now(),
        }
    }

    fn service_for(event: &Event) -> BookingService<MemoryStore> {
        BookingService::new(MemoryStore::with_event(event.clone()))
    }

    fn assert_invariants(bookings: &[Booking], event_id: Uuid, max_seats: i32) {
        let confirmed = bookings
            .iter()
            .filter(|b| b.event_id == event_id && b.status == BookingStatus::Confirmed)
            .count();
        assert!(
            confirmed <= max_seats as usize,
            "capacity exceeded: {confirmed} > {max_seats}"
        );

        // Waitlist positions in creation order must be exactly 1..K.
        let positions: Vec<i32> = bookings
            .iter()
            .filter(|b| b.event_id == event_id && b.status == BookingStatus::Waitlist)
            .map(|b| b.position.expect("waitlisted booking without position"))
            .collect();
        let expected: Vec<i32> = (1..=positions.len() as i32).collect();
        assert_eq!(positions, expected, "waitlist not dense FIFO: {positions:?}");
    }

    #[tokio::test]
    async fn fills_capacity_then_waitlists() {
        let event = upcoming_event(8);
        let service = service_for(&event);

        for _ in 0..8 {
            let booking = service
                .create_booking(event.id, Uuid::new_v4())
                .await
                .unwrap();
            assert_eq!(booking.status, BookingStatus::Confirmed);
            assert_eq!(booking.position, None);
        }

        let ninth = service
            .create_booking(event.id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(ninth.status, BookingStatus::Waitlist);
        assert_eq!(ninth.position, Some(1));
    }

    #[tokio::test]
    async fn rejects_duplicate_booking() {
        let event = upcoming_event(8);
        let service = service_for(&event);
        let user = Uuid::new_v4();

        service.create_booking(event.id, user).await.unwrap();
        let second = service.create_booking(event.id, user).await;
        assert!(matches!(second, Err(BookingError::AlreadyBooked)));
    }

    #[tokio::test]
    async fn rejects_past_event_and_writes_nothing() {
        let mut event = upcoming_event(8);
        event.date = Utc::now() - Duration::days(1);
        let service = service_for(&event);

        let result = service.create_booking(event.id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(BookingError::EventInPast)));
        assert!(service.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn rejects_unknown_event_and_booking() {
        let event = upcoming_event(2);
        let service = service_for(&event);

        let create = service.create_booking(Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(create, Err(BookingError::EventNotFound)));

        let cancel = service
            .cancel_booking(Uuid::new_v4(), Uuid::new_v4(), false)
            .await;
        assert!(matches!(cancel, Err(BookingError::BookingNotFound)));
    }

    #[tokio::test]
    async fn cancelling_confirmed_promotes_head_of_waitlist() {
        let event = upcoming_event(2);
        let service = service_for(&event);

        let first_user = Uuid::new_v4();
        let first = service.create_booking(event.id, first_user).await.unwrap();
        service
            .create_booking(event.id, Uuid::new_v4())
            .await
            .unwrap();
        let third = service
            .create_booking(event.id, Uuid::new_v4())
            .await
            .unwrap();
        let fourth = service
            .create_booking(event.id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(third.position, Some(1));
        assert_eq!(fourth.position, Some(2));

        let outcome = service
            .cancel_booking(first.id, first_user, false)
            .await
            .unwrap();
        assert_eq!(outcome.cancelled.status, BookingStatus::Cancelled);
        assert_eq!(outcome.cancelled.position, None);

        // The former head of the waitlist got the freed seat...
        let promoted = outcome.promoted.expect("expected a promotion");
        assert_eq!(promoted.id, third.id);
        assert_eq!(promoted.status, BookingStatus::Confirmed);
        assert_eq!(promoted.position, None);

        // ...and the rest of the line moved up by exactly one.
        let remaining = service
            .store
            .find_booking(fourth.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remaining.status, BookingStatus::Waitlist);
        assert_eq!(remaining.position, Some(1));

        assert_invariants(&service.store.snapshot(), event.id, event.max_seats);
    }

    #[tokio::test]
    async fn cancelling_confirmed_with_empty_waitlist_promotes_nobody() {
        let event = upcoming_event(2);
        let service = service_for(&event);
        let user = Uuid::new_v4();

        let booking = service.create_booking(event.id, user).await.unwrap();
        let outcome = service.cancel_booking(booking.id, user, false).await.unwrap();
        assert!(outcome.promoted.is_none());
    }

    #[tokio::test]
    async fn cancelling_waitlisted_closes_gap_without_promotion() {
        let event = upcoming_event(1);
        let service = service_for(&event);

        service
            .create_booking(event.id, Uuid::new_v4())
            .await
            .unwrap();
        let w1 = service
            .create_booking(event.id, Uuid::new_v4())
            .await
            .unwrap();
        let second_user = Uuid::new_v4();
        let w2 = service.create_booking(event.id, second_user).await.unwrap();
        let w3 = service
            .create_booking(event.id, Uuid::new_v4())
            .await
            .unwrap();

        // Cancel the middle of the queue.
        let outcome = service
            .cancel_booking(w2.id, second_user, false)
            .await
            .unwrap();
        assert!(outcome.promoted.is_none(), "no seat was freed");

        let w1 = service.store.find_booking(w1.id).await.unwrap().unwrap();
        let w3 = service.store.find_booking(w3.id).await.unwrap().unwrap();
        assert_eq!(w1.position, Some(1));
        assert_eq!(w3.position, Some(2));

        assert_invariants(&service.store.snapshot(), event.id, event.max_seats);
    }

    #[tokio::test]
    async fn cancelled_is_terminal() {
        let event = upcoming_event(2);
        let service = service_for(&event);
        let user = Uuid::new_v4();

        let booking = service.create_booking(event.id, user).await.unwrap();
        service.cancel_booking(booking.id, user, false).await.unwrap();

        let again = service.cancel_booking(booking.id, user, false).await;
        assert!(matches!(again, Err(BookingError::AlreadyCancelled)));
    }

    #[tokio::test]
    async fn cancellation_requires_owner_unless_admin() {
        let event = upcoming_event(2);
        let service = service_for(&event);
        let owner = Uuid::new_v4();

        let booking = service.create_booking(event.id, owner).await.unwrap();

        let stranger = service
            .cancel_booking(booking.id, Uuid::new_v4(), false)
            .await;
        assert!(matches!(stranger, Err(BookingError::NotOwner)));

        let admin = service
            .cancel_booking(booking.id, Uuid::new_v4(), true)
            .await;
        assert!(admin.is_ok());
    }

    #[tokio::test]
    async fn rebooking_after_cancellation_is_allowed() {
        let event = upcoming_event(2);
        let service = service_for(&event);
        let user = Uuid::new_v4();

        let booking = service.create_booking(event.id, user).await.unwrap();
        service.cancel_booking(booking.id, user, false).await.unwrap();

        let again = service.create_booking(event.id, user).await.unwrap();
        assert_eq!(again.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn availability_is_derived_and_idempotent() {
        let event = upcoming_event(3);
        let service = service_for(&event);

        for _ in 0..4 {
            service
                .create_booking(event.id, Uuid::new_v4())
                .await
                .unwrap();
        }

        let first = service.availability(event.id).await.unwrap();
        assert_eq!(first.max_seats, 3);
        assert_eq!(first.confirmed_count, 3);
        assert_eq!(first.seats_available, 0);
        assert_eq!(first.waitlist_count, 1);

        let second = service.availability(event.id).await.unwrap();
        assert_eq!(first, second);
    }

    /// Ten simultaneous requests against 2 seats: exactly two may confirm,
    /// the rest queue up at positions 1..8, none are lost.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bookings_never_oversell() {
        let event = upcoming_event(2);
        let service = Arc::new(service_for(&event));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let service = Arc::clone(&service);
                let event_id = event.id;
                tokio::spawn(async move { service.create_booking(event_id, Uuid::new_v4()).await })
            })
            .collect();

        let mut confirmed = 0;
        let mut positions = Vec::new();
        for handle in handles {
            let booking = handle.await.unwrap().unwrap();
            match booking.status {
                BookingStatus::Confirmed => confirmed += 1,
                BookingStatus::Waitlist => positions.push(booking.position.unwrap()),
                BookingStatus::Cancelled => unreachable!(),
            }
        }

        assert_eq!(confirmed, 2);
        positions.sort_unstable();
        assert_eq!(positions, (1..=8).collect::<Vec<i32>>());
        assert_invariants(&service.store.snapshot(), event.id, event.max_seats);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Book(u8),
        Cancel(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..12u8).prop_map(Op::Book),
            (0..40u8).prop_map(Op::Cancel),
        ]
    }

    proptest! {
        /// Capacity and waitlist density survive arbitrary interleavings
        /// of bookings and cancellations.
        #[test]
        fn invariants_hold_for_any_op_sequence(
            ops in proptest::collection::vec(op_strategy(), 1..48)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            rt.block_on(async {
                let event = upcoming_event(3);
                let service = service_for(&event);
                let users: Vec<Uuid> = (0..12).map(|_| Uuid::new_v4()).collect();

                for op in ops {
                    match op {
                        Op::Book(user) => {
                            let user_id = users[user as usize];
                            // Duplicate bookings are a legal outcome here.
                            let _ = service.create_booking(event.id, user_id).await;
                        }
                        Op::Cancel(nth) => {
                            let bookings = service.store.snapshot();
                            if bookings.is_empty() {
                                continue;
                            }
                            let target = &bookings[nth as usize % bookings.len()];
                            // Already-cancelled targets are a legal outcome.
                            let _ = service
                                .cancel_booking(target.id, target.user_id, false)
                                .await;
                        }
                    }
                    assert_invariants(&service.store.snapshot(), event.id, event.max_seats);
                }
            });
        }
    }
}
