pub mod user;
pub mod event;
pub mod booking;

pub use user::User;
pub use event::Event;
pub use booking::{Booking, BookingStatus};
